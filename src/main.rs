use anyhow::{Context, Result};
use forecast_sidecar::accumulator::Accumulator;
use forecast_sidecar::config::Config;
use forecast_sidecar::forecast::ForecastInvoker;
use forecast_sidecar::http::{router, HttpState};
use forecast_sidecar::hub::NotificationHub;
use forecast_sidecar::pipeline::{ForecastPipeline, PollStats};
use forecast_sidecar::scheduler::Scheduler;
use forecast_sidecar::source::Fetcher;
use forecast_sidecar::store::ForecastStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,forecast_sidecar=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "forecast-sidecar"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{trimmed}/v1/traces")
}

/// Artifact problems leave the service up without a model.
fn load_invoker(config: &Config) -> Option<ForecastInvoker> {
    match ForecastInvoker::load(
        &config.model_path,
        &config.scaler_path,
        config.window_size,
        config.steps,
        config.predict_timeout(),
    ) {
        Ok(invoker) => Some(invoker),
        Err(err) => {
            tracing::error!(
                error = %err,
                "failed to load forecast artifacts; snapshots stay collecting"
            );
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let channel_names = config.channel_names();
    let hub = NotificationHub::new();
    let store = ForecastStore::new(channel_names.clone(), hub);
    let stats = Arc::new(PollStats::new());
    let accumulator = Accumulator::new(channel_names, config.policy.build(), config.window_size);
    tracing::info!(
        policy = accumulator.policy_name(),
        channels = ?config.channels.iter().map(ToString::to_string).collect::<Vec<_>>(),
        batch_size = config.batch_size,
        window_size = config.window_size,
        steps = config.steps,
        "forecast sidecar starting"
    );

    let pipeline = ForecastPipeline::new(
        accumulator,
        load_invoker(&config),
        store.clone(),
        stats.clone(),
    );
    let fetcher = Fetcher::new(&config).context("failed to build upstream client")?;
    let scheduler = Scheduler::new(
        fetcher,
        pipeline,
        config.poll_interval(),
        config.retry_backoff(),
    );

    let cancel = CancellationToken::new();
    let scheduler_handle = tokio::spawn(scheduler.run(cancel.clone()));

    let app = router(HttpState {
        store,
        stats,
        shutdown: cancel.clone(),
    });
    let listener = tokio::net::TcpListener::bind(config.http_bind)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind))?;
    tracing::info!(addr = %config.http_bind, "forecast HTTP listening");

    let shutdown = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
    cancel.cancel();

    if let Err(err) = scheduler_handle.await {
        tracing::warn!(error = %err, "scheduler task failed");
    }
    match server_handle.await {
        Ok(Err(err)) => tracing::error!(error = %err, "HTTP server exited with error"),
        Err(err) => tracing::error!(error = %err, "HTTP task failed"),
        Ok(Ok(())) => {}
    }

    Ok(())
}
