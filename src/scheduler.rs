use crate::pipeline::ForecastPipeline;
use crate::source::Fetcher;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Drives fetch → ingest forever: `poll_interval` after a good poll, `retry_backoff`
/// after a failed one. Only cancellation stops it.
pub struct Scheduler {
    fetcher: Fetcher,
    pipeline: ForecastPipeline,
    poll_interval: Duration,
    retry_backoff: Duration,
}

impl Scheduler {
    pub fn new(
        fetcher: Fetcher,
        pipeline: ForecastPipeline,
        poll_interval: Duration,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            fetcher,
            pipeline,
            poll_interval,
            retry_backoff,
        }
    }

    /// Runs one fetch/ingest cycle and returns how long to wait before the next.
    pub async fn tick(&mut self) -> Duration {
        let stats = self.pipeline.stats();
        match self.fetcher.fetch().await {
            Ok(poll) => {
                stats.record_poll_ok();
                self.pipeline.ingest(poll).await;
                self.poll_interval
            }
            Err(err) => {
                let failures = stats.record_poll_failure(err.to_string());
                tracing::warn!(
                    url = self.fetcher.url(),
                    error = %err,
                    failures,
                    backoff = ?self.retry_backoff,
                    "upstream poll failed"
                );
                self.retry_backoff
            }
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> ForecastPipeline {
        tracing::info!(
            url = self.fetcher.url(),
            interval = ?self.poll_interval,
            "forecast scheduler started"
        );
        loop {
            let wait = tokio::select! {
                _ = cancel.cancelled() => break,
                wait = self.tick() => wait,
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        tracing::info!("forecast scheduler stopped");
        self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::{Accumulator, PolicyKind};
    use crate::forecast::test_support::{invoker, MeanPredictor};
    use crate::forecast::ForecastValue;
    use crate::hub::NotificationHub;
    use crate::pipeline::PollStats;
    use crate::store::ForecastStore;
    use crate::telemetry::Channel;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Upstream that fails its first call, then serves a new batch each time.
    async fn flaky_upstream(hits: Arc<AtomicUsize>) -> String {
        async fn handler(State(hits): State<Arc<AtomicUsize>>) -> axum::response::Response {
            let n = hits.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
            }
            let base = (n * 2) as f64;
            axum::Json(json!({
                "s1": {"value": [base, base + 1.0], "timestamp": format!("t{n}")}
            }))
            .into_response()
        }

        let router = Router::new().route("/data", get(handler)).with_state(hits);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}/data")
    }

    fn scheduler(url: String, predictor: Arc<MeanPredictor>) -> Scheduler {
        let fetcher = Fetcher::with_parts(
            url,
            vec![Channel::plain("s1")],
            2,
            Duration::from_secs(2),
        )
        .unwrap();
        let channels = vec!["s1".to_string()];
        let accumulator = Accumulator::new(channels.clone(), PolicyKind::DoubleBuffer.build(), 4);
        let store = ForecastStore::new(channels, NotificationHub::new());
        let pipeline = ForecastPipeline::new(
            accumulator,
            Some(invoker(predictor, 1)),
            store,
            Arc::new(PollStats::new()),
        );
        Scheduler::new(
            fetcher,
            pipeline,
            Duration::from_millis(10),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn tick_backs_off_after_failure_then_polls_on_interval() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = flaky_upstream(hits.clone()).await;
        let mut scheduler = scheduler(url, Arc::new(MeanPredictor::new(4)));

        assert_eq!(scheduler.tick().await, Duration::from_millis(5));
        let stats = scheduler.pipeline.stats().snapshot();
        assert_eq!(stats.polls_failed, 1);
        assert_eq!(stats.consecutive_failures, 1);
        assert!(stats.last_error.is_some());

        assert_eq!(scheduler.tick().await, Duration::from_millis(10));
        let stats = scheduler.pipeline.stats().snapshot();
        assert_eq!(stats.polls_ok, 1);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.last_error, None);
    }

    #[tokio::test]
    async fn run_keeps_polling_until_cancelled() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = flaky_upstream(hits.clone()).await;
        let predictor = Arc::new(MeanPredictor::new(4));
        let scheduler = scheduler(url, predictor.clone());
        let store = scheduler.pipeline.store().clone();
        let mut updates = store.hub().subscribe();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), updates.changed())
            .await
            .expect("a forecast arrives")
            .expect("hub alive");
        cancel.cancel();
        let pipeline = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler stops")
            .expect("task joined");

        assert!(hits.load(Ordering::SeqCst) >= 3);
        assert!(matches!(
            pipeline.store().forecast("s1").map(|f| f.value),
            Some(ForecastValue::Scalar(_))
        ));
        assert!(predictor.calls() >= 1);
    }
}
