use crate::pipeline::{PollStats, PollStatsSnapshot};
use crate::store::{ForecastSnapshot, ForecastStore};
use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

#[derive(Clone)]
pub struct HttpState {
    pub store: ForecastStore,
    pub stats: Arc<PollStats>,
    /// Ends open push streams so graceful shutdown can finish.
    pub shutdown: CancellationToken,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_forecast_data(State(state): State<HttpState>) -> Json<ForecastSnapshot> {
    Json(state.store.snapshot())
}

async fn get_stats(State(state): State<HttpState>) -> Json<PollStatsSnapshot> {
    Json(state.stats.snapshot())
}

/// Logs the subscriber leaving when its stream is dropped.
struct SubscriberGuard {
    id: Uuid,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        tracing::info!(subscriber = %self.id, "forecast subscriber disconnected");
    }
}

fn snapshot_events(
    store: ForecastStore,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Event, axum::Error>> + Send + 'static {
    let guard = SubscriberGuard { id: Uuid::new_v4() };
    tracing::info!(
        subscriber = %guard.id,
        subscribers = store.hub().subscriber_count() + 1,
        "forecast subscriber connected"
    );
    let subscription = store.hub().subscribe();
    subscription
        .into_stream()
        .take_until(async move { shutdown.cancelled().await })
        .map(move |version| {
            tracing::debug!(subscriber = %guard.id, version, "pushing forecast snapshot");
            Event::default().json_data(store.snapshot())
        })
}

async fn forecast_updates(State(state): State<HttpState>) -> impl IntoResponse {
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(snapshot_events(state.store, state.shutdown)),
    )
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/forecast-data", get(get_forecast_data))
        .route("/forecast_updates", get(forecast_updates))
        .route("/v1/stats", get(get_stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::{Forecast, ForecastValue};
    use crate::hub::NotificationHub;
    use crate::store::StoreUpdate;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> HttpState {
        HttpState {
            store: ForecastStore::new(
                ["sensor1", "sensor2"].map(String::from),
                NotificationHub::new(),
            ),
            stats: Arc::new(PollStats::new()),
            shutdown: CancellationToken::new(),
        }
    }

    fn publish(store: &ForecastStore, channel: &str, value: f64) {
        store.apply(StoreUpdate {
            forecasts: vec![(channel.into(), Forecast::now(ForecastValue::Scalar(value)))],
            fill_levels: vec![(channel.into(), 15)],
        });
    }

    fn parse_event(frame: &[u8]) -> Value {
        let text = std::str::from_utf8(frame).unwrap();
        assert!(text.ends_with("\n\n"), "frame {text:?}");
        let data = text
            .trim_end()
            .strip_prefix("data: ")
            .unwrap_or_else(|| panic!("frame {text:?}"));
        serde_json::from_str(data).unwrap()
    }

    #[tokio::test]
    async fn forecast_data_returns_collecting_snapshot() {
        let response = router(state())
            .oneshot(
                Request::builder()
                    .uri("/api/forecast-data")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], json!("collecting"));
        assert_eq!(value["forecasts"], json!({"sensor1": null, "sensor2": null}));
        assert_eq!(value["batch_status"], json!({"sensor1": 0, "sensor2": 0}));
    }

    #[tokio::test]
    async fn stats_endpoint_reports_counters() {
        let state = state();
        state.stats.record_poll_failure("connection refused");
        let response = router(state)
            .oneshot(Request::builder().uri("/v1/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["polls_failed"], json!(1));
        assert_eq!(value["last_error"], json!("connection refused"));
    }

    #[tokio::test]
    async fn updates_stream_pushes_snapshot_per_signal() {
        let state = state();
        let store = state.store.clone();
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/forecast_updates")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(store.hub().subscriber_count(), 1);

        let mut frames = response.into_body().into_data_stream();
        publish(&store, "sensor1", 21.5);
        let frame = tokio::time::timeout(Duration::from_secs(1), frames.next())
            .await
            .expect("event pushed")
            .expect("stream open")
            .unwrap();
        let pushed = parse_event(&frame);
        let pulled = serde_json::to_value(store.snapshot()).unwrap();
        assert_eq!(pushed["status"], json!("ready"));
        assert_eq!(pushed["forecasts"], pulled["forecasts"]);
        assert_eq!(pushed["batch_status"], pulled["batch_status"]);

        publish(&store, "sensor2", 7.0);
        let frame = tokio::time::timeout(Duration::from_secs(1), frames.next())
            .await
            .expect("second event pushed")
            .expect("stream open")
            .unwrap();
        assert_eq!(parse_event(&frame)["forecasts"]["sensor2"], json!(7.0));

        drop(frames);
        assert_eq!(store.hub().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn every_stream_receives_the_update() {
        let state = state();
        let store = state.store.clone();
        let app = router(state);

        let mut streams = Vec::new();
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/forecast_updates")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            streams.push(response.into_body().into_data_stream());
        }

        publish(&store, "sensor1", 3.0);
        for stream in &mut streams {
            let frame = tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .expect("event pushed")
                .expect("stream open")
                .unwrap();
            assert_eq!(parse_event(&frame)["forecasts"]["sensor1"], json!(3.0));
        }
    }

    #[tokio::test]
    async fn updates_stream_ends_on_shutdown() {
        let state = state();
        let shutdown = state.shutdown.clone();
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/forecast_updates")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let mut frames = response.into_body().into_data_stream();
        shutdown.cancel();
        let end = tokio::time::timeout(Duration::from_secs(1), frames.next())
            .await
            .expect("stream closed");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let response = router(state())
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header(header::ORIGIN, "http://dashboard.local")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
