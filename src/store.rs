use crate::forecast::{Forecast, ForecastValue};
use crate::hub::NotificationHub;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Ready,
    Collecting,
}

/// Payload shared by the pull endpoint and every push message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastSnapshot {
    pub status: SnapshotStatus,
    pub forecasts: BTreeMap<String, Option<ForecastValue>>,
    pub batch_status: BTreeMap<String, usize>,
    pub timestamp: f64,
}

/// Everything one delivery changes, applied under a single write guard.
#[derive(Debug, Default)]
pub struct StoreUpdate {
    pub forecasts: Vec<(String, Forecast)>,
    pub fill_levels: Vec<(String, usize)>,
}

#[derive(Debug)]
struct StoreState {
    forecasts: BTreeMap<String, Option<Forecast>>,
    fill_levels: BTreeMap<String, usize>,
}

/// Latest forecast and fill level per channel; the only state shared between the
/// ingestion task and readers.
#[derive(Clone, Debug)]
pub struct ForecastStore {
    state: Arc<RwLock<StoreState>>,
    hub: NotificationHub,
}

impl ForecastStore {
    pub fn new(channels: impl IntoIterator<Item = String>, hub: NotificationHub) -> Self {
        let mut forecasts = BTreeMap::new();
        let mut fill_levels = BTreeMap::new();
        for channel in channels {
            forecasts.insert(channel.clone(), None);
            fill_levels.insert(channel, 0);
        }
        Self {
            state: Arc::new(RwLock::new(StoreState {
                forecasts,
                fill_levels,
            })),
            hub,
        }
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    /// Applies `update` atomically. Signals subscribers when a forecast changed and
    /// returns whether it did.
    pub fn apply(&self, update: StoreUpdate) -> bool {
        let changed = {
            let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let state = &mut *guard;
            for (channel, level) in update.fill_levels {
                if let Some(slot) = state.fill_levels.get_mut(&channel) {
                    *slot = level;
                }
            }
            let mut changed = false;
            for (channel, forecast) in update.forecasts {
                match state.forecasts.get_mut(&channel) {
                    Some(slot) => {
                        *slot = Some(forecast);
                        changed = true;
                    }
                    None => {
                        tracing::warn!(channel = %channel, "dropping forecast for unknown channel");
                    }
                }
            }
            changed
        };
        if changed {
            let version = self.hub.signal();
            tracing::debug!(version, "forecast store updated");
        }
        changed
    }

    pub fn forecast(&self, channel: &str) -> Option<Forecast> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.forecasts.get(channel).cloned().flatten()
    }

    pub fn snapshot(&self) -> ForecastSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let forecasts: BTreeMap<String, Option<ForecastValue>> = state
            .forecasts
            .iter()
            .map(|(channel, forecast)| {
                (
                    channel.clone(),
                    forecast.as_ref().map(|forecast| forecast.value.clone()),
                )
            })
            .collect();
        let status = if forecasts.values().any(Option::is_some) {
            SnapshotStatus::Ready
        } else {
            SnapshotStatus::Collecting
        };
        ForecastSnapshot {
            status,
            forecasts,
            batch_status: state.fill_levels.clone(),
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ForecastStore {
        ForecastStore::new(
            ["sensor1", "sensor2"].map(String::from),
            NotificationHub::new(),
        )
    }

    #[test]
    fn snapshot_starts_collecting_with_null_forecasts() {
        let snapshot = store().snapshot();
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["status"], json!("collecting"));
        assert_eq!(value["forecasts"], json!({"sensor1": null, "sensor2": null}));
        assert_eq!(value["batch_status"], json!({"sensor1": 0, "sensor2": 0}));
        assert!(value["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn apply_updates_forecast_and_fill_together() {
        let store = store();
        let changed = store.apply(StoreUpdate {
            forecasts: vec![(
                "sensor1".into(),
                Forecast::now(ForecastValue::Scalar(21.5)),
            )],
            fill_levels: vec![("sensor1".into(), 15)],
        });
        assert!(changed);
        assert_eq!(store.hub().version(), 1);
        assert!(store.forecast("sensor1").is_some());

        let value = serde_json::to_value(store.snapshot()).unwrap();
        assert_eq!(value["status"], json!("ready"));
        assert_eq!(value["forecasts"]["sensor1"], json!(21.5));
        assert_eq!(value["forecasts"]["sensor2"], json!(null));
        assert_eq!(value["batch_status"]["sensor1"], json!(15));
    }

    #[test]
    fn fill_only_update_does_not_signal() {
        let store = store();
        let changed = store.apply(StoreUpdate {
            forecasts: Vec::new(),
            fill_levels: vec![("sensor2".into(), 15)],
        });
        assert!(!changed);
        assert_eq!(store.hub().version(), 0);
        assert_eq!(store.snapshot().batch_status["sensor2"], 15);
    }

    #[test]
    fn sequence_forecasts_serialize_as_arrays() {
        let store = store();
        store.apply(StoreUpdate {
            forecasts: vec![(
                "sensor2".into(),
                Forecast::now(ForecastValue::Sequence(vec![1.0, 2.0])),
            )],
            fill_levels: Vec::new(),
        });
        let value = serde_json::to_value(store.snapshot()).unwrap();
        assert_eq!(value["forecasts"]["sensor2"], json!([1.0, 2.0]));
    }

    #[test]
    fn unknown_channel_forecast_is_ignored() {
        let store = store();
        let changed = store.apply(StoreUpdate {
            forecasts: vec![("ghost".into(), Forecast::now(ForecastValue::Scalar(1.0)))],
            fill_levels: Vec::new(),
        });
        assert!(!changed);
        assert!(store.forecast("ghost").is_none());
    }
}
