use crate::accumulator::{Accumulator, Delivery};
use crate::forecast::{Forecast, ForecastInvoker};
use crate::store::{ForecastStore, StoreUpdate};
use crate::telemetry::{ParsedPoll, ReadingBatch};
use chrono::Utc;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};


#[derive(Debug)]
pub struct PollStats {
    pub polls_ok: AtomicU64,
    pub polls_failed: AtomicU64,
    pub consecutive_failures: AtomicU64,
    pub last_poll_unix_ms: AtomicU64,
    pub batches_accepted: AtomicU64,
    pub batches_duplicate: AtomicU64,
    pub batches_rejected: AtomicU64,
    pub windows_assembled: AtomicU64,
    pub forecasts_emitted: AtomicU64,
    pub inference_failures: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PollStatsSnapshot {
    pub polls_ok: u64,
    pub polls_failed: u64,
    pub consecutive_failures: u64,
    pub last_poll_unix_ms: u64,
    pub batches_accepted: u64,
    pub batches_duplicate: u64,
    pub batches_rejected: u64,
    pub windows_assembled: u64,
    pub forecasts_emitted: u64,
    pub inference_failures: u64,
    pub last_error: Option<String>,
}

impl PollStats {
    pub fn new() -> Self {
        Self {
            polls_ok: AtomicU64::new(0),
            polls_failed: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            last_poll_unix_ms: AtomicU64::new(0),
            batches_accepted: AtomicU64::new(0),
            batches_duplicate: AtomicU64::new(0),
            batches_rejected: AtomicU64::new(0),
            windows_assembled: AtomicU64::new(0),
            forecasts_emitted: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn record_poll_ok(&self) {
        self.polls_ok.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.touch();
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    /// Returns the number of failures in a row, including this one.
    pub fn record_poll_failure(&self, err: impl Into<String>) -> u64 {
        self.polls_failed.fetch_add(1, Ordering::Relaxed);
        self.touch();
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn touch(&self) {
        let now = Utc::now().timestamp_millis() as u64;
        self.last_poll_unix_ms.store(now, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PollStatsSnapshot {
        PollStatsSnapshot {
            polls_ok: self.polls_ok.load(Ordering::Relaxed),
            polls_failed: self.polls_failed.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_poll_unix_ms: self.last_poll_unix_ms.load(Ordering::Relaxed),
            batches_accepted: self.batches_accepted.load(Ordering::Relaxed),
            batches_duplicate: self.batches_duplicate.load(Ordering::Relaxed),
            batches_rejected: self.batches_rejected.load(Ordering::Relaxed),
            windows_assembled: self.windows_assembled.load(Ordering::Relaxed),
            forecasts_emitted: self.forecasts_emitted.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            last_error: self.last_error.lock().ok().and_then(|guard| guard.clone()),
        }
    }
}

impl Default for PollStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Duplicate,
    UnknownChannel,
    Processed { windows: usize, forecasts: usize },
}

/// Accumulator → invoker → store for one poll, run serially on the ingestion task.
pub struct ForecastPipeline {
    accumulator: Accumulator,
    invoker: Option<ForecastInvoker>,
    store: ForecastStore,
    stats: Arc<PollStats>,
}

impl ForecastPipeline {
    /// `invoker` is `None` when the model failed to load: windows are still consumed
    /// but nothing is ever forecast.
    pub fn new(
        accumulator: Accumulator,
        invoker: Option<ForecastInvoker>,
        store: ForecastStore,
        stats: Arc<PollStats>,
    ) -> Self {
        if invoker.is_none() {
            tracing::warn!("forecast model unavailable; running degraded");
        }
        Self {
            accumulator,
            invoker,
            store,
            stats,
        }
    }

    pub fn store(&self) -> &ForecastStore {
        &self.store
    }

    pub fn stats(&self) -> Arc<PollStats> {
        self.stats.clone()
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    pub async fn ingest(&mut self, poll: ParsedPoll) -> Vec<BatchOutcome> {
        for channel in &poll.missing {
            tracing::debug!(channel = %channel, "no data this cycle");
        }
        for (channel, err) in &poll.rejected {
            self.stats.batches_rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(channel = %channel, error = %err, "dropping channel batch");
        }

        let mut outcomes = Vec::with_capacity(poll.batches.len());
        for batch in poll.batches {
            outcomes.push(self.deliver(batch).await);
        }
        outcomes
    }

    pub async fn deliver(&mut self, batch: ReadingBatch) -> BatchOutcome {
        let channel = batch.channel.clone();
        let token = batch.token.clone();
        let len = batch.len();

        let windows = match self.accumulator.deliver(batch) {
            Delivery::Duplicate => {
                self.stats.batches_duplicate.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(channel = %channel, token = %token, "duplicate batch suppressed");
                return BatchOutcome::Duplicate;
            }
            Delivery::UnknownChannel => {
                tracing::warn!(channel = %channel, "batch for unconfigured channel");
                return BatchOutcome::UnknownChannel;
            }
            Delivery::Accepted(windows) => windows,
        };
        self.stats.batches_accepted.fetch_add(1, Ordering::Relaxed);
        self.stats
            .windows_assembled
            .fetch_add(windows.len() as u64, Ordering::Relaxed);
        tracing::info!(
            channel = %channel,
            token = %token,
            len,
            windows = windows.len(),
            policy = self.accumulator.policy_name(),
            "accepted batch"
        );

        let window_count = windows.len();
        let mut update = StoreUpdate::default();
        for window in windows {
            let target = window.channel().to_string();
            let Some(invoker) = &self.invoker else {
                tracing::debug!(channel = %target, "no model loaded; window discarded");
                continue;
            };
            match invoker.invoke(window).await {
                Ok(value) => {
                    self.stats.forecasts_emitted.fetch_add(1, Ordering::Relaxed);
                    let forecast = Forecast::now(value);
                    tracing::info!(
                        channel = %target,
                        forecast = ?forecast.value,
                        computed_at = %forecast.computed_at,
                        "generated forecast"
                    );
                    update.forecasts.push((target, forecast));
                }
                Err(err) => {
                    self.stats.inference_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        channel = %target,
                        error = %err,
                        "forecast skipped; keeping previous value"
                    );
                }
            }
        }

        let forecasts = update.forecasts.len();
        update.fill_levels = self.accumulator.fill_levels();
        self.store.apply(update);
        BatchOutcome::Processed {
            windows: window_count,
            forecasts,
        }
    }
}
