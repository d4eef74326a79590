use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Coalescing broadcast of "the forecast store changed".
///
/// Every subscriber tracks the version it last saw, so waking one subscriber never
/// consumes the signal for another. Several signals before a subscriber wakes collapse
/// into one wake-up.
#[derive(Clone, Debug)]
pub struct NotificationHub {
    tx: Arc<watch::Sender<u64>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Bumps the version and wakes every subscriber. Returns the new version.
    pub fn signal(&self) -> u64 {
        self.tx.send_modify(|version| *version = version.wrapping_add(1));
        self.version()
    }

    pub fn version(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// New subscribers wait for the next signal; earlier ones are not replayed.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct Subscription {
    rx: watch::Receiver<u64>,
}

impl Subscription {
    /// Waits for the next signal. `None` once the hub is gone.
    pub async fn changed(&mut self) -> Option<u64> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    pub fn into_stream(self) -> WatchStream<u64> {
        WatchStream::from_changes(self.rx)
    }
}
