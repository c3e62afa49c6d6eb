use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use macaddr::MacAddr6;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aranet::{DeviceReader, Reading, ReadingCache, Transport};

pub const TICK_PERIOD: Duration = Duration::from_secs(10);

/// Receives every freshly fetched reading, on the polling task.
///
/// Implementations must return quickly: the poller waits for them before the
/// next tick.
pub trait ReadingSink: Send + Sync {
    fn accept(&self, reading: &Reading);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// The cached reading is still inside its interval.
    Fresh,
    Failed,
    Updated,
}

/// Periodically refreshes the cache of one device.
pub struct Poller<T> {
    id: MacAddr6,
    room: String,
    cache: Arc<ReadingCache>,
    reader: DeviceReader<T>,
    sink: Option<Arc<dyn ReadingSink>>,
}

impl<T: Transport> Poller<T> {
    pub fn new(
        id: MacAddr6,
        room: impl Into<String>,
        cache: Arc<ReadingCache>,
        reader: DeviceReader<T>,
    ) -> Self {
        Self {
            id,
            room: room.into(),
            cache,
            reader,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReadingSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Polls every [`TICK_PERIOD`] until `cancel` fires.
    ///
    /// A fetch that is already running is allowed to finish; no new one is
    /// started once cancellation has been observed.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(id = %self.id, room = %self.room, "monitoring aranet4");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(id = %self.id, room = %self.room, "stopped update loop");
                    return;
                }
                _ = ticker.tick() => {}
            }

            debug!(id = %self.id, "tick");
            self.poll_once(Utc::now()).await;
        }
    }

    /// One tick: refetch only if the cached reading has outlived its interval.
    /// On failure the previous reading stays in place.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Poll {
        if !self.cache.get().is_due(now) {
            return Poll::Fresh;
        }

        debug!(id = %self.id, "updating");
        let reading = match self.reader.fetch(self.id).await {
            Ok(reading) => reading,
            Err(err) => {
                warn!(room = %self.room, "failed update: {err}");
                return Poll::Failed;
            }
        };
        debug!(id = %self.id, ?reading, "got reading");

        self.cache.set(reading);
        if let Some(sink) = &self.sink {
            sink.accept(&reading);
        }

        Poll::Updated
    }
}
