use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use macaddr::MacAddr6;
use tokio::time;
use tracing::warn;

use crate::aranet::Reading;

/// Hardware access: open a connection to a device by address.
pub trait Transport: Send + Sync + 'static {
    type Handle: Handle;

    /// The returned future is dropped if the connect phase times out, so
    /// anything it acquired before that must be released on drop.
    fn connect(&self, id: MacAddr6) -> impl Future<Output = Result<Self::Handle>> + Send;
}

/// An open connection to one device.
pub trait Handle: Send {
    fn read(&mut self) -> impl Future<Output = Result<Reading>> + Send;

    fn close(self) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Connect,
    Read,
}

impl fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchPhase::Connect => f.write_str("connecting to"),
            FetchPhase::Read => f.write_str("reading from"),
        }
    }
}

/// A failed fetch, tagged with the device and the phase that failed.
#[derive(Debug)]
pub struct FetchError {
    pub id: MacAddr6,

    pub phase: FetchPhase,

    cause: Error,
}

impl FetchError {
    fn new(id: MacAddr6, phase: FetchPhase, cause: Error) -> Self {
        Self { id, phase, cause }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed {} aranet4 {}: {:#}", self.phase, self.id, self.cause)
    }
}

impl std::error::Error for FetchError {}

/// Performs one connect, read, disconnect cycle per call. Never retries.
#[derive(Debug)]
pub struct DeviceReader<T> {
    transport: Arc<T>,
    timeout: Duration,
}

impl<T> Clone for DeviceReader<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            timeout: self.timeout,
        }
    }
}

impl<T: Transport> DeviceReader<T> {
    /// `timeout` bounds the connect and the read phase separately.
    pub fn new(transport: Arc<T>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub async fn fetch(&self, id: MacAddr6) -> Result<Reading, FetchError> {
        let mut handle = match time::timeout(self.timeout, self.transport.connect(id)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => return Err(FetchError::new(id, FetchPhase::Connect, err)),
            Err(_) => {
                return Err(FetchError::new(
                    id,
                    FetchPhase::Connect,
                    anyhow!("timed out after {:?}", self.timeout),
                ));
            }
        };

        let result = time::timeout(self.timeout, handle.read()).await;

        // the handle is released whatever the read did
        if let Err(err) = handle.close().await {
            warn!(%id, "failed to disconnect from aranet4: {err:#}");
        }

        match result {
            Ok(Ok(reading)) => Ok(reading),
            Ok(Err(err)) => Err(FetchError::new(id, FetchPhase::Read, err)),
            Err(_) => Err(FetchError::new(
                id,
                FetchPhase::Read,
                anyhow!("timed out after {:?}", self.timeout),
            )),
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{TimeDelta, Utc};

    use super::testing::{FakeTransport, Outcome};
    use super::*;

    const ID: MacAddr6 = MacAddr6::new(0xd8, 0x9b, 0x67, 0xaa, 0xbb, 0xcc);

    #[tokio::test]
    async fn fetch_returns_reading_and_closes() {
        let reading = Reading {
            co2_ppm: 800,
            measured_at: Utc::now(),
            interval: TimeDelta::minutes(1),
            ..Reading::default()
        };
        let transport = FakeTransport::new(Outcome::Returns(reading));
        let reader = DeviceReader::new(Arc::clone(&transport), Duration::from_secs(1));

        assert_eq!(reader.fetch(ID).await.unwrap(), reading);
        assert_eq!(transport.counters.get(), (1, 1, 1));
    }

    #[tokio::test]
    async fn connect_failure_is_tagged() {
        let transport = FakeTransport::new(Outcome::ConnectFails);
        let reader = DeviceReader::new(Arc::clone(&transport), Duration::from_secs(1));

        let err = reader.fetch(ID).await.unwrap_err();
        assert_eq!(err.phase, FetchPhase::Connect);
        assert_eq!(err.id, ID);
        assert!(err.to_string().contains("connecting to aranet4 D8:9B:67:AA:BB:CC"));
        assert_eq!(transport.counters.get(), (1, 0, 0));
    }

    #[tokio::test]
    async fn read_failure_still_closes_handle() {
        let transport = FakeTransport::new(Outcome::ReadFails);
        let reader = DeviceReader::new(Arc::clone(&transport), Duration::from_secs(1));

        let err = reader.fetch(ID).await.unwrap_err();
        assert_eq!(err.phase, FetchPhase::Read);
        assert!(err.to_string().contains("characteristic read failed"));
        assert_eq!(transport.counters.get(), (1, 1, 1));
    }

    struct HangingTransport;
    struct HangingHandle;

    impl Transport for HangingTransport {
        type Handle = HangingHandle;

        async fn connect(&self, _id: MacAddr6) -> Result<HangingHandle> {
            Ok(HangingHandle)
        }
    }

    impl Handle for HangingHandle {
        async fn read(&mut self) -> Result<Reading> {
            std::future::pending().await
        }

        async fn close(self) -> Result<()> {
            Ok(())
        }
    }

    /// Holds a link open while alive.
    struct Link(Arc<AtomicUsize>);

    impl Drop for Link {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Opens a link, then stalls before the handle is ready.
    struct StallingTransport {
        open_links: Arc<AtomicUsize>,
    }

    impl Transport for StallingTransport {
        type Handle = HangingHandle;

        async fn connect(&self, _id: MacAddr6) -> Result<HangingHandle> {
            self.open_links.fetch_add(1, Ordering::SeqCst);
            let _link = Link(Arc::clone(&self.open_links));
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_releases_partial_connection() {
        let open_links = Arc::new(AtomicUsize::new(0));
        let transport = StallingTransport {
            open_links: Arc::clone(&open_links),
        };
        let reader = DeviceReader::new(Arc::new(transport), Duration::from_secs(30));

        let err = reader.fetch(ID).await.unwrap_err();
        assert_eq!(err.phase, FetchPhase::Connect);
        assert!(err.to_string().contains("timed out"));
        assert_eq!(open_links.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn read_timeout_is_a_read_failure() {
        let reader = DeviceReader::new(Arc::new(HangingTransport), Duration::from_secs(30));

        let err = reader.fetch(ID).await.unwrap_err();
        assert_eq!(err.phase, FetchPhase::Read);
        assert!(err.to_string().contains("timed out"));
    }
}
