use crate::error::{TransportError, WireError};
use std::future::Future;
use std::time::Duration;

/// Connect / read / write bounds applied to every socket operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Timeouts {
    pub fn from_millis(connect_ms: u64, read_ms: u64, write_ms: u64) -> Self {
        Self {
            connect: Duration::from_millis(connect_ms),
            read: Duration::from_millis(read_ms),
            write: Duration::from_millis(write_ms),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_millis(1_000, 5_000, 5_000)
    }
}

/// Runs `fut` under `limit`, turning an elapsed deadline into
/// [`TransportError::Timeout`] tagged with `stage`.
pub async fn with_timeout<T, E, F>(limit: Duration, stage: &'static str, fut: F) -> Result<T, WireError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<WireError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            tracing::warn!("Timed out while {} ({:?})", stage, limit);
            Err(TransportError::Timeout {
                stage,
                after_ms: limit.as_millis(),
            }
            .into())
        }
    }
}
