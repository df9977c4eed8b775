use thiserror::Error;

use crate::models::ride::RideStatus;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("backend rejected request ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("provider lookup failed: {0}")]
    ProviderLookupFailed(String),

    #[error("geolocation permission denied")]
    GeolocationDenied,

    #[error("geolocation timed out")]
    GeolocationTimeout,

    #[error("geolocation unavailable: {0}")]
    GeolocationUnavailable(String),

    #[error("lifecycle inconsistency: {from:?} -> {to:?}")]
    LifecycleInconsistency { from: RideStatus, to: RideStatus },

    #[error("no active ride")]
    NoActiveRide,

    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Errors the caller can retry without changing anything locally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransportUnavailable(_)
                | SyncError::ProviderLookupFailed(_)
                | SyncError::GeolocationTimeout
                | SyncError::GeolocationUnavailable(_)
        )
    }
}
