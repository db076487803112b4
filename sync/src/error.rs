//! Synchronization error types.

use thiserror::Error;

/// Errors that can occur while creating or driving a fence.
///
/// Every variant is fatal to the operation that produced it. Fences never
/// retry; recovering from device loss is up to the layer above.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// An explicit signal value did not move the fence forward.
    #[error("fence values must increase: current value is {current}, requested {requested}")]
    NonMonotonicSignal {
        /// Value the fence was at when the signal was requested.
        current: u64,
        /// Rejected value.
        requested: u64,
    },
    /// Failed to create a marker or completion event.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// Out of host or device memory.
    #[error("out of memory")]
    OutOfMemory,
    /// The device owning the queue was lost or removed.
    #[error("GPU device lost")]
    DeviceLost,
    /// Any other failure reported by the backend.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias used throughout the crate.
pub type SyncResult<T> = Result<T, SyncError>;
