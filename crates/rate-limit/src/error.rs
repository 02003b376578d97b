use thiserror::Error;

/// Invalid bucket configuration. Denied grants are not errors; see
/// [`Grant`](crate::Grant).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BucketError {
    #[error("bucket capacity must be finite and greater than zero, got {0}")]
    InvalidCapacity(f64),

    #[error("flow rate must be finite and greater than zero, got {0}/sec")]
    InvalidFlowRate(f64),

    #[error("initial volume {volume} must be between 0 and the capacity {capacity}")]
    InvalidInitialVolume { volume: f64, capacity: f64 },

    #[error("max queue grant size {size} must be greater than zero and at most the capacity {capacity}")]
    InvalidQueueGrantSize { size: f64, capacity: f64 },
}
