//! Error types for sluice components.
//!
//! Only closure is ever surfaced to callers of the core components. Duplicate
//! inserts, deletes of absent keys and deadline drops are resolved inside the
//! owning loop and never show up here.

use thiserror::Error;

/// Errors returned by message ports.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PortError {
    /// The other side of the port is gone.
    #[error("Port is closed")]
    Closed,
}

/// Errors related to [`OrderedKeyedContainer`](crate::OrderedKeyedContainer) operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContainerError {
    /// The container has been closed; no more items will be accepted or produced.
    #[error("Container is closed")]
    Closed,

    /// The container was created outside of a tokio runtime.
    #[error("No tokio runtime available to drive the control loop")]
    NoRuntime,

    /// The supplied configuration was rejected.
    #[error("Invalid container configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<PortError> for ContainerError {
    fn from(_: PortError) -> Self {
        ContainerError::Closed
    }
}

/// Errors related to [`DeliveryTracker`](crate::DeliveryTracker) operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// The tracker has been closed.
    #[error("Tracker is closed")]
    Closed,

    /// The tracker was created outside of a tokio runtime.
    #[error("No tokio runtime available to drive the control loop")]
    NoRuntime,

    /// The supplied configuration was rejected.
    #[error("Invalid tracker configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<PortError> for TrackerError {
    fn from(_: PortError) -> Self {
        TrackerError::Closed
    }
}

impl From<ContainerError> for TrackerError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::Closed => TrackerError::Closed,
            ContainerError::NoRuntime => TrackerError::NoRuntime,
            ContainerError::Config(e) => TrackerError::Config(e),
        }
    }
}

/// Errors related to pipeline stages ([`Buffer`](crate::stage::Buffer),
/// [`Mux`](crate::stage::Mux), [`Skip`](crate::stage::Skip)).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageError {
    /// The stage has been closed.
    #[error("Stage is closed")]
    Closed,

    /// The stage was created outside of a tokio runtime.
    #[error("No tokio runtime available to drive the stage")]
    NoRuntime,

    /// The requested capacity was rejected.
    #[error("Invalid stage configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<PortError> for StageError {
    fn from(_: PortError) -> Self {
        StageError::Closed
    }
}

/// Errors raised while validating configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A port capacity is larger than the runtime can allocate.
    #[error("Capacity {capacity} for port '{port}' exceeds maximum {max}")]
    CapacityTooLarge {
        /// Name of the offending port.
        port: &'static str,
        /// Requested capacity.
        capacity: usize,
        /// Largest supported capacity.
        max: usize,
    },

    /// The default deadline must be non-zero.
    #[error("Default deadline must be greater than zero")]
    ZeroDeadline,
}

/// Errors related to serial-number framing.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SerialError {
    /// The buffer cannot hold a serial number.
    #[error("Buffer of {len} bytes is shorter than a serial number ({expected} bytes)")]
    TooShort {
        /// Length of the buffer that was inspected.
        len: usize,
        /// Bytes required for a serial number.
        expected: usize,
    },
}

/// Errors related to the metrics store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetricsError {
    /// The metric was never registered.
    #[error("Metric name not found: {0}")]
    Unknown(String),
}
