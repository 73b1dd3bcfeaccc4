//! Error types for the SMA engine.
//!
//! Everything except `DeviceExecutionFault` is raised on the host before any
//! work reaches the device, so the output buffer is never touched on those paths.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Input and output buffers have different lengths.
    #[error("shape mismatch: input has {input} elements, output has {output}")]
    ShapeMismatch { input: usize, output: usize },

    /// Window is non-positive, or larger than the series when that is not allowed.
    #[error("invalid window {window} for series of length {len}: {reason}")]
    InvalidWindow {
        window: i64,
        len: usize,
        reason: &'static str,
    },

    /// A unit faulted while the grid was running. Output contents are unspecified.
    #[error("device execution fault: {reason}")]
    DeviceExecutionFault { reason: String },

    #[error("invalid configuration for {key}: {reason}")]
    Config { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors raised before dispatch; the caller can fix the arguments and retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::DeviceExecutionFault { .. })
    }
}
