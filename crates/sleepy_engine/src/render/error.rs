//! Renderer error types

use thiserror::Error;

use super::backend::{BackendError, ResourceId, ResourceState};
use super::renderer::FrameState;
use crate::config::ConfigError;

/// Errors raised by the frame core
#[derive(Error, Debug)]
pub enum RenderError {
    /// Creating a GPU object failed during startup
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// The GPU device was removed or reset; not retryable
    #[error("Device removed: {reason}")]
    DeviceRemoved {
        /// Reason reported by the driver
        reason: String,
    },

    /// Submitting, signalling or waiting on the queue failed
    #[error("Submission failed: {0}")]
    Submission(String),

    /// A resource was used in a state it is not in
    #[error("Resource {resource:?} is in state {actual:?}, expected {expected:?}")]
    ResourceState {
        /// Offending resource
        resource: ResourceId,
        /// State the operation requires
        expected: ResourceState,
        /// State the resource is actually in
        actual: ResourceState,
    },

    /// A frame operation was called out of order
    #[error("{operation} called while the frame is {state:?}")]
    InvalidFrameState {
        /// Operation that was attempted
        operation: &'static str,
        /// Frame state at the time of the call
        state: FrameState,
    },

    /// Any other backend failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Renderer configuration was rejected
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Reading shader bytecode failed
    #[error("Shader load failed for {path}: {source}")]
    ShaderLoad {
        /// Path that was read
        path: String,
        /// Underlying IO error
        source: std::io::Error,
    },
}

impl RenderError {
    /// Whether the error must terminate the run loop
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Initialization(_)
            | Self::DeviceRemoved { .. }
            | Self::Submission(_)
            | Self::Config(_)
            | Self::ShaderLoad { .. } => true,
            Self::Backend(err) => matches!(err, BackendError::DeviceLost | BackendError::Initialization(_)),
            // A broken invariant; release builds log it and keep going
            Self::ResourceState { .. } => cfg!(debug_assertions),
            Self::InvalidFrameState { .. } => false,
        }
    }
}

/// Result type for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let removed = RenderError::DeviceRemoved { reason: "hung".to_string() };
        assert!(removed.is_fatal());

        let misuse = RenderError::ResourceState {
            resource: ResourceId(3),
            expected: ResourceState::Present,
            actual: ResourceState::RenderTarget,
        };
        assert_eq!(misuse.is_fatal(), cfg!(debug_assertions));

        let order = RenderError::InvalidFrameState { operation: "end_frame", state: FrameState::Idle };
        assert!(!order.is_fatal());
        assert!(RenderError::Backend(BackendError::DeviceLost).is_fatal());
        assert!(!RenderError::Backend(BackendError::Validation("x".to_string())).is_fatal());
    }

    #[test]
    fn test_device_removed_message_carries_reason() {
        let err = RenderError::DeviceRemoved { reason: "TDR".to_string() };
        assert_eq!(err.to_string(), "Device removed: TDR");
    }
}
