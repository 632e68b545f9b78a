//! Application trait and lifecycle management

use crate::ecs::EcsError;
use crate::engine::Engine;
use crate::render::{GpuBackend, RenderError};
use crate::window::{WindowEvent, WindowHost};
use thiserror::Error;

/// Application lifecycle trait
///
/// Implement this trait to drive a game on top of the engine. The methods are
/// generic over the device and window so the same application runs on the
/// Vulkan backend and on the headless device.
pub trait Application {
    /// Initialize the application
    ///
    /// Called once before the first frame. Push the initial game state, upload
    /// meshes and spawn entities here.
    fn initialize<B: GpuBackend, W: WindowHost>(&mut self, engine: &mut Engine<B, W>) -> Result<(), AppError>;

    /// Update the application
    ///
    /// Called every tick before the game states update.
    ///
    /// # Arguments
    /// * `engine` - Mutable reference to the engine
    /// * `delta_time` - Time since last frame in seconds
    fn update<B: GpuBackend, W: WindowHost>(
        &mut self,
        engine: &mut Engine<B, W>,
        delta_time: f32,
    ) -> Result<(), AppError>;

    /// Handle a window event after the engine has reacted to it
    fn handle_event<B: GpuBackend, W: WindowHost>(
        &mut self,
        _engine: &mut Engine<B, W>,
        _event: &WindowEvent,
    ) -> Result<(), AppError> {
        Ok(())
    }

    /// Cleanup the application
    ///
    /// Called once after the loop ends and the GPU is idle, before the game
    /// states are released.
    fn cleanup<B: GpuBackend, W: WindowHost>(&mut self, engine: &mut Engine<B, W>);
}

/// Application-level errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Entity or system misuse
    #[error("ECS error: {0}")]
    Ecs(#[from] EcsError),

    /// Renderer failure raised while the application touched GPU objects
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Custom application error
    #[error("Application error: {0}")]
    Custom(String),
}

impl AppError {
    /// Whether the engine loop must stop
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Ecs(_) => false,
            Self::Render(err) => err.is_fatal(),
            Self::Custom(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::Entity;

    #[test]
    fn test_ecs_errors_are_recoverable() {
        let err = AppError::from(EcsError::NoSuchEntity(Entity::default()));
        assert!(!err.is_fatal());
        assert!(AppError::Custom("boom".to_string()).is_fatal());
    }
}
