//! Window management
//!
//! The engine only needs a small slice of a window system: pump events, report
//! the client size and tell it when to close. [`WindowHost`] is that slice;
//! [`GlfwWindow`] implements it and additionally hands the Vulkan backend what
//! it needs to create a surface.

mod glfw_window;

pub use glfw_window::GlfwWindow;

use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialised
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Any other GLFW failure
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Mouse buttons the engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    /// Primary button
    Left,
    /// Secondary button
    Right,
    /// Any other button
    Other,
}

/// Events the engine consumes from the window system
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowEvent {
    /// The user asked to close the window
    CloseRequested,
    /// Client area changed; zero-sized when minimised
    Resized {
        /// New width in pixels
        width: u32,
        /// New height in pixels
        height: u32,
    },
    /// Escape key pressed
    EscapePressed,
    /// Cursor position in client coordinates
    CursorMoved {
        /// Horizontal position
        x: f64,
        /// Vertical position
        y: f64,
    },
    /// Mouse button pressed or released
    MouseButton {
        /// Which button
        button: MouseButton,
        /// `true` on press
        pressed: bool,
    },
}

/// Window collaborator driven by the engine loop
pub trait WindowHost {
    /// Process pending OS events and return the ones the engine cares about
    fn poll_events(&mut self) -> Vec<WindowEvent>;

    /// Client area in pixels
    fn client_size(&self) -> (u32, u32);

    /// Whether the window has been asked to close
    fn should_close(&self) -> bool;

    /// Ask the window to close at the end of this iteration
    fn request_close(&mut self);
}
