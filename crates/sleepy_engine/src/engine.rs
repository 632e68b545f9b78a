//! Core engine implementation
//!
//! [`Engine`] is the explicit context of a run: it owns the window, the frame
//! renderer, the game-state stack and the timer. Applications get it by
//! `&mut` in every callback; there is no global instance.

use crate::{
    application::{AppError, Application},
    config::{ConfigError, EngineConfig},
    ecs::{EcsError, GameStateStack},
    foundation::time::Timer,
    render::{
        backends::VulkanBackend, BackendError, DrawDataSource, DrawItem, FrameRenderer, GpuBackend, RenderError,
        ShaderBytecode,
    },
    window::{GlfwWindow, MouseButton, WindowError, WindowEvent, WindowHost},
};
use thiserror::Error;

/// Orbit speed in radians per pixel of horizontal or vertical drag
const ORBIT_RADIANS_PER_PIXEL: f32 = 0.25 * std::f32::consts::PI / 180.0;
/// Zoom distance per pixel of right-button drag
const ZOOM_PER_PIXEL: f32 = 0.005;

#[derive(Debug, Default)]
struct MouseDrag {
    last: Option<(f64, f64)>,
    button: Option<MouseButton>,
}

/// Main engine struct
///
/// The engine coordinates the subsystems and manages the main loop.
pub struct Engine<B: GpuBackend, W: WindowHost> {
    window: W,
    renderer: FrameRenderer<B>,
    states: GameStateStack,
    timer: Timer,
    running: bool,
    minimized: bool,
    draw_items: Vec<DrawItem>,
    drag: MouseDrag,
}

impl Engine<VulkanBackend, GlfwWindow> {
    /// Open a window, bring up Vulkan on it and load the shaders
    pub fn with_vulkan(config: &EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let mut window = GlfwWindow::new(&config.window)?;
        let backend = VulkanBackend::new(&mut window, &config.renderer)?;
        let shaders = ShaderBytecode::load(&config.renderer.shaders)?;
        Self::new(window, backend, config, &shaders)
    }
}

impl<B: GpuBackend, W: WindowHost> Engine<B, W> {
    /// Create an engine on an already bound window and device
    pub fn new(window: W, backend: B, config: &EngineConfig, shaders: &ShaderBytecode) -> EngineResult<Self> {
        log::info!("Initializing engine...");
        config.validate()?;

        let (width, height) = window.client_size();
        let renderer = FrameRenderer::new(backend, &config.renderer, width, height, shaders)?;

        Ok(Self {
            window,
            renderer,
            states: GameStateStack::new(),
            timer: Timer::new(),
            running: true,
            minimized: false,
            draw_items: Vec::with_capacity(config.renderer.max_objects as usize),
            drag: MouseDrag::default(),
        })
    }

    /// Run the main loop until the window closes, the application quits or
    /// a fatal error occurs
    ///
    /// Recoverable errors are logged and the loop continues. On a fatal error
    /// the GPU is drained before the error is returned.
    pub fn run<A: Application>(&mut self, app: &mut A) -> EngineResult<()> {
        app.initialize(self)?;

        log::info!("Starting main loop...");
        self.running = true;
        let mut outcome = Ok(());

        while self.running && !self.window.should_close() {
            if let Err(err) = self.tick(app) {
                if err.is_fatal() {
                    log::error!("Fatal error, shutting down: {}", err);
                    outcome = Err(err);
                    break;
                }
                log::warn!("Recovered from error: {}", err);
            }
        }

        if let Err(err) = self.renderer.flush() {
            log::error!("Final flush failed: {}", err);
        }
        app.cleanup(self);
        self.states.release_all();
        if let Err(err) = self.renderer.shutdown() {
            log::error!("Renderer shutdown failed: {}", err);
            if outcome.is_ok() {
                outcome = Err(err.into());
            }
        }

        log::info!(
            "Engine shutdown complete after {} frames ({:.1} fps average)",
            self.renderer.frame_count(),
            self.timer.average_fps()
        );
        outcome
    }

    /// One iteration: events, simulation, then one rendered frame
    pub fn tick<A: Application>(&mut self, app: &mut A) -> EngineResult<()> {
        for event in self.window.poll_events() {
            self.handle_event(&event)?;
            app.handle_event(self, &event)?;
        }
        if !self.running {
            return Ok(());
        }

        self.timer.update();
        let delta_time = self.timer.delta_time();
        app.update(self, delta_time)?;
        self.states.update(delta_time);

        if self.minimized {
            return Ok(());
        }
        self.render()
    }

    /// Collect draw items from the current game state and render one frame
    pub fn render(&mut self) -> EngineResult<()> {
        self.draw_items.clear();
        self.states.collect_draw_items(&mut self.draw_items);
        match self.renderer.render_frame(&self.draw_items) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.renderer.abort_frame();
                Err(err.into())
            }
        }
    }

    /// React to a window event
    pub fn handle_event(&mut self, event: &WindowEvent) -> EngineResult<()> {
        match *event {
            WindowEvent::CloseRequested | WindowEvent::EscapePressed => self.quit(),
            WindowEvent::Resized { width, height } => {
                self.minimized = width == 0 || height == 0;
                if !self.minimized {
                    self.renderer.resize(width, height)?;
                }
            }
            WindowEvent::MouseButton { button, pressed } => {
                self.drag.button = pressed.then_some(button);
            }
            WindowEvent::CursorMoved { x, y } => {
                if let (Some(button), Some((last_x, last_y))) = (self.drag.button, self.drag.last) {
                    let dx = (x - last_x) as f32;
                    let dy = (y - last_y) as f32;
                    match button {
                        MouseButton::Left => self
                            .renderer
                            .camera_mut()
                            .rotate(dx * ORBIT_RADIANS_PER_PIXEL, dy * ORBIT_RADIANS_PER_PIXEL),
                        MouseButton::Right => self.renderer.camera_mut().zoom((dx - dy) * ZOOM_PER_PIXEL),
                        MouseButton::Other => {}
                    }
                }
                self.drag.last = Some((x, y));
            }
        }
        Ok(())
    }

    /// Request engine shutdown at the end of this iteration
    pub fn quit(&mut self) {
        log::info!("Engine shutdown requested");
        self.running = false;
        self.window.request_close();
    }

    /// Whether the loop is still running
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Game-state stack
    pub fn states(&self) -> &GameStateStack {
        &self.states
    }

    /// Mutable game-state stack
    pub fn states_mut(&mut self) -> &mut GameStateStack {
        &mut self.states
    }

    /// Frame renderer
    pub fn renderer(&self) -> &FrameRenderer<B> {
        &self.renderer
    }

    /// Mutable frame renderer
    pub fn renderer_mut(&mut self) -> &mut FrameRenderer<B> {
        &mut self.renderer
    }

    /// Window collaborator
    pub fn window(&self) -> &W {
        &self.window
    }

    /// Get the current frame delta time
    pub fn delta_time(&self) -> f32 {
        self.timer.delta_time()
    }
}

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration was rejected
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Window system failure
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// Frame core failure
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Entity or system misuse
    #[error("ECS error: {0}")]
    Ecs(#[from] EcsError),

    /// Device creation failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Error raised by the application
    #[error("Application error: {0}")]
    Application(#[from] AppError),
}

impl EngineError {
    /// Whether the error must terminate the run loop
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::Window(_) | Self::Backend(_) => true,
            Self::Render(err) => err.is_fatal(),
            Self::Ecs(_) => false,
            Self::Application(err) => err.is_fatal(),
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::ResourceId;
    use crate::render::ResourceState;

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::from(RenderError::DeviceRemoved { reason: "hung".to_string() }).is_fatal());
        let misuse = EngineError::from(RenderError::ResourceState {
            resource: ResourceId(1),
            expected: ResourceState::RenderTarget,
            actual: ResourceState::Present,
        });
        assert_eq!(misuse.is_fatal(), cfg!(debug_assertions));
        assert!(EngineError::from(ConfigError::Invalid("bad".to_string())).is_fatal());
        assert!(!EngineError::from(AppError::Ecs(EcsError::NoSuchEntity(Default::default()))).is_fatal());
    }
}
