//! # Sleepy Engine
//!
//! A small real-time 3D engine on Vulkan with explicit CPU/GPU frame
//! synchronization and a minimal Entity-Component-System.
//!
//! ## Features
//!
//! - **Frame core**: per-frame command allocators, resource-state tracking,
//!   fence-paced reuse of a 2..=16 image swap-chain ring
//! - **Vulkan backend**: dynamic rendering, timeline semaphores, optional MSAA
//! - **Headless device**: a simulated GPU on a worker thread with a validating
//!   call trace, used by the test-suite
//! - **ECS**: slotmap entities, capability-masked systems, a game-state stack
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sleepy_engine::prelude::*;
//!
//! struct MyApp;
//!
//! impl Application for MyApp {
//!     fn initialize<B: GpuBackend, W: WindowHost>(&mut self, engine: &mut Engine<B, W>) -> Result<(), AppError> {
//!         engine.states_mut().push(GameState::new("main"));
//!         Ok(())
//!     }
//!
//!     fn update<B: GpuBackend, W: WindowHost>(
//!         &mut self,
//!         _engine: &mut Engine<B, W>,
//!         _delta_time: f32,
//!     ) -> Result<(), AppError> {
//!         Ok(())
//!     }
//!
//!     fn cleanup<B: GpuBackend, W: WindowHost>(&mut self, _engine: &mut Engine<B, W>) {}
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     let mut engine = Engine::with_vulkan(&config)?;
//!     engine.run(&mut MyApp)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod ecs;
pub mod foundation;
pub mod render;
pub mod window;

mod application;
mod engine;

pub use application::{AppError, Application};
pub use engine::{Engine, EngineError, EngineResult};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, EngineConfig, RendererConfig, WindowConfig},
        ecs::{
            components::{Collider, MeshReference, ShaderReference, Transform, Velocity},
            systems::{CollisionSystem, MovementSystem},
            Component, ComponentMask, EcsError, Entity, EntityFactory, GameState, GameStateStack, System, World,
        },
        foundation::{
            math::{Mat4, Quat, Vec3},
            time::Timer,
        },
        render::{
            backends::{HeadlessBackend, HeadlessConfig, VulkanBackend},
            DrawDataSource, DrawItem, FrameRenderer, GpuBackend, MeshData, MeshId, OrbitCamera, RenderError,
        },
        window::{GlfwWindow, WindowEvent, WindowHost},
        AppError, Application, Engine, EngineError, EngineResult,
    };
}
