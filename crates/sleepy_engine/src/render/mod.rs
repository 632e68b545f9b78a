//! # Rendering System
//!
//! Frame lifecycle and GPU synchronization on top of an explicit graphics API.
//!
//! ## Architecture
//!
//! - **Backend contract**: [`GpuBackend`] with typed ids and recorded [`GpuCommand`]s
//! - **Device / CommandQueue / SwapChain**: thin owners of the matching backend objects
//! - **FrameRenderer**: per-frame state machine, frame ring and fence bookkeeping
//! - **Backends**: Vulkan for the window, a headless simulated device for tests

pub mod backend;
pub mod backends;
pub mod camera;
pub mod command_queue;
pub mod device;
pub mod draw_data;
pub mod error;
pub mod frame;
pub mod mesh;
pub mod pipeline;
pub mod renderer;
pub mod resource_state;
pub mod swap_chain;

pub use backend::{
    BackendError, BackendResult, DepthFormat, FenceValue, GpuBackend, GpuCommand, PixelFormat, ResourceId,
    ResourceState, SampleDesc,
};
pub use camera::OrbitCamera;
pub use command_queue::CommandQueue;
pub use device::Device;
pub use draw_data::{DrawDataSource, DrawItem};
pub use error::{RenderError, RenderResult};
pub use frame::{FrameRing, FrameSlot};
pub use mesh::{ColorVertex, MeshData, MeshId, MeshRegistry};
pub use pipeline::{ObjectConstants, ShaderBytecode};
pub use renderer::{FrameRenderer, FrameState};
pub use resource_state::ResourceStateTracker;
pub use swap_chain::SwapChain;
