//! Graphics backend implementations
//!
//! Vulkan drives the window; the headless device simulates a GPU on a worker
//! thread so the frame core can be exercised without hardware.

pub mod headless;
pub mod vulkan;

pub use headless::{HeadlessBackend, HeadlessConfig, HeadlessProbe, TraceEvent};
pub use vulkan::VulkanBackend;
