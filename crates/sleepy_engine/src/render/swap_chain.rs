//! Back-buffer ring and presentation

use super::backend::{GpuBackend, PixelFormat, ResourceId, ResourceState, SampleDesc, SwapChainDesc};
use super::command_queue::CommandQueue;
use super::device::Device;
use super::error::{RenderError, RenderResult};
use super::resource_state::ResourceStateTracker;

/// Rotating set of presentable render targets
///
/// The window the buffers present to is bound when the backend is created.
#[derive(Debug)]
pub struct SwapChain {
    buffers: Vec<ResourceId>,
    current: u32,
    desc: SwapChainDesc,
}

impl SwapChain {
    /// Create `buffer_count` back buffers, all in [`ResourceState::Present`]
    pub fn new<B: GpuBackend>(
        device: &mut Device<B>,
        queue: &CommandQueue,
        desc: SwapChainDesc,
        states: &mut ResourceStateTracker,
    ) -> RenderResult<Self> {
        let buffers = device
            .backend_mut()
            .create_swap_chain(queue.id(), &desc)
            .map_err(|e| RenderError::Initialization(format!("swap chain: {}", e)))?;
        if buffers.len() != desc.buffer_count as usize {
            return Err(RenderError::Initialization(format!(
                "swap chain created {} buffers, {} requested",
                buffers.len(),
                desc.buffer_count
            )));
        }
        for &buffer in &buffers {
            states.register(buffer, ResourceState::Present);
        }
        let current = device.backend().current_back_buffer_index();
        log::info!(
            "Swap chain: {} x {:?} at {}x{}",
            desc.buffer_count,
            desc.format,
            desc.width,
            desc.height
        );
        Ok(Self { buffers, current, desc })
    }

    /// Back buffer to draw into this frame
    pub fn current_back_buffer(&self) -> ResourceId {
        self.buffers[self.current as usize]
    }

    /// Index of the current back buffer in the ring
    pub fn current_index(&self) -> u32 {
        self.current
    }

    /// Number of buffers in the ring
    pub fn buffer_count(&self) -> u32 {
        self.desc.buffer_count
    }

    /// Back buffer width
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    /// Back buffer height
    pub fn height(&self) -> u32 {
        self.desc.height
    }

    /// Back buffer format
    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }

    /// Multisample description of the render targets
    pub fn sample(&self) -> SampleDesc {
        self.desc.sample
    }

    /// All back buffers in ring order
    pub fn buffers(&self) -> &[ResourceId] {
        &self.buffers
    }

    /// Flip the current back buffer and advance the ring cursor
    ///
    /// The work that rendered into the buffer must already be submitted and
    /// must have returned it to [`ResourceState::Present`].
    pub fn present<B: GpuBackend>(
        &mut self,
        device: &mut Device<B>,
        queue: &CommandQueue,
        states: &ResourceStateTracker,
    ) -> RenderResult<()> {
        states.require(self.current_back_buffer(), ResourceState::Present)?;
        device
            .backend_mut()
            .present(queue.id())
            .map_err(|err| device.submission_error("present", err))?;

        let expected = (self.current + 1) % self.desc.buffer_count;
        let reported = device.backend().current_back_buffer_index();
        if reported != expected {
            log::warn!(
                "Presentation engine returned back buffer {} instead of {}",
                reported,
                expected
            );
        }
        self.current = reported;
        Ok(())
    }

    /// Recreate every back buffer at a new size
    ///
    /// No GPU work may reference the buffers; the caller flushes first.
    /// Returns `false` and does nothing for a zero-area size. A failed
    /// recreation is fatal: the backend may already have destroyed the old
    /// buffers.
    pub fn resize<B: GpuBackend>(
        &mut self,
        device: &mut Device<B>,
        width: u32,
        height: u32,
        states: &mut ResourceStateTracker,
    ) -> RenderResult<bool> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring swap chain resize to {}x{}", width, height);
            return Ok(false);
        }
        let buffers = device.backend_mut().resize_swap_chain(width, height).map_err(|err| {
            if let Some(reason) = device.backend().device_removed_reason() {
                return RenderError::DeviceRemoved { reason };
            }
            RenderError::Initialization(format!("swap chain resize to {}x{}: {}", width, height, err))
        })?;
        for &buffer in &self.buffers {
            states.forget(buffer);
        }
        for &buffer in &buffers {
            states.register(buffer, ResourceState::Present);
        }
        self.desc.width = width;
        self.desc.height = height;
        self.desc.buffer_count = buffers.len() as u32;
        self.buffers = buffers;
        self.current = device.backend().current_back_buffer_index();
        log::info!("Swap chain resized to {}x{}", width, height);
        Ok(true)
    }
}
