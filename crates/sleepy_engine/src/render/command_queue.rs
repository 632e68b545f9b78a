//! Direct command queue with its completion fence

use super::backend::{CommandListId, FenceId, FenceValue, GpuBackend, QueueId};
use super::device::Device;
use super::error::{RenderError, RenderResult};

/// The single GPU work queue and its monotonically increasing fence
///
/// `last_signaled` only ever grows. A value is reached once the GPU completion
/// counter is greater than or equal to it.
#[derive(Debug)]
pub struct CommandQueue {
    queue: QueueId,
    fence: FenceId,
    last_signaled: FenceValue,
}

impl CommandQueue {
    /// Create the direct queue and a fence starting at 0
    pub fn new<B: GpuBackend>(device: &mut Device<B>) -> RenderResult<Self> {
        let queue = device
            .backend_mut()
            .create_command_queue()
            .map_err(|e| RenderError::Initialization(format!("command queue: {}", e)))?;
        let fence = device
            .backend_mut()
            .create_fence(0)
            .map_err(|e| RenderError::Initialization(format!("fence: {}", e)))?;
        log::debug!("Created command queue {:?} with fence {:?}", queue, fence);
        Ok(Self {
            queue,
            fence,
            last_signaled: 0,
        })
    }

    /// Queue handle, for presentation
    pub fn id(&self) -> QueueId {
        self.queue
    }

    /// Highest value handed out by [`CommandQueue::signal_fence`]
    pub fn last_signaled(&self) -> FenceValue {
        self.last_signaled
    }

    /// Enqueue closed command lists for execution
    pub fn submit<B: GpuBackend>(&self, device: &mut Device<B>, lists: &[CommandListId]) -> RenderResult<()> {
        device
            .backend_mut()
            .execute_command_lists(self.queue, lists)
            .map_err(|err| device.submission_error("submit", err))
    }

    /// Enqueue a GPU signal of the next fence value and return that value
    pub fn signal_fence<B: GpuBackend>(&mut self, device: &mut Device<B>) -> RenderResult<FenceValue> {
        let value = self.last_signaled + 1;
        device
            .backend_mut()
            .signal(self.queue, self.fence, value)
            .map_err(|err| device.submission_error("signal", err))?;
        self.last_signaled = value;
        Ok(value)
    }

    /// Value the GPU has completed so far
    pub fn completed_value<B: GpuBackend>(&self, device: &Device<B>) -> RenderResult<FenceValue> {
        device
            .backend()
            .fence_completed_value(self.fence)
            .map_err(|err| device.submission_error("fence query", err))
    }

    /// Block until the GPU has reached `value`
    pub fn wait_for_fence_value<B: GpuBackend>(&self, device: &Device<B>, value: FenceValue) -> RenderResult<()> {
        if self.completed_value(device)? >= value {
            return Ok(());
        }
        log::trace!("Waiting for fence value {}", value);
        device
            .backend()
            .wait_for_fence(self.fence, value)
            .map_err(|err| device.submission_error("fence wait", err))
    }

    /// Signal and wait: after this returns the queue is idle
    pub fn flush<B: GpuBackend>(&mut self, device: &mut Device<B>) -> RenderResult<()> {
        let value = self.signal_fence(device)?;
        self.wait_for_fence_value(device, value)
    }
}
