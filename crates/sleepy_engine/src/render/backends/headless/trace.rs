//! Recorded history of the simulated device and the handle tests use to read it

use std::sync::Arc;

use crate::render::backend::{CommandAllocatorId, CommandListId, FenceId, FenceValue, ResourceId, ResourceState};

use super::worker::Shared;

/// One observable event, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// Command lists were handed to the queue (CPU side)
    Submit {
        /// Submission serial, starting at 1
        serial: u64,
        /// Lists in the batch
        lists: Vec<CommandListId>,
    },
    /// The GPU finished executing a submission
    Executed {
        /// Submission serial
        serial: u64,
        /// Barriers executed, in order
        barriers: Vec<(ResourceId, ResourceState, ResourceState)>,
        /// Indexed draws executed
        draws: u32,
    },
    /// The GPU reached a fence signal
    Signal {
        /// Fence
        fence: FenceId,
        /// Value written
        value: FenceValue,
    },
    /// A CPU wait on a fence returned
    Wait {
        /// Fence
        fence: FenceId,
        /// Value waited for
        value: FenceValue,
        /// Completed value when the wait returned
        observed: FenceValue,
    },
    /// The GPU flipped a back buffer to the screen
    Present {
        /// Ring index of the presented buffer
        index: u32,
        /// Presented buffer
        buffer: ResourceId,
    },
    /// A command allocator was reset (CPU side)
    AllocatorReset {
        /// Allocator
        allocator: CommandAllocatorId,
        /// Highest completed fence value at the time of the reset
        completed_fence: FenceValue,
    },
    /// The swap chain buffers were recreated (CPU side)
    ResizeBuffers {
        /// New width
        width: u32,
        /// New height
        height: u32,
        /// Buffers in the new ring
        buffer_count: u32,
    },
}

/// Read access to the simulated device from outside the renderer
#[derive(Clone)]
pub struct HeadlessProbe {
    pub(super) shared: Arc<Shared>,
}

impl HeadlessProbe {
    /// Snapshot of every event so far
    pub fn trace(&self) -> Vec<TraceEvent> {
        self.shared.state.lock().trace.clone()
    }

    /// Forget recorded events
    pub fn clear_trace(&self) {
        self.shared.state.lock().trace.clear();
    }

    /// Usage-rule violations detected so far
    pub fn violations(&self) -> Vec<String> {
        self.shared.state.lock().violations.clone()
    }

    /// State of a resource as of the last executed work
    pub fn resource_state(&self, resource: ResourceId) -> Option<ResourceState> {
        self.shared.state.lock().resource_states.get(&resource).copied()
    }

    /// Completed value of a fence
    pub fn completed_value(&self, fence: FenceId) -> Option<FenceValue> {
        self.shared.state.lock().fences.get(fence.index()).copied()
    }

    /// Make the next swap chain resize fail after the old buffers are gone
    pub fn fail_next_resize(&self, code: &str) {
        self.shared.state.lock().resize_failure = Some(code.to_string());
    }

    /// Simulate a driver reset; pending and future work fails
    pub fn remove_device(&self, reason: &str) {
        let mut state = self.shared.state.lock();
        log::warn!("Simulated device removal: {}", reason);
        state.removed = Some(reason.to_string());
        drop(state);
        self.shared.progress.notify_all();
    }
}

impl std::fmt::Debug for HeadlessProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessProbe").finish_non_exhaustive()
    }
}
