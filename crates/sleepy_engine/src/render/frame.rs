//! Per-frame resources reused cyclically

use super::backend::{CommandAllocatorId, CommandListId, FenceValue, GpuBackend};
use super::device::Device;
use super::error::{RenderError, RenderResult};

/// Resources owned by one in-flight frame
#[derive(Debug, Clone)]
pub struct FrameSlot {
    /// Allocator backing this slot's command list
    pub allocator: CommandAllocatorId,
    /// The slot's command list
    pub list: CommandListId,
    /// Fence value of the slot's last submission (0 = never submitted)
    pub fence_value: FenceValue,
    /// First object-constant index owned by this slot
    pub first_object: u32,
}

/// Ring of frame slots, one per back buffer
#[derive(Debug)]
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    current: usize,
}

impl FrameRing {
    /// Create `count` slots, each owning `objects_per_slot` constant slots
    pub fn new<B: GpuBackend>(device: &mut Device<B>, count: u32, objects_per_slot: u32) -> RenderResult<Self> {
        let mut slots = Vec::with_capacity(count as usize);
        for index in 0..count {
            let allocator = device
                .backend_mut()
                .create_command_allocator()
                .map_err(|e| RenderError::Initialization(format!("command allocator {}: {}", index, e)))?;
            let list = device
                .backend_mut()
                .create_command_list(allocator)
                .map_err(|e| RenderError::Initialization(format!("command list {}: {}", index, e)))?;
            slots.push(FrameSlot {
                allocator,
                list,
                fence_value: 0,
                first_object: index * objects_per_slot,
            });
        }
        Ok(Self { slots, current: 0 })
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the ring has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index of the current slot
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Current slot
    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    /// Current slot, mutably
    pub fn current_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    /// Move to the next slot
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    /// All slots
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }
}
