//! Synchronization primitives with RAII cleanup

use ash::{vk, Device};

use crate::render::backend::BackendResult;

use super::api_error;

/// Binary semaphore for GPU-GPU ordering (acquire and present)
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create an unsignaled binary semaphore
    pub fn new(device: &Device) -> BackendResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore =
            unsafe { device.create_semaphore(&create_info, None) }.map_err(|e| api_error("vkCreateSemaphore", e))?;
        Ok(Self {
            device: device.clone(),
            semaphore,
        })
    }

    /// Semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Timeline semaphore used as the queue fence
pub struct TimelineFence {
    device: Device,
    semaphore: vk::Semaphore,
}

impl TimelineFence {
    /// Create a timeline starting at `initial_value`
    pub fn new(device: &Device, initial_value: u64) -> BackendResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);
        let semaphore =
            unsafe { device.create_semaphore(&create_info, None) }.map_err(|e| api_error("vkCreateSemaphore", e))?;
        Ok(Self {
            device: device.clone(),
            semaphore,
        })
    }

    /// Semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Value the GPU has reached
    pub fn completed_value(&self) -> BackendResult<u64> {
        unsafe { self.device.get_semaphore_counter_value(self.semaphore) }
            .map_err(|e| api_error("vkGetSemaphoreCounterValue", e))
    }

    /// Block the calling thread until the timeline reaches `value`
    pub fn wait(&self, value: u64) -> BackendResult<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.device.wait_semaphores(&wait_info, u64::MAX) }.map_err(|e| api_error("vkWaitSemaphores", e))
    }
}

impl Drop for TimelineFence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}
