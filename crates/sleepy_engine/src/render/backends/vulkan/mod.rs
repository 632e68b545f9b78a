//! Vulkan 1.3 implementation of the device layer
//!
//! Direct-queue concepts map onto Vulkan as follows: a command allocator is a
//! command pool, a fence is a timeline semaphore, resource states are image
//! layouts, a descriptor heap is a descriptor pool of single-buffer sets and a
//! root signature is a pipeline layout.

mod backend;
mod commands;
mod context;
mod pipeline;
mod resources;
mod swapchain;
mod sync;

pub use backend::VulkanBackend;

use ash::vk;

use crate::render::backend::{BackendError, BackendResult, PixelFormat};

/// Map a failed Vulkan call to a backend error
pub(crate) fn api_error(call: &'static str, result: vk::Result) -> BackendError {
    if result == vk::Result::ERROR_DEVICE_LOST {
        BackendError::DeviceLost
    } else {
        BackendError::Api {
            call,
            code: format!("{:?}", result),
        }
    }
}

fn pixel_format(format: PixelFormat) -> vk::Format {
    match format {
        PixelFormat::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
        PixelFormat::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
        PixelFormat::B8G8R8A8Srgb => vk::Format::B8G8R8A8_SRGB,
    }
}

fn sample_count_flags(count: u32) -> BackendResult<vk::SampleCountFlags> {
    Ok(match count {
        1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        other => return Err(BackendError::Unsupported(format!("{} samples", other))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_is_distinguished() {
        assert_eq!(
            api_error("vkQueueSubmit", vk::Result::ERROR_DEVICE_LOST),
            BackendError::DeviceLost
        );
        assert!(matches!(
            api_error("vkQueueSubmit", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            BackendError::Api { call: "vkQueueSubmit", .. }
        ));
    }

    #[test]
    fn test_sample_counts() {
        assert_eq!(sample_count_flags(4), Ok(vk::SampleCountFlags::TYPE_4));
        assert!(sample_count_flags(3).is_err());
    }
}
