//! Vulkan swapchain with per-image views, MSAA targets and semaphores
//!
//! The next image is acquired right after every present (and after
//! creation), so the current index is always known before recording starts,
//! matching the flip-model ring the renderer expects.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use crate::render::backend::{BackendError, BackendResult};

use super::api_error;
use super::context::{PhysicalDeviceInfo, VulkanSurface};
use super::resources::{self, Image};
use super::sync::Semaphore;

/// Swapchain and everything that lives exactly as long as its images
pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    msaa_targets: Vec<Image>,
    format: vk::Format,
    extent: vk::Extent2D,
    /// Whether an image has been written since creation (its layout is defined)
    initialized: Vec<bool>,
    acquire_semaphores: Vec<Semaphore>,
    render_finished: Vec<Semaphore>,
    next_acquire: usize,
    current: u32,
    /// Acquire semaphore not yet waited on by a submission
    pending_acquire: Option<vk::Semaphore>,
    /// Whether `render_finished[current]` has been signaled
    render_signaled: bool,
}

impl Swapchain {
    /// Create the swapchain and acquire its first image
    pub fn new(
        device: &Device,
        loader: &SwapchainLoader,
        physical: &PhysicalDeviceInfo,
        surface: &VulkanSurface,
        requested_extent: vk::Extent2D,
        image_count: u32,
        preferred_format: vk::Format,
        samples: vk::SampleCountFlags,
        old: Option<&Swapchain>,
    ) -> BackendResult<Self> {
        let caps = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(physical.device, surface.surface)
        }
        .map_err(|e| api_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", e))?;

        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(physical.device, surface.surface)
        }
        .map_err(|e| api_error("vkGetPhysicalDeviceSurfaceFormatsKHR", e))?;
        let format = formats
            .iter()
            .find(|sf| sf.format == preferred_format)
            .or_else(|| formats.first())
            .copied()
            .ok_or_else(|| BackendError::Unsupported("surface has no formats".to_string()))?;
        if format.format != preferred_format {
            log::warn!(
                "Surface does not support {:?}, using {:?}",
                preferred_format,
                format.format
            );
        }

        let present_modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(physical.device, surface.surface)
        }
        .map_err(|e| api_error("vkGetPhysicalDeviceSurfacePresentModesKHR", e))?;
        let present_mode = present_modes
            .iter()
            .copied()
            .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO);

        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: requested_extent
                    .width
                    .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: requested_extent
                    .height
                    .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };

        let max_images = if caps.max_image_count > 0 { caps.max_image_count } else { u32::MAX };
        let min_image_count = image_count.clamp(caps.min_image_count, max_images);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(min_image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |old| old.swapchain));

        let swapchain =
            unsafe { loader.create_swapchain(&create_info, None) }.map_err(|e| api_error("vkCreateSwapchainKHR", e))?;

        let mut this = Self {
            device: device.clone(),
            loader: loader.clone(),
            swapchain,
            images: Vec::new(),
            views: Vec::new(),
            msaa_targets: Vec::new(),
            format: format.format,
            extent,
            initialized: Vec::new(),
            acquire_semaphores: Vec::new(),
            render_finished: Vec::new(),
            next_acquire: 0,
            current: 0,
            pending_acquire: None,
            render_signaled: false,
        };

        this.images =
            unsafe { loader.get_swapchain_images(swapchain) }.map_err(|e| api_error("vkGetSwapchainImagesKHR", e))?;
        for &image in &this.images {
            let view = resources::create_view(device, image, format.format, vk::ImageAspectFlags::COLOR)?;
            this.views.push(view);
            this.render_finished.push(Semaphore::new(device)?);
            if samples != vk::SampleCountFlags::TYPE_1 {
                this.msaa_targets.push(Image::new_attachment(
                    device,
                    physical,
                    extent,
                    format.format,
                    samples,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                    vk::ImageAspectFlags::COLOR,
                )?);
            }
        }
        this.initialized = vec![false; this.images.len()];
        for _ in 0..=this.images.len() {
            this.acquire_semaphores.push(Semaphore::new(device)?);
        }

        log::info!(
            "Vulkan swapchain: {} images {:?} {}x{} ({:?})",
            this.images.len(),
            this.format,
            extent.width,
            extent.height,
            present_mode
        );

        if !this.acquire()? {
            return Err(api_error("vkAcquireNextImageKHR", vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
        Ok(this)
    }

    /// Acquire the next image; its semaphore is waited by the next submission touching it
    ///
    /// Returns `false` when the swapchain is out of date and must be recreated.
    pub fn acquire(&mut self) -> BackendResult<bool> {
        let semaphore = self.acquire_semaphores[self.next_acquire].handle();
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Swapchain is suboptimal for the surface");
                }
                self.next_acquire = (self.next_acquire + 1) % self.acquire_semaphores.len();
                self.current = index;
                self.pending_acquire = Some(semaphore);
                self.render_signaled = false;
                Ok(true)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(false),
            Err(e) => Err(api_error("vkAcquireNextImageKHR", e)),
        }
    }

    /// Queue the current image for presentation
    ///
    /// Returns `true` when the swapchain no longer matches the surface.
    pub fn present(&mut self, queue: vk::Queue) -> BackendResult<bool> {
        let wait = [self.render_finished[self.current as usize].handle()];
        let swapchains = [self.swapchain];
        let indices = [self.current];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(api_error("vkQueuePresentKHR", e)),
        }
    }

    /// Take the acquire semaphore if nothing has waited on it yet
    pub fn take_pending_acquire(&mut self) -> Option<vk::Semaphore> {
        self.pending_acquire.take()
    }

    /// Semaphore to signal once rendering to the current image is submitted
    pub fn render_finished_semaphore(&mut self) -> vk::Semaphore {
        self.render_signaled = true;
        self.render_finished[self.current as usize].handle()
    }

    /// Whether present can wait on `render_finished` for the current image
    pub fn render_signaled(&self) -> bool {
        self.render_signaled
    }

    /// Index of the acquired image
    pub fn current_index(&self) -> u32 {
        self.current
    }

    /// Number of images
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Image handle by index
    pub fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    /// View of an image
    pub fn view(&self, index: u32) -> vk::ImageView {
        self.views[index as usize]
    }

    /// Multisampled render target paired with an image
    pub fn msaa_target(&self, index: u32) -> Option<&Image> {
        self.msaa_targets.get(index as usize)
    }

    /// Mark an image as having a defined layout; returns the previous flag
    pub fn mark_initialized(&mut self, index: u32) -> bool {
        std::mem::replace(&mut self.initialized[index as usize], true)
    }

    /// Image format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
