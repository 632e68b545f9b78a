//! Buffers and images with their device memory

use ash::{vk, Device};

use crate::render::backend::{BackendError, BackendResult, BufferUsage};

use super::api_error;
use super::context::PhysicalDeviceInfo;

/// Host-visible buffer, persistently mapped
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: *mut u8,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a buffer and copy `initial_data` into it
    pub fn new(
        device: &Device,
        physical: &PhysicalDeviceInfo,
        size: vk::DeviceSize,
        usage: BufferUsage,
        initial_data: &[u8],
    ) -> BackendResult<Self> {
        let usage = match usage {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsage::Constant => vk::BufferUsageFlags::UNIFORM_BUFFER,
        };
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&buffer_info, None) }.map_err(|e| api_error("vkCreateBuffer", e))?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory = match allocate(
            device,
            physical,
            requirements,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let mut this = Self {
            device: device.clone(),
            buffer,
            memory,
            mapped: std::ptr::null_mut(),
            size,
        };
        unsafe { device.bind_buffer_memory(buffer, memory, 0) }.map_err(|e| api_error("vkBindBufferMemory", e))?;
        let mapped = unsafe { device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()) }
            .map_err(|e| api_error("vkMapMemory", e))?;
        this.mapped = mapped.cast();
        this.write(0, initial_data)?;
        Ok(this)
    }

    /// Copy bytes into the mapping
    pub fn write(&mut self, offset: vk::DeviceSize, data: &[u8]) -> BackendResult<()> {
        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(BackendError::Validation(format!(
                "write of {}..{} past the end of a {} byte buffer",
                offset, end, self.size
            )));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.mapped.add(offset as usize), data.len());
        }
        Ok(())
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if !self.mapped.is_null() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Device-local 2D image with a view
pub struct Image {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    format: vk::Format,
    samples: vk::SampleCountFlags,
    aspect: vk::ImageAspectFlags,
}

impl Image {
    /// Create an attachment image
    pub fn new_attachment(
        device: &Device,
        physical: &PhysicalDeviceInfo,
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> BackendResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let image = unsafe { device.create_image(&image_info, None) }.map_err(|e| api_error("vkCreateImage", e))?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = match allocate(device, physical, requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut this = Self {
            device: device.clone(),
            image,
            memory,
            view: vk::ImageView::null(),
            format,
            samples,
            aspect,
        };
        unsafe { device.bind_image_memory(image, memory, 0) }.map_err(|e| api_error("vkBindImageMemory", e))?;
        this.view = create_view(device, image, format, aspect)?;
        Ok(this)
    }

    /// Image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// View handle
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Pixel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Samples per pixel
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    /// Aspects covered by barriers on this image
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Single-mip, single-layer 2D view
pub fn create_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> BackendResult<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(subresource_range(aspect));
    unsafe { device.create_image_view(&view_info, None) }.map_err(|e| api_error("vkCreateImageView", e))
}

/// Whole-image subresource range for `aspect`
pub fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn allocate(
    device: &Device,
    physical: &PhysicalDeviceInfo,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> BackendResult<vk::DeviceMemory> {
    let memory_type = physical.find_memory_type(requirements.memory_type_bits, properties)?;
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);
    unsafe { device.allocate_memory(&alloc_info, None) }.map_err(|e| api_error("vkAllocateMemory", e))
}
