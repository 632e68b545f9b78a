//! [`GpuBackend`] on a Vulkan 1.3 device presenting to a GLFW window

use std::collections::HashMap;

use ash::{vk, Device};
use parking_lot::Mutex;

use crate::config::RendererConfig;
use crate::render::backend::{
    BackendError, BackendResult, BufferDesc, CommandAllocatorId, CommandListId, DepthBufferDesc, DepthFormat,
    DescriptorHeapDesc, DescriptorHeapId, FenceId, FenceValue, GpuBackend, GpuCommand, PipelineStateDesc,
    PipelineStateId, PixelFormat, QueueId, ResourceId, RootSignatureDesc, RootSignatureId, SwapChainDesc,
};
use crate::window::GlfwWindow;

use super::commands::{CommandAllocator, CommandList};
use super::context::{LogicalDevice, PhysicalDeviceInfo, VulkanInstance, VulkanSurface};
use super::pipeline::{ConstantBufferSetLayout, DescriptorHeap, GraphicsPipeline, RootSignature};
use super::resources::{Buffer, Image};
use super::swapchain::Swapchain;
use super::sync::TimelineFence;
use super::{api_error, pixel_format, sample_count_flags};

/// Resource table entry
pub(super) enum VkResource {
    /// Swapchain image by index; ids survive swapchain recreation
    BackBuffer(u32),
    /// Owned attachment image
    Image {
        image: Image,
        extent: vk::Extent2D,
        /// Whether a barrier has given the image a defined layout
        initialized: bool,
    },
    /// Host-visible buffer
    Buffer(Buffer),
}

/// Vulkan device bound to one window surface
///
/// Fields drop in declaration order: everything created from the logical
/// device goes before it, and the surface goes before the instance.
pub struct VulkanBackend {
    pub(super) lists: Vec<CommandList>,
    allocators: Vec<CommandAllocator>,
    pipelines: Vec<GraphicsPipeline>,
    pub(super) root_signatures: HashMap<RootSignatureId, RootSignature>,
    pub(super) heaps: HashMap<DescriptorHeapId, DescriptorHeap>,
    pub(super) resources: HashMap<ResourceId, VkResource>,
    swapchain: Option<Swapchain>,
    fences: Vec<TimelineFence>,
    cbv_layout: ConstantBufferSetLayout,
    lost: Mutex<Option<String>>,
    queue_created: bool,
    back_buffers: Vec<ResourceId>,
    next_resource: u32,
    next_heap: u32,
    next_root_signature: u32,
    depth_format: vk::Format,
    device: LogicalDevice,
    physical: PhysicalDeviceInfo,
    surface: VulkanSurface,
    instance: VulkanInstance,
}

impl VulkanBackend {
    /// Create instance, surface and device for `window`
    pub fn new(window: &mut GlfwWindow, config: &RendererConfig) -> BackendResult<Self> {
        let instance = VulkanInstance::new(window, window.title(), config.validation)?;
        let surface = VulkanSurface::new(&instance, window)?;
        let physical = PhysicalDeviceInfo::select(&instance.instance, &surface)?;
        let device = LogicalDevice::new(&instance.instance, &physical)?;
        let cbv_layout = ConstantBufferSetLayout::new(&device.device)?;

        log::info!(
            "Vulkan device ready: {} (validation {})",
            physical.name(),
            if instance.validation_enabled() { "on" } else { "off" }
        );

        Ok(Self {
            lists: Vec::new(),
            allocators: Vec::new(),
            pipelines: Vec::new(),
            root_signatures: HashMap::new(),
            heaps: HashMap::new(),
            resources: HashMap::new(),
            swapchain: None,
            fences: Vec::new(),
            cbv_layout,
            lost: Mutex::new(None),
            queue_created: false,
            back_buffers: Vec::new(),
            next_resource: 0,
            next_heap: 0,
            next_root_signature: 0,
            depth_format: vk::Format::UNDEFINED,
            device,
            physical,
            surface,
            instance,
        })
    }

    pub(super) fn device(&self) -> &Device {
        &self.device.device
    }

    pub(super) fn swapchain(&self) -> BackendResult<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| BackendError::Validation("no swapchain has been created".to_string()))
    }

    pub(super) fn swapchain_mut(&mut self) -> BackendResult<&mut Swapchain> {
        self.swapchain
            .as_mut()
            .ok_or_else(|| BackendError::Validation("no swapchain has been created".to_string()))
    }

    pub(super) fn pipeline(&self, id: PipelineStateId) -> BackendResult<vk::Pipeline> {
        self.pipelines
            .get(id.index())
            .map(GraphicsPipeline::handle)
            .ok_or(BackendError::UnknownHandle {
                kind: "pipeline state",
                id: id.0,
            })
    }

    pub(super) fn buffer(&self, id: ResourceId) -> BackendResult<&Buffer> {
        match self.resources.get(&id) {
            Some(VkResource::Buffer(buffer)) => Ok(buffer),
            Some(_) => Err(BackendError::Validation(format!("{:?} is not a buffer", id))),
            None => Err(BackendError::UnknownHandle {
                kind: "resource",
                id: id.0,
            }),
        }
    }

    pub(super) fn depth_has_stencil(&self) -> bool {
        matches!(
            self.depth_format,
            vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
        )
    }

    pub(super) fn depth_aspect(&self) -> vk::ImageAspectFlags {
        if self.depth_has_stencil() {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    }

    /// Record a lost device the first time a call reports it
    fn track<T>(&self, call: &str, result: BackendResult<T>) -> BackendResult<T> {
        if let Err(BackendError::DeviceLost) = &result {
            let mut lost = self.lost.lock();
            if lost.is_none() {
                log::error!("Vulkan device lost during {}", call);
                *lost = Some(format!("VK_ERROR_DEVICE_LOST during {}", call));
            }
        }
        result
    }

    fn ensure_alive(&self) -> BackendResult<()> {
        if self.lost.lock().is_some() {
            Err(BackendError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn check_queue(&self, queue: QueueId) -> BackendResult<()> {
        if self.queue_created && queue.0 == 0 {
            Ok(())
        } else {
            Err(BackendError::UnknownHandle { kind: "queue", id: queue.0 })
        }
    }

    fn fence(&self, fence: FenceId) -> BackendResult<&TimelineFence> {
        self.fences
            .get(fence.index())
            .ok_or(BackendError::UnknownHandle { kind: "fence", id: fence.0 })
    }

    fn list_index(&self, list: CommandListId) -> BackendResult<usize> {
        if list.index() < self.lists.len() {
            Ok(list.index())
        } else {
            Err(BackendError::UnknownHandle {
                kind: "command list",
                id: list.0,
            })
        }
    }

    fn allocate_id(&mut self, resource: VkResource) -> ResourceId {
        let id = ResourceId(self.next_resource);
        self.next_resource += 1;
        self.resources.insert(id, resource);
        id
    }

    /// Depth format the device supports as an attachment, falling back to a 32-bit one
    fn resolve_depth_format(&self, format: DepthFormat) -> vk::Format {
        let preferred = match format {
            DepthFormat::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
            DepthFormat::D32Float => vk::Format::D32_SFLOAT,
        };
        let supported = |candidate: vk::Format| {
            let properties = unsafe {
                self.instance
                    .instance
                    .get_physical_device_format_properties(self.physical.device, candidate)
            };
            properties
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        };
        if supported(preferred) {
            preferred
        } else {
            log::warn!("{:?} not supported as depth attachment, using D32_SFLOAT_S8_UINT", preferred);
            vk::Format::D32_SFLOAT_S8_UINT
        }
    }

    /// Submit with binary semaphores only
    fn submit(
        &self,
        buffers: &[vk::CommandBuffer],
        wait: Option<vk::Semaphore>,
        signal: Option<vk::Semaphore>,
    ) -> BackendResult<()> {
        let wait_semaphores: Vec<vk::Semaphore> = wait.into_iter().collect();
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphores.len()];
        let signal_semaphores: Vec<vk::Semaphore> = signal.into_iter().collect();
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores)
            .build();
        let result = unsafe {
            self.device()
                .queue_submit(self.device.queue, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| api_error("vkQueueSubmit", e));
        self.track("vkQueueSubmit", result)
    }

    /// Build a new swapchain from the current one and rebind back buffer ids
    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> BackendResult<()> {
        let old = self.swapchain.take();
        let Some(old) = old else {
            return Err(BackendError::Validation("no swapchain has been created".to_string()));
        };
        let result = unsafe { self.device().device_wait_idle() }.map_err(|e| api_error("vkDeviceWaitIdle", e));
        self.track("vkDeviceWaitIdle", result)?;

        let image_count = old.image_count();
        let swapchain = Swapchain::new(
            &self.device.device,
            &self.device.swapchain_loader,
            &self.physical,
            &self.surface,
            extent,
            image_count,
            old.format(),
            old.msaa_target(0).map_or(vk::SampleCountFlags::TYPE_1, Image::samples),
            Some(&old),
        )?;
        drop(old);

        if swapchain.image_count() != image_count {
            return Err(BackendError::Initialization(format!(
                "swapchain recreated with {} images instead of {}",
                swapchain.image_count(),
                image_count
            )));
        }
        self.swapchain = Some(swapchain);
        Ok(())
    }
}

impl GpuBackend for VulkanBackend {
    fn adapter_name(&self) -> String {
        self.physical.name()
    }

    fn device_removed_reason(&self) -> Option<String> {
        self.lost.lock().clone()
    }

    fn create_command_queue(&mut self) -> BackendResult<QueueId> {
        self.ensure_alive()?;
        if self.queue_created {
            return Err(BackendError::Unsupported("only one direct queue is exposed".to_string()));
        }
        self.queue_created = true;
        Ok(QueueId(0))
    }

    fn create_fence(&mut self, initial_value: FenceValue) -> BackendResult<FenceId> {
        self.ensure_alive()?;
        let fence = TimelineFence::new(self.device(), initial_value)?;
        let id = FenceId(self.fences.len() as u32);
        self.fences.push(fence);
        Ok(id)
    }

    fn execute_command_lists(&mut self, queue: QueueId, lists: &[CommandListId]) -> BackendResult<()> {
        self.ensure_alive()?;
        self.check_queue(queue)?;

        let mut buffers = Vec::with_capacity(lists.len());
        let mut touches_back_buffer = false;
        for &id in lists {
            let list = &self.lists[self.list_index(id)?];
            if list.open {
                return Err(BackendError::Validation(format!("{:?} executed while still open", id)));
            }
            touches_back_buffer |= list.touches_back_buffer;
            buffers.push(list.buffer);
        }

        let (wait, signal) = match self.swapchain.as_mut() {
            Some(swapchain) if touches_back_buffer => {
                let wait = swapchain.take_pending_acquire();
                let signal = if swapchain.render_signaled() {
                    None
                } else {
                    Some(swapchain.render_finished_semaphore())
                };
                (wait, signal)
            }
            _ => (None, None),
        };
        self.submit(&buffers, wait, signal)
    }

    fn signal(&mut self, queue: QueueId, fence: FenceId, value: FenceValue) -> BackendResult<()> {
        self.ensure_alive()?;
        self.check_queue(queue)?;
        let semaphores = [self.fence(fence)?.handle()];
        let values = [value];
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&values);
        let submit_info = vk::SubmitInfo::builder()
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline_info)
            .build();
        let result = unsafe {
            self.device()
                .queue_submit(self.device.queue, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| api_error("vkQueueSubmit", e));
        self.track("vkQueueSubmit (signal)", result)
    }

    fn fence_completed_value(&self, fence: FenceId) -> BackendResult<FenceValue> {
        let result = self.fence(fence)?.completed_value();
        self.track("vkGetSemaphoreCounterValue", result)
    }

    fn wait_for_fence(&self, fence: FenceId, value: FenceValue) -> BackendResult<()> {
        let result = self.fence(fence)?.wait(value);
        self.track("vkWaitSemaphores", result)
    }

    fn create_command_allocator(&mut self) -> BackendResult<CommandAllocatorId> {
        self.ensure_alive()?;
        let allocator = CommandAllocator::new(self.device(), self.device.queue_family)?;
        let id = CommandAllocatorId(self.allocators.len() as u32);
        self.allocators.push(allocator);
        Ok(id)
    }

    fn create_command_list(&mut self, allocator: CommandAllocatorId) -> BackendResult<CommandListId> {
        self.ensure_alive()?;
        let buffer = self
            .allocators
            .get(allocator.index())
            .ok_or(BackendError::UnknownHandle {
                kind: "command allocator",
                id: allocator.0,
            })?
            .allocate()?;
        let id = CommandListId(self.lists.len() as u32);
        self.lists.push(CommandList::new(buffer, allocator));
        Ok(id)
    }

    fn reset_command_allocator(&mut self, allocator: CommandAllocatorId) -> BackendResult<()> {
        self.ensure_alive()?;
        if let Some(list) = self.lists.iter().find(|list| list.allocator == allocator && list.open) {
            return Err(BackendError::Validation(format!(
                "{:?} reset while a list is recording ({:?})",
                allocator, list.buffer
            )));
        }
        let result = self
            .allocators
            .get(allocator.index())
            .ok_or(BackendError::UnknownHandle {
                kind: "command allocator",
                id: allocator.0,
            })?
            .reset();
        self.track("vkResetCommandPool", result)
    }

    fn reset_command_list(
        &mut self,
        list: CommandListId,
        allocator: CommandAllocatorId,
        initial_pipeline: Option<PipelineStateId>,
    ) -> BackendResult<()> {
        self.ensure_alive()?;
        let index = self.list_index(list)?;
        let record = &self.lists[index];
        if record.open {
            return Err(BackendError::Validation(format!("{:?} reset while open", list)));
        }
        if record.allocator != allocator {
            return Err(BackendError::Unsupported(format!(
                "{:?} belongs to {:?}; command buffers cannot move between pools",
                list, record.allocator
            )));
        }
        let initial = initial_pipeline.map(|id| self.pipeline(id)).transpose()?;

        self.begin(index)?;
        self.lists[index].open = true;
        if let Some(pipeline) = initial {
            let buffer = self.lists[index].buffer;
            unsafe {
                self.device()
                    .cmd_bind_pipeline(buffer, vk::PipelineBindPoint::GRAPHICS, pipeline)
            };
        }
        Ok(())
    }

    fn record(&mut self, list: CommandListId, command: &GpuCommand) -> BackendResult<()> {
        let index = self.list_index(list)?;
        if !self.lists[index].open {
            return Err(BackendError::Validation(format!("{:?} recorded into while closed", list)));
        }
        self.encode(index, command)
    }

    fn close_command_list(&mut self, list: CommandListId) -> BackendResult<()> {
        let index = self.list_index(list)?;
        if !self.lists[index].open {
            return Err(BackendError::Validation(format!("{:?} closed twice", list)));
        }
        self.lists[index].open = false;
        self.finish(index)
    }

    fn multisample_quality_levels(&self, _format: PixelFormat, sample_count: u32) -> BackendResult<u32> {
        let Ok(flags) = sample_count_flags(sample_count) else {
            return Ok(0);
        };
        let limits = &self.physical.properties.limits;
        let supported = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
        Ok(u32::from(supported.contains(flags)))
    }

    fn create_swap_chain(&mut self, queue: QueueId, desc: &SwapChainDesc) -> BackendResult<Vec<ResourceId>> {
        self.ensure_alive()?;
        self.check_queue(queue)?;
        if self.swapchain.is_some() {
            return Err(BackendError::Validation("swap chain created twice".to_string()));
        }
        let swapchain = Swapchain::new(
            &self.device.device,
            &self.device.swapchain_loader,
            &self.physical,
            &self.surface,
            vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
            desc.buffer_count,
            pixel_format(desc.format),
            sample_count_flags(desc.sample.count)?,
            None,
        )?;
        if swapchain.image_count() != desc.buffer_count {
            return Err(BackendError::Initialization(format!(
                "surface provided {} swapchain images, {} requested",
                swapchain.image_count(),
                desc.buffer_count
            )));
        }
        self.back_buffers = (0..swapchain.image_count())
            .map(|index| self.allocate_id(VkResource::BackBuffer(index)))
            .collect();
        self.swapchain = Some(swapchain);
        Ok(self.back_buffers.clone())
    }

    fn resize_swap_chain(&mut self, width: u32, height: u32) -> BackendResult<Vec<ResourceId>> {
        self.ensure_alive()?;
        self.recreate_swapchain(vk::Extent2D { width, height })?;
        Ok(self.back_buffers.clone())
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.swapchain.as_ref().map_or(0, Swapchain::current_index)
    }

    fn present(&mut self, queue: QueueId) -> BackendResult<()> {
        self.ensure_alive()?;
        self.check_queue(queue)?;

        let swapchain = self.swapchain_mut()?;
        if !swapchain.render_signaled() {
            // Nothing rendered to this image; still chain acquire to present
            let wait = swapchain.take_pending_acquire();
            let signal = swapchain.render_finished_semaphore();
            self.submit(&[], wait, Some(signal))?;
        }

        let queue = self.device.queue;
        let swapchain = self.swapchain_mut()?;
        let result = swapchain.present(queue);
        let mut out_of_date = self.track("vkQueuePresentKHR", result)?;
        if !out_of_date {
            let result = self.swapchain_mut()?.acquire();
            out_of_date = !self.track("vkAcquireNextImageKHR", result)?;
        }
        if out_of_date {
            log::info!("Swapchain out of date, recreating");
            let extent = self.swapchain()?.extent();
            self.recreate_swapchain(extent)?;
        }
        Ok(())
    }

    fn create_depth_buffer(&mut self, desc: &DepthBufferDesc) -> BackendResult<ResourceId> {
        self.ensure_alive()?;
        let format = self.resolve_depth_format(desc.format);
        self.depth_format = format;
        let extent = vk::Extent2D {
            width: desc.width,
            height: desc.height,
        };
        let image = Image::new_attachment(
            self.device(),
            &self.physical,
            extent,
            format,
            sample_count_flags(desc.sample.count)?,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            self.depth_aspect(),
        )?;
        Ok(self.allocate_id(VkResource::Image {
            image,
            extent,
            initialized: false,
        }))
    }

    fn create_buffer(&mut self, desc: &BufferDesc, initial_data: &[u8]) -> BackendResult<ResourceId> {
        self.ensure_alive()?;
        let buffer = Buffer::new(self.device(), &self.physical, desc.size, desc.usage, initial_data)?;
        Ok(self.allocate_id(VkResource::Buffer(buffer)))
    }

    fn write_buffer(&mut self, buffer: ResourceId, offset: u64, data: &[u8]) -> BackendResult<()> {
        match self.resources.get_mut(&buffer) {
            Some(VkResource::Buffer(target)) => target.write(offset, data),
            Some(_) => Err(BackendError::Validation(format!("{:?} is not a buffer", buffer))),
            None => Err(BackendError::UnknownHandle {
                kind: "resource",
                id: buffer.0,
            }),
        }
    }

    fn create_descriptor_heap(&mut self, desc: &DescriptorHeapDesc) -> BackendResult<DescriptorHeapId> {
        self.ensure_alive()?;
        let heap = DescriptorHeap::new(self.device(), &self.cbv_layout, desc.count)?;
        let id = DescriptorHeapId(self.next_heap);
        self.next_heap += 1;
        self.heaps.insert(id, heap);
        Ok(id)
    }

    fn create_constant_buffer_view(
        &mut self,
        heap: DescriptorHeapId,
        index: u32,
        buffer: ResourceId,
        offset: u64,
        size: u64,
    ) -> BackendResult<()> {
        let handle = self.buffer(buffer)?.handle();
        self.heaps
            .get(&heap)
            .ok_or(BackendError::UnknownHandle {
                kind: "descriptor heap",
                id: heap.0,
            })?
            .write_constant_buffer(index, handle, offset, size)
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> BackendResult<RootSignatureId> {
        self.ensure_alive()?;
        let signature = RootSignature::new(self.device(), desc, &self.cbv_layout)?;
        let id = RootSignatureId(self.next_root_signature);
        self.next_root_signature += 1;
        self.root_signatures.insert(id, signature);
        Ok(id)
    }

    fn create_pipeline_state(&mut self, desc: &PipelineStateDesc) -> BackendResult<PipelineStateId> {
        self.ensure_alive()?;
        let layout = self
            .root_signatures
            .get(&desc.root_signature)
            .ok_or(BackendError::UnknownHandle {
                kind: "root signature",
                id: desc.root_signature.0,
            })?;
        // The surface may not offer the requested format; render in the one it gave us
        let color_format = self
            .swapchain
            .as_ref()
            .map_or_else(|| pixel_format(desc.render_target_format), Swapchain::format);
        let depth_format = self.resolve_depth_format(desc.depth_format);
        let has_stencil = depth_format != vk::Format::D32_SFLOAT;
        let pipeline = GraphicsPipeline::new(
            self.device(),
            desc,
            layout,
            color_format,
            depth_format,
            has_stencil,
            sample_count_flags(desc.sample.count)?,
        )?;
        let id = PipelineStateId(self.pipelines.len() as u32);
        self.pipelines.push(pipeline);
        Ok(id)
    }

    fn release_resource(&mut self, resource: ResourceId) {
        match self.resources.get(&resource) {
            Some(VkResource::BackBuffer(_)) => {
                log::warn!("Ignoring release of swapchain image {:?}", resource);
            }
            Some(_) => {
                self.resources.remove(&resource);
            }
            None => log::warn!("Release of unknown resource {:?}", resource),
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
        }
    }
}
