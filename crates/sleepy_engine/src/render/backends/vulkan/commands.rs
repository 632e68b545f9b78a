//! Command pools, command buffers and translation of recorded commands
//!
//! Clears are deferred: a clear is remembered and folded into the load op of
//! the next `vkCmdBeginRendering` that binds the cleared target. If rendering to
//! that target is already active, `vkCmdClearAttachments` is used instead.

use ash::{vk, Device};

use crate::render::backend::{
    BackendError, BackendResult, CommandAllocatorId, GpuCommand, IndexFormat, PrimitiveTopology, ResourceId,
    ResourceState,
};

use super::api_error;
use super::backend::{VkResource, VulkanBackend};
use super::resources::subresource_range;

/// Command pool backing one frame slot
pub struct CommandAllocator {
    device: Device,
    pool: vk::CommandPool,
}

impl CommandAllocator {
    /// Create a pool on the queue family
    pub fn new(device: &Device, queue_family: u32) -> BackendResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        let pool = unsafe { device.create_command_pool(&create_info, None) }
            .map_err(|e| api_error("vkCreateCommandPool", e))?;
        Ok(Self {
            device: device.clone(),
            pool,
        })
    }

    /// Allocate one primary command buffer
    pub fn allocate(&self) -> BackendResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| api_error("vkAllocateCommandBuffers", e))?;
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Initialization("no command buffer allocated".to_string()))
    }

    /// Return every command buffer of the pool to the initial state
    pub fn reset(&self) -> BackendResult<()> {
        unsafe {
            self.device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(|e| api_error("vkResetCommandPool", e))
    }
}

impl Drop for CommandAllocator {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Recording state of one command buffer
pub struct CommandList {
    /// Buffer handle
    pub buffer: vk::CommandBuffer,
    /// Pool the buffer was allocated from
    pub allocator: CommandAllocatorId,
    /// Between reset and close
    pub open: bool,
    /// Whether the recorded work writes a swapchain image
    pub touches_back_buffer: bool,
    rendering: Option<(ResourceId, Option<ResourceId>)>,
    pending_color_clear: Option<(ResourceId, [f32; 4])>,
    pending_depth_clear: Option<(ResourceId, f32, u8)>,
    layout: vk::PipelineLayout,
}

impl CommandList {
    /// A closed list
    pub fn new(buffer: vk::CommandBuffer, allocator: CommandAllocatorId) -> Self {
        Self {
            buffer,
            allocator,
            open: false,
            touches_back_buffer: false,
            rendering: None,
            pending_color_clear: None,
            pending_depth_clear: None,
            layout: vk::PipelineLayout::null(),
        }
    }

    fn reset_state(&mut self) {
        self.touches_back_buffer = false;
        self.rendering = None;
        self.pending_color_clear = None;
        self.pending_depth_clear = None;
        self.layout = vk::PipelineLayout::null();
    }
}

/// Image layout, access and pipeline stage for a usage state
pub fn state_access(state: ResourceState) -> (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags) {
    match state {
        ResourceState::Common => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
        ),
        ResourceState::Present => (
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        ResourceState::RenderTarget => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        ResourceState::DepthWrite => (
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        ResourceState::GenericRead => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
    }
}

/// Attachment view and layout used when a resource is bound as a target
struct Target {
    view: vk::ImageView,
    extent: vk::Extent2D,
    resolve: Option<vk::ImageView>,
    layout: vk::ImageLayout,
}

impl VulkanBackend {
    /// Translate and record one command
    pub(super) fn encode(&mut self, list_index: usize, command: &GpuCommand) -> BackendResult<()> {
        let buffer = self.lists[list_index].buffer;
        match command {
            GpuCommand::ResourceBarrier { resource, before, after } => {
                self.end_rendering(list_index);
                self.encode_barrier(list_index, *resource, *before, *after)?;
            }
            GpuCommand::SetViewport(viewport) => {
                let viewports = [vk::Viewport {
                    x: viewport.x,
                    y: viewport.y,
                    width: viewport.width,
                    height: viewport.height,
                    min_depth: viewport.min_depth,
                    max_depth: viewport.max_depth,
                }];
                unsafe { self.device().cmd_set_viewport(buffer, 0, &viewports) };
            }
            GpuCommand::SetScissorRect(rect) => {
                let scissors = [vk::Rect2D {
                    offset: vk::Offset2D {
                        x: rect.left,
                        y: rect.top,
                    },
                    extent: vk::Extent2D {
                        width: (rect.right - rect.left).max(0) as u32,
                        height: (rect.bottom - rect.top).max(0) as u32,
                    },
                }];
                unsafe { self.device().cmd_set_scissor(buffer, 0, &scissors) };
            }
            GpuCommand::ClearRenderTarget { target, color } => {
                let list = &mut self.lists[list_index];
                if matches!(list.rendering, Some((bound, _)) if bound == *target) {
                    self.clear_bound_attachment(
                        list_index,
                        vk::ImageAspectFlags::COLOR,
                        vk::ClearValue {
                            color: vk::ClearColorValue { float32: *color },
                        },
                    );
                } else {
                    list.pending_color_clear = Some((*target, *color));
                }
            }
            GpuCommand::ClearDepthStencil { target, depth, stencil } => {
                let list = &mut self.lists[list_index];
                if matches!(list.rendering, Some((_, Some(bound))) if bound == *target) {
                    let aspect = self.depth_aspect();
                    self.clear_bound_attachment(
                        list_index,
                        aspect,
                        vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: *depth,
                                stencil: u32::from(*stencil),
                            },
                        },
                    );
                } else {
                    list.pending_depth_clear = Some((*target, *depth, *stencil));
                }
            }
            GpuCommand::SetRenderTargets { color, depth } => {
                self.end_rendering(list_index);
                self.begin_rendering(list_index, *color, *depth)?;
            }
            GpuCommand::SetDescriptorHeap(heap) => {
                if !self.heaps.contains_key(heap) {
                    return Err(BackendError::UnknownHandle {
                        kind: "descriptor heap",
                        id: heap.0,
                    });
                }
            }
            GpuCommand::SetRootSignature(id) => {
                let layout = self
                    .root_signatures
                    .get(id)
                    .ok_or(BackendError::UnknownHandle {
                        kind: "root signature",
                        id: id.0,
                    })?
                    .handle();
                self.lists[list_index].layout = layout;
            }
            GpuCommand::SetPipelineState(id) => {
                let pipeline = self.pipeline(*id)?;
                unsafe {
                    self.device()
                        .cmd_bind_pipeline(buffer, vk::PipelineBindPoint::GRAPHICS, pipeline)
                };
            }
            GpuCommand::SetRootDescriptorTable { parameter, heap, index } => {
                let layout = self.lists[list_index].layout;
                if layout == vk::PipelineLayout::null() {
                    return Err(BackendError::Validation(
                        "descriptor table set before a root signature".to_string(),
                    ));
                }
                let set = self
                    .heaps
                    .get(heap)
                    .ok_or(BackendError::UnknownHandle {
                        kind: "descriptor heap",
                        id: heap.0,
                    })?
                    .set(*index)?;
                unsafe {
                    self.device().cmd_bind_descriptor_sets(
                        buffer,
                        vk::PipelineBindPoint::GRAPHICS,
                        layout,
                        *parameter,
                        &[set],
                        &[],
                    )
                };
            }
            GpuCommand::SetVertexBuffer(view) => {
                let handle = self.buffer(view.buffer)?.handle();
                unsafe { self.device().cmd_bind_vertex_buffers(buffer, 0, &[handle], &[0]) };
            }
            GpuCommand::SetIndexBuffer(view) => {
                let handle = self.buffer(view.buffer)?.handle();
                let index_type = match view.format {
                    IndexFormat::U16 => vk::IndexType::UINT16,
                    IndexFormat::U32 => vk::IndexType::UINT32,
                };
                unsafe { self.device().cmd_bind_index_buffer(buffer, handle, 0, index_type) };
            }
            GpuCommand::SetPrimitiveTopology(PrimitiveTopology::TriangleList) => {
                // Fixed in the pipeline
            }
            GpuCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            } => {
                if self.lists[list_index].rendering.is_none() {
                    return Err(BackendError::Validation("draw outside of bound render targets".to_string()));
                }
                unsafe {
                    self.device().cmd_draw_indexed(
                        buffer,
                        *index_count,
                        *instance_count,
                        *first_index,
                        *base_vertex,
                        *first_instance,
                    )
                };
            }
        }
        Ok(())
    }

    /// Finish any open rendering scope and end the command buffer
    pub(super) fn finish(&mut self, list_index: usize) -> BackendResult<()> {
        self.end_rendering(list_index);
        let list = &mut self.lists[list_index];
        list.pending_color_clear = None;
        list.pending_depth_clear = None;
        let buffer = list.buffer;
        unsafe { self.device().end_command_buffer(buffer) }.map_err(|e| api_error("vkEndCommandBuffer", e))
    }

    /// Begin recording after the pool was reset
    pub(super) fn begin(&mut self, list_index: usize) -> BackendResult<()> {
        let list = &mut self.lists[list_index];
        list.reset_state();
        let buffer = list.buffer;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device().begin_command_buffer(buffer, &begin_info) }
            .map_err(|e| api_error("vkBeginCommandBuffer", e))
    }

    fn encode_barrier(
        &mut self,
        list_index: usize,
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    ) -> BackendResult<()> {
        let buffer = self.lists[list_index].buffer;
        let (mut old_layout, src_access, src_stage) = state_access(before);
        let (new_layout, dst_access, dst_stage) = state_access(after);

        let mut barriers = Vec::with_capacity(2);
        match self.resources.get(&resource) {
            Some(VkResource::BackBuffer(index)) => {
                let index = *index;
                self.lists[list_index].touches_back_buffer = true;
                let swapchain = self.swapchain_mut()?;
                if !swapchain.mark_initialized(index) {
                    old_layout = vk::ImageLayout::UNDEFINED;
                }
                let image = swapchain.image(index);
                let msaa = swapchain.msaa_target(index).map(|target| target.handle());
                barriers.push(image_barrier(
                    image,
                    vk::ImageAspectFlags::COLOR,
                    old_layout,
                    new_layout,
                    src_access,
                    dst_access,
                ));
                // The multisampled target is cleared every frame, so its contents can be discarded
                if let (Some(msaa), ResourceState::RenderTarget) = (msaa, after) {
                    barriers.push(image_barrier(
                        msaa,
                        vk::ImageAspectFlags::COLOR,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                        vk::AccessFlags::empty(),
                        dst_access,
                    ));
                }
            }
            Some(VkResource::Image { image, initialized, .. }) => {
                if !*initialized {
                    old_layout = vk::ImageLayout::UNDEFINED;
                }
                barriers.push(image_barrier(
                    image.handle(),
                    image.aspect(),
                    old_layout,
                    new_layout,
                    src_access,
                    dst_access,
                ));
                if let Some(VkResource::Image { initialized, .. }) = self.resources.get_mut(&resource) {
                    *initialized = true;
                }
            }
            Some(VkResource::Buffer(_)) => {
                log::debug!("Ignoring state transition on buffer {:?}", resource);
                return Ok(());
            }
            None => {
                return Err(BackendError::UnknownHandle {
                    kind: "resource",
                    id: resource.0,
                })
            }
        }

        unsafe {
            self.device().cmd_pipeline_barrier(
                buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            )
        };
        Ok(())
    }

    fn target(&self, resource: ResourceId) -> BackendResult<Target> {
        match self.resources.get(&resource) {
            Some(VkResource::BackBuffer(index)) => {
                let swapchain = self.swapchain()?;
                let view = swapchain.view(*index);
                let extent = swapchain.extent();
                Ok(match swapchain.msaa_target(*index) {
                    Some(msaa) => Target {
                        view: msaa.view(),
                        extent,
                        resolve: Some(view),
                        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    },
                    None => Target {
                        view,
                        extent,
                        resolve: None,
                        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    },
                })
            }
            Some(VkResource::Image { image, extent, .. }) => Ok(Target {
                view: image.view(),
                extent: *extent,
                resolve: None,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }),
            Some(VkResource::Buffer(_)) => Err(BackendError::Validation(format!(
                "{:?} is a buffer, not a render target",
                resource
            ))),
            None => Err(BackendError::UnknownHandle {
                kind: "resource",
                id: resource.0,
            }),
        }
    }

    fn begin_rendering(&mut self, list_index: usize, color: ResourceId, depth: Option<ResourceId>) -> BackendResult<()> {
        let color_target = self.target(color)?;
        let depth_target = depth.map(|depth| self.target(depth)).transpose()?;
        // A stale depth buffer after an out-of-date recreation is smaller than the new images
        let extent = depth_target.as_ref().map_or(color_target.extent, |depth| vk::Extent2D {
            width: color_target.extent.width.min(depth.extent.width),
            height: color_target.extent.height.min(depth.extent.height),
        });
        let has_stencil = self.depth_has_stencil();

        let list = &mut self.lists[list_index];
        let buffer = list.buffer;

        let color_clear = list
            .pending_color_clear
            .take_if_target(color);
        let mut color_attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(color_target.view)
            .image_layout(color_target.layout)
            .store_op(vk::AttachmentStoreOp::STORE);
        color_attachment = match color_clear {
            Some(rgba) => color_attachment
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .clear_value(vk::ClearValue {
                    color: vk::ClearColorValue { float32: rgba },
                }),
            None => color_attachment.load_op(vk::AttachmentLoadOp::LOAD),
        };
        if let Some(resolve) = color_target.resolve {
            color_attachment = color_attachment
                .resolve_mode(vk::ResolveModeFlags::AVERAGE)
                .resolve_image_view(resolve)
                .resolve_image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .store_op(vk::AttachmentStoreOp::DONT_CARE);
        }
        let color_attachments = [color_attachment.build()];

        let depth_attachment = match (depth, depth_target) {
            (Some(depth), Some(target)) => {
                let clear = list.pending_depth_clear.take_if_target(depth);
                let attachment = vk::RenderingAttachmentInfo::builder()
                    .image_view(target.view)
                    .image_layout(target.layout)
                    .store_op(vk::AttachmentStoreOp::STORE);
                Some(
                    match clear {
                        Some((depth, stencil)) => attachment.load_op(vk::AttachmentLoadOp::CLEAR).clear_value(
                            vk::ClearValue {
                                depth_stencil: vk::ClearDepthStencilValue {
                                    depth,
                                    stencil: u32::from(stencil),
                                },
                            },
                        ),
                        None => attachment.load_op(vk::AttachmentLoadOp::LOAD),
                    }
                    .build(),
                )
            }
            _ => None,
        };

        let mut rendering_info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth_attachment) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_attachment);
            if has_stencil {
                rendering_info = rendering_info.stencil_attachment(depth_attachment);
            }
        }

        list.rendering = Some((color, depth));
        unsafe { self.device().cmd_begin_rendering(buffer, &rendering_info) };
        Ok(())
    }

    fn end_rendering(&mut self, list_index: usize) {
        let list = &mut self.lists[list_index];
        if list.rendering.take().is_some() {
            let buffer = list.buffer;
            unsafe { self.device().cmd_end_rendering(buffer) };
        }
    }

    fn clear_bound_attachment(&self, list_index: usize, aspect: vk::ImageAspectFlags, value: vk::ClearValue) {
        let buffer = self.lists[list_index].buffer;
        let Ok(swapchain) = self.swapchain() else {
            return;
        };
        let attachment = vk::ClearAttachment {
            aspect_mask: aspect,
            color_attachment: 0,
            clear_value: value,
        };
        let rect = vk::ClearRect {
            rect: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: swapchain.extent(),
            },
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe { self.device().cmd_clear_attachments(buffer, &[attachment], &[rect]) };
    }
}

/// Clears are only applied to the target they were recorded for
trait TakeIfTarget<T> {
    fn take_if_target(&mut self, target: ResourceId) -> Option<T>;
}

impl TakeIfTarget<[f32; 4]> for Option<(ResourceId, [f32; 4])> {
    fn take_if_target(&mut self, target: ResourceId) -> Option<[f32; 4]> {
        match *self {
            Some((id, color)) if id == target => {
                *self = None;
                Some(color)
            }
            _ => None,
        }
    }
}

impl TakeIfTarget<(f32, u8)> for Option<(ResourceId, f32, u8)> {
    fn take_if_target(&mut self, target: ResourceId) -> Option<(f32, u8)> {
        match *self {
            Some((id, depth, stencil)) if id == target => {
                *self = None;
                Some((depth, stencil))
            }
            _ => None,
        }
    }
}

fn image_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(aspect))
        .build()
}
