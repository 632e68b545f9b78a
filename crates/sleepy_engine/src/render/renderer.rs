//! Frame renderer: per-frame recording, submission, presentation and CPU/GPU
//! synchronization
//!
//! Each frame moves through `Idle -> Recording -> Submitted -> Presented -> Idle`.
//! A frame slot is only reset once the fence value of its previous submission
//! has been reached, so the CPU never overwrites a command allocator or a
//! constant-buffer region the GPU may still read.

use super::backend::{
    BufferDesc, BufferUsage, DepthBufferDesc, DepthFormat, DescriptorHeapDesc, DescriptorHeapId, FenceValue,
    GpuBackend, GpuCommand, PipelineStateId, PrimitiveTopology, ResourceId, ResourceState, RootSignatureId,
    SampleDesc, ScissorRect, SwapChainDesc, Viewport,
};
use super::camera::OrbitCamera;
use super::command_queue::CommandQueue;
use super::device::Device;
use super::draw_data::DrawItem;
use super::error::{RenderError, RenderResult};
use super::frame::{FrameRing, FrameSlot};
use super::mesh::{MeshData, MeshId, MeshRegistry};
use super::pipeline::{self, ObjectConstants, ShaderBytecode};
use super::resource_state::ResourceStateTracker;
use super::swap_chain::SwapChain;
use crate::config::RendererConfig;

/// Where the current frame is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No frame in progress
    Idle,
    /// Command list open for recording
    Recording,
    /// Command list submitted, not yet presented
    Submitted,
    /// Back buffer presented, fence not yet signaled
    Presented,
}

/// Owns every GPU object of the hardcoded pipeline and drives the frame loop
pub struct FrameRenderer<B: GpuBackend> {
    device: Device<B>,
    queue: CommandQueue,
    swap_chain: SwapChain,
    states: ResourceStateTracker,
    frames: FrameRing,
    depth_buffer: ResourceId,
    depth_format: DepthFormat,
    cbv_heap: DescriptorHeapId,
    object_buffer: ResourceId,
    root_signature: RootSignatureId,
    pipeline: PipelineStateId,
    meshes: MeshRegistry,
    camera: OrbitCamera,
    viewport: Viewport,
    scissor: ScissorRect,
    clear_color: [f32; 4],
    max_objects: u32,
    state: FrameState,
    recorded: bool,
    frame_count: u64,
    truncation_warned: bool,
    shut_down: bool,
}

impl<B: GpuBackend> FrameRenderer<B> {
    /// Create every GPU object and bring the depth buffer into its write state
    ///
    /// The window is already bound to `backend`; `width` and `height` are its
    /// client size.
    pub fn new(
        backend: B,
        config: &RendererConfig,
        width: u32,
        height: u32,
        shaders: &ShaderBytecode,
    ) -> RenderResult<Self> {
        config.validate()?;
        if width == 0 || height == 0 {
            return Err(RenderError::Initialization(format!(
                "cannot create a {}x{} swap chain",
                width, height
            )));
        }

        let mut device = Device::new(backend, config.validation);

        let sample_count = config.multisample.effective_sample_count();
        let quality_levels = device.multisample_quality(config.back_buffer_format, sample_count)?;
        let sample = SampleDesc {
            count: sample_count,
            quality: if sample_count > 1 {
                config.multisample.quality.min(quality_levels - 1)
            } else {
                0
            },
        };

        let queue = CommandQueue::new(&mut device)?;

        let mut states = ResourceStateTracker::new();
        let swap_chain = SwapChain::new(
            &mut device,
            &queue,
            SwapChainDesc {
                width,
                height,
                buffer_count: config.buffer_count,
                format: config.back_buffer_format,
                sample,
            },
            &mut states,
        )?;

        let frames = FrameRing::new(&mut device, swap_chain.buffer_count(), config.max_objects)?;

        let depth_buffer = Self::create_depth_buffer(&mut device, width, height, config.depth_format, sample)?;
        states.register(depth_buffer, ResourceState::Common);

        let total_objects = swap_chain
            .buffer_count()
            .checked_mul(config.max_objects)
            .ok_or_else(|| {
                RenderError::Initialization(format!(
                    "{} frames of {} objects overflow the descriptor heap",
                    swap_chain.buffer_count(),
                    config.max_objects
                ))
            })?;
        let stride = ObjectConstants::aligned_size();
        let cbv_heap = device
            .backend_mut()
            .create_descriptor_heap(&DescriptorHeapDesc {
                count: total_objects,
                shader_visible: true,
            })
            .map_err(|e| RenderError::Initialization(format!("descriptor heap: {}", e)))?;
        // Every region is written by record_frame before a draw reads it
        let object_buffer = device
            .backend_mut()
            .create_buffer(
                &BufferDesc {
                    size: u64::from(total_objects) * stride,
                    usage: BufferUsage::Constant,
                },
                &[],
            )
            .map_err(|e| RenderError::Initialization(format!("object constant buffer: {}", e)))?;
        for index in 0..total_objects {
            device
                .backend_mut()
                .create_constant_buffer_view(cbv_heap, index, object_buffer, u64::from(index) * stride, stride)
                .map_err(|e| RenderError::Initialization(format!("constant buffer view {}: {}", index, e)))?;
        }

        let root_signature = device
            .backend_mut()
            .create_root_signature(&pipeline::object_root_signature())
            .map_err(|e| RenderError::Initialization(format!("root signature: {}", e)))?;
        let pipeline = device
            .backend_mut()
            .create_pipeline_state(&pipeline::color_pipeline(
                root_signature,
                shaders,
                config.back_buffer_format,
                config.depth_format,
                sample,
            ))
            .map_err(|e| RenderError::Initialization(format!("pipeline state: {}", e)))?;

        let mut meshes = MeshRegistry::new();
        meshes.upload(&mut device, &MeshData::unit_box())?;

        let mut renderer = Self {
            device,
            queue,
            swap_chain,
            states,
            frames,
            depth_buffer,
            depth_format: config.depth_format,
            cbv_heap,
            object_buffer,
            root_signature,
            pipeline,
            meshes,
            camera: OrbitCamera::new(width as f32 / height as f32),
            viewport: full_viewport(width, height),
            scissor: full_scissor(width, height),
            clear_color: config.clear_color,
            max_objects: config.max_objects,
            state: FrameState::Idle,
            recorded: false,
            frame_count: 0,
            truncation_warned: false,
            shut_down: false,
        };

        let barrier = renderer
            .states
            .transition(depth_buffer, ResourceState::Common, ResourceState::DepthWrite)?;
        renderer.submit_setup_commands(&[barrier])?;

        log::info!(
            "Frame renderer ready: {} frames in flight, {} objects per frame, {}x MSAA",
            renderer.frames.len(),
            renderer.max_objects,
            sample.count
        );
        Ok(renderer)
    }

    fn create_depth_buffer(
        device: &mut Device<B>,
        width: u32,
        height: u32,
        format: DepthFormat,
        sample: SampleDesc,
    ) -> RenderResult<ResourceId> {
        device
            .backend_mut()
            .create_depth_buffer(&DepthBufferDesc {
                width,
                height,
                format,
                sample,
            })
            .map_err(|e| RenderError::Initialization(format!("depth buffer: {}", e)))
    }

    /// Record one-off commands on the current slot, submit them and flush
    fn submit_setup_commands(&mut self, commands: &[GpuCommand]) -> RenderResult<()> {
        let slot = self.frames.current().clone();
        self.queue.wait_for_fence_value(&self.device, slot.fence_value)?;
        self.reset_slot(&slot, None)?;
        for command in commands {
            self.device.backend_mut().record(slot.list, command)?;
        }
        self.device.backend_mut().close_command_list(slot.list)?;
        self.queue.submit(&mut self.device, &[slot.list])?;
        self.queue.flush(&mut self.device)?;
        self.frames.current_mut().fence_value = self.queue.last_signaled();
        Ok(())
    }

    fn reset_slot(&mut self, slot: &FrameSlot, initial_pipeline: Option<PipelineStateId>) -> RenderResult<()> {
        let backend = self.device.backend_mut();
        backend.reset_command_allocator(slot.allocator)?;
        backend.reset_command_list(slot.list, slot.allocator, initial_pipeline)?;
        Ok(())
    }

    fn expect_state(&self, operation: &'static str, expected: FrameState) -> RenderResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RenderError::InvalidFrameState {
                operation,
                state: self.state,
            })
        }
    }

    fn record(&mut self, command: GpuCommand) -> RenderResult<()> {
        let list = self.frames.current().list;
        self.device.backend_mut().record(list, &command)?;
        Ok(())
    }

    /// Wait for the next frame slot to be free, then open its command list
    pub fn begin_frame(&mut self) -> RenderResult<()> {
        self.expect_state("begin_frame", FrameState::Idle)?;
        self.device.check_health()?;

        let slot = self.frames.current().clone();
        self.queue.wait_for_fence_value(&self.device, slot.fence_value)?;
        self.reset_slot(&slot, Some(self.pipeline))?;

        self.state = FrameState::Recording;
        self.recorded = false;
        Ok(())
    }

    /// Upload per-object constants and record the draw commands of the frame
    pub fn record_frame(&mut self, items: &[DrawItem]) -> RenderResult<()> {
        self.expect_state("record_frame", FrameState::Recording)?;
        if self.recorded {
            return Err(RenderError::InvalidFrameState {
                operation: "record_frame",
                state: self.state,
            });
        }

        let count = items.len().min(self.max_objects as usize);
        if count < items.len() && !self.truncation_warned {
            log::warn!(
                "{} draw items submitted, only the first {} fit in the object buffer",
                items.len(),
                self.max_objects
            );
            self.truncation_warned = true;
        }
        let items = &items[..count];

        let first_object = self.frames.current().first_object;
        let stride = ObjectConstants::aligned_size();
        let view_proj = self.camera.view_projection();
        for (index, item) in items.iter().enumerate() {
            let constants = ObjectConstants::new(&(view_proj * item.world));
            let offset = u64::from(first_object + index as u32) * stride;
            self.device
                .backend_mut()
                .write_buffer(self.object_buffer, offset, bytemuck::bytes_of(&constants))?;
        }

        let back_buffer = self.swap_chain.current_back_buffer();
        let enter = self
            .states
            .transition(back_buffer, ResourceState::Present, ResourceState::RenderTarget)?;
        self.record(enter)?;

        self.record(GpuCommand::SetViewport(self.viewport))?;
        self.record(GpuCommand::SetScissorRect(self.scissor))?;
        self.record(GpuCommand::ClearRenderTarget {
            target: back_buffer,
            color: self.clear_color,
        })?;
        self.record(GpuCommand::ClearDepthStencil {
            target: self.depth_buffer,
            depth: 1.0,
            stencil: 0,
        })?;
        self.record(GpuCommand::SetRenderTargets {
            color: back_buffer,
            depth: Some(self.depth_buffer),
        })?;

        self.record(GpuCommand::SetDescriptorHeap(self.cbv_heap))?;
        self.record(GpuCommand::SetRootSignature(self.root_signature))?;
        self.record(GpuCommand::SetPipelineState(self.pipeline))?;

        for (index, item) in items.iter().enumerate() {
            let Some(mesh) = self.meshes.get(item.mesh).copied() else {
                log::warn!("Skipping draw of unknown mesh {:?}", item.mesh);
                continue;
            };
            self.record(GpuCommand::SetRootDescriptorTable {
                parameter: 0,
                heap: self.cbv_heap,
                index: first_object + index as u32,
            })?;
            self.record(GpuCommand::SetVertexBuffer(mesh.vertex_view))?;
            self.record(GpuCommand::SetIndexBuffer(mesh.index_view))?;
            self.record(GpuCommand::SetPrimitiveTopology(PrimitiveTopology::TriangleList))?;
            self.record(GpuCommand::DrawIndexed {
                index_count: mesh.index_count,
                instance_count: 1,
                first_index: 0,
                base_vertex: 0,
                first_instance: 0,
            })?;
        }

        let exit = self
            .states
            .transition(back_buffer, ResourceState::RenderTarget, ResourceState::Present)?;
        self.record(exit)?;

        self.recorded = true;
        Ok(())
    }

    /// Close and submit the frame, present it, then signal its fence value
    ///
    /// The frame must have been recorded; an opened frame with nothing to
    /// submit is dropped with [`FrameRenderer::abort_frame`].
    pub fn end_frame(&mut self) -> RenderResult<()> {
        self.expect_state("end_frame", FrameState::Recording)?;
        if !self.recorded {
            return Err(RenderError::InvalidFrameState {
                operation: "end_frame",
                state: self.state,
            });
        }

        let list = self.frames.current().list;
        self.device.backend_mut().close_command_list(list)?;
        self.queue.submit(&mut self.device, &[list])?;
        self.state = FrameState::Submitted;

        let presented = self.swap_chain.present(&mut self.device, &self.queue, &self.states);
        if presented.is_ok() {
            self.state = FrameState::Presented;
        }

        // The slot is guarded by this value even if present failed
        let value = self.queue.signal_fence(&mut self.device)?;
        self.frames.current_mut().fence_value = value;
        self.frames.advance();
        self.state = FrameState::Idle;
        self.frame_count += 1;
        presented
    }

    /// Begin, record and end one frame
    pub fn render_frame(&mut self, items: &[DrawItem]) -> RenderResult<()> {
        self.begin_frame()?;
        self.record_frame(items)?;
        self.end_frame()
    }

    /// Drop a frame that failed while recording; nothing is submitted
    ///
    /// The slot keeps its previous fence value, so the next `begin_frame`
    /// reuses it safely.
    pub fn abort_frame(&mut self) {
        if self.state != FrameState::Recording {
            return;
        }
        let list = self.frames.current().list;
        if let Err(e) = self.device.backend_mut().close_command_list(list) {
            log::debug!("Closing aborted command list: {}", e);
        }
        // Recorded transitions never reached the GPU
        self.states
            .register(self.swap_chain.current_back_buffer(), ResourceState::Present);
        log::warn!("Frame {} aborted before submission", self.frame_count);
        self.state = FrameState::Idle;
    }

    /// Recreate size-dependent resources after the window changed size
    ///
    /// Zero-area sizes (minimised window) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.expect_state("resize", FrameState::Idle)?;
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {}x{}", width, height);
            return Ok(());
        }

        self.queue.flush(&mut self.device)?;
        if !self.swap_chain.resize(&mut self.device, width, height, &mut self.states)? {
            return Ok(());
        }

        self.states.forget(self.depth_buffer);
        self.device.backend_mut().release_resource(self.depth_buffer);
        let sample = self.swap_chain.sample();
        self.depth_buffer = Self::create_depth_buffer(&mut self.device, width, height, self.depth_format, sample)?;
        self.states.register(self.depth_buffer, ResourceState::Common);
        let barrier = self
            .states
            .transition(self.depth_buffer, ResourceState::Common, ResourceState::DepthWrite)?;
        self.submit_setup_commands(&[barrier])?;

        self.viewport = full_viewport(width, height);
        self.scissor = full_scissor(width, height);
        self.camera.set_aspect_ratio(width as f32 / height as f32);
        Ok(())
    }

    /// Signal and wait until the GPU has finished all submitted work
    pub fn flush(&mut self) -> RenderResult<()> {
        self.queue.flush(&mut self.device)
    }

    /// Drain the GPU and release every resource
    ///
    /// Runs once; `Drop` calls it when it was not called explicitly.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        self.queue.flush(&mut self.device)?;
        self.meshes.release_all(&mut self.device);
        self.device.backend_mut().release_resource(self.object_buffer);
        self.states.forget(self.depth_buffer);
        self.device.backend_mut().release_resource(self.depth_buffer);
        log::info!("Frame renderer shut down after {} frames", self.frame_count);
        Ok(())
    }

    /// Upload an additional mesh
    pub fn upload_mesh(&mut self, data: &MeshData) -> RenderResult<MeshId> {
        self.meshes.upload(&mut self.device, data)
    }

    /// The built-in box mesh
    pub fn box_mesh(&self) -> MeshId {
        MeshRegistry::BOX
    }

    /// Current frame state
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Frames completed since creation
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Highest fence value signaled so far
    pub fn last_signaled_fence(&self) -> FenceValue {
        self.queue.last_signaled()
    }

    /// Fence value the GPU has completed
    pub fn completed_fence(&self) -> RenderResult<FenceValue> {
        self.queue.completed_value(&self.device)
    }

    /// Frame slots with their last submitted fence values
    pub fn frame_slots(&self) -> &[FrameSlot] {
        self.frames.slots()
    }

    /// Index of the slot the next frame will use
    pub fn current_frame_index(&self) -> usize {
        self.frames.current_index()
    }

    /// The back-buffer ring
    pub fn swap_chain(&self) -> &SwapChain {
        &self.swap_chain
    }

    /// Buffer holding every slot's object constants
    pub fn object_buffer(&self) -> ResourceId {
        self.object_buffer
    }

    /// Current depth buffer
    pub fn depth_buffer(&self) -> ResourceId {
        self.depth_buffer
    }

    /// Tracked state of a resource
    pub fn resource_state(&self, resource: ResourceId) -> Option<ResourceState> {
        self.states.state(resource)
    }

    /// Camera used for the view-projection
    pub fn camera(&self) -> &OrbitCamera {
        &self.camera
    }

    /// Camera, mutably
    pub fn camera_mut(&mut self) -> &mut OrbitCamera {
        &mut self.camera
    }

    /// The backend, for inspection
    pub fn backend(&self) -> &B {
        self.device.backend()
    }
}

impl<B: GpuBackend> Drop for FrameRenderer<B> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Renderer shutdown failed: {}", e);
        }
    }
}

fn full_viewport(width: u32, height: u32) -> Viewport {
    Viewport {
        x: 0.0,
        y: 0.0,
        width: width as f32,
        height: height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn full_scissor(width: u32, height: u32) -> ScissorRect {
    ScissorRect {
        left: 0,
        top: 0,
        right: width as i32,
        bottom: height as i32,
    }
}
