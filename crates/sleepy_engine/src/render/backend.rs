//! Device-layer contract between the frame core and the explicit graphics API
//!
//! The frame renderer, command queue and swap chain never touch API handles
//! directly. They talk to a [`GpuBackend`] through typed ids and record work as
//! [`GpuCommand`] values. The Vulkan backend translates each command into the
//! matching `vkCmd*` call as it is recorded; the headless backend executes them
//! on a simulated GPU thread.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Monotonic fence counter value
pub type FenceValue = u64;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by a backend call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The underlying API call failed
    #[error("{call} failed: {code}")]
    Api {
        /// Name of the failing API entry point
        call: &'static str,
        /// API result code, formatted
        code: String,
    },

    /// The logical device was lost (driver reset, GPU hang, removal)
    #[error("device lost")]
    DeviceLost,

    /// A handle that the backend never issued, or already released
    #[error("unknown {kind} handle {id}")]
    UnknownHandle {
        /// Handle category
        kind: &'static str,
        /// Raw id
        id: u32,
    },

    /// The call violates an API usage rule (validation layer message)
    #[error("validation: {0}")]
    Validation(String),

    /// The device cannot provide the requested feature
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Object creation failed during setup
    #[error("initialization failed: {0}")]
    Initialization(String),
}

macro_rules! gpu_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            /// Index form of the id, for backend tables
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

gpu_id!(
    /// Command queue handle
    QueueId
);
gpu_id!(
    /// Fence (timeline) handle
    FenceId
);
gpu_id!(
    /// Command allocator handle
    CommandAllocatorId
);
gpu_id!(
    /// Command list handle
    CommandListId
);
gpu_id!(
    /// GPU resource handle (texture or buffer)
    ResourceId
);
gpu_id!(
    /// Descriptor heap handle
    DescriptorHeapId
);
gpu_id!(
    /// Root signature handle
    RootSignatureId
);
gpu_id!(
    /// Pipeline state handle
    PipelineStateId
);

/// Colour formats usable for back buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGBA, linear
    R8G8B8A8Unorm,
    /// 8-bit BGRA, linear
    B8G8R8A8Unorm,
    /// 8-bit BGRA, sRGB encoded
    B8G8R8A8Srgb,
}

/// Depth-stencil formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepthFormat {
    /// 24-bit depth, 8-bit stencil
    D24UnormS8Uint,
    /// 32-bit float depth, no stencil
    D32Float,
}

impl DepthFormat {
    /// Whether the format carries a stencil aspect
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::D24UnormS8Uint)
    }
}

/// Vertex attribute formats accepted by the input layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    /// Three 32-bit floats
    Float32x3,
    /// Four 32-bit floats
    Float32x4,
}

impl VertexFormat {
    /// Size of one attribute in bytes
    pub fn size(self) -> u32 {
        match self {
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
        }
    }
}

/// Index element format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// 16-bit indices
    U16,
    /// 32-bit indices
    U32,
}

impl IndexFormat {
    /// Size of one index in bytes
    pub fn size(self) -> u32 {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// How a GPU resource will be used next
///
/// Every transition between two states must be declared with a
/// [`GpuCommand::ResourceBarrier`] before the new usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Freshly created, no particular usage
    Common,
    /// Owned by the presentation engine
    Present,
    /// Colour attachment being written
    RenderTarget,
    /// Depth-stencil attachment being written
    DepthWrite,
    /// Readable by shaders and the input assembler
    GenericRead,
}

/// Multisample description shared by targets and pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleDesc {
    /// Samples per pixel
    pub count: u32,
    /// Quality level (0 when the API has no notion of it)
    pub quality: u32,
}

impl Default for SampleDesc {
    fn default() -> Self {
        Self { count: 1, quality: 0 }
    }
}

/// Swap chain creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDesc {
    /// Back buffer width
    pub width: u32,
    /// Back buffer height
    pub height: u32,
    /// Number of buffers in the ring
    pub buffer_count: u32,
    /// Back buffer format
    pub format: PixelFormat,
    /// Multisample description of the render targets
    pub sample: SampleDesc,
}

/// Depth buffer creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthBufferDesc {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Depth format
    pub format: DepthFormat,
    /// Must match the render target sample description
    pub sample: SampleDesc,
}

/// What a buffer is bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex buffer
    Vertex,
    /// Index buffer
    Index,
    /// Constant (uniform) buffer, CPU writable every frame
    Constant,
}

/// Buffer creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Binding usage
    pub usage: BufferUsage,
}

/// Descriptor heap creation parameters (constant-buffer views only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapDesc {
    /// Number of descriptors
    pub count: u32,
    /// Whether shaders can see the heap
    pub shader_visible: bool,
}

/// Descriptor range inside a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorRange {
    /// Number of constant-buffer descriptors in the range
    pub count: u32,
    /// First shader register (binding)
    pub base_register: u32,
}

/// One root parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootParameter {
    /// A table of constant-buffer descriptors
    DescriptorTable(Vec<DescriptorRange>),
}

/// Binding layout between commands and shaders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSignatureDesc {
    /// Root parameters, addressed by index
    pub parameters: Vec<RootParameter>,
    /// Whether the input assembler feeds the vertex shader
    pub allow_input_layout: bool,
}

/// One vertex attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputElement {
    /// Semantic name (`POSITION`, `COLOR`)
    pub semantic: &'static str,
    /// Shader location
    pub location: u32,
    /// Attribute format
    pub format: VertexFormat,
    /// Byte offset inside the vertex
    pub offset: u32,
}

/// Graphics pipeline description
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStateDesc {
    /// Root signature the pipeline is compiled against
    pub root_signature: RootSignatureId,
    /// Vertex program bytecode
    pub vertex_shader: Vec<u8>,
    /// Fragment program bytecode
    pub pixel_shader: Vec<u8>,
    /// Vertex attributes
    pub input_layout: Vec<InputElement>,
    /// Vertex stride in bytes
    pub vertex_stride: u32,
    /// Render target format
    pub render_target_format: PixelFormat,
    /// Depth-stencil format
    pub depth_format: DepthFormat,
    /// Multisample description
    pub sample: SampleDesc,
}

/// Viewport rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
    /// Near depth
    pub min_depth: f32,
    /// Far depth
    pub max_depth: f32,
}

/// Scissor rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    /// Left edge
    pub left: i32,
    /// Top edge
    pub top: i32,
    /// Right edge (exclusive)
    pub right: i32,
    /// Bottom edge (exclusive)
    pub bottom: i32,
}

/// Primitive assembly mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    /// Independent triangles, three indices each
    TriangleList,
}

/// Vertex buffer binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    /// Buffer resource
    pub buffer: ResourceId,
    /// Size of the bound range
    pub size: u32,
    /// Vertex stride
    pub stride: u32,
}

/// Index buffer binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferView {
    /// Buffer resource
    pub buffer: ResourceId,
    /// Size of the bound range
    pub size: u32,
    /// Element format
    pub format: IndexFormat,
}

/// A single recorded GPU instruction
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    /// Explicit usage transition of a resource
    ResourceBarrier {
        /// Transitioned resource
        resource: ResourceId,
        /// State the resource is in
        before: ResourceState,
        /// State the resource moves to
        after: ResourceState,
    },
    /// Set the viewport
    SetViewport(Viewport),
    /// Set the scissor rectangle
    SetScissorRect(ScissorRect),
    /// Clear a colour target
    ClearRenderTarget {
        /// Target resource
        target: ResourceId,
        /// RGBA clear colour
        color: [f32; 4],
    },
    /// Clear a depth-stencil target
    ClearDepthStencil {
        /// Target resource
        target: ResourceId,
        /// Depth clear value
        depth: f32,
        /// Stencil clear value
        stencil: u8,
    },
    /// Bind output targets
    SetRenderTargets {
        /// Colour target
        color: ResourceId,
        /// Optional depth target
        depth: Option<ResourceId>,
    },
    /// Bind the shader-visible descriptor heap
    SetDescriptorHeap(DescriptorHeapId),
    /// Bind the root signature
    SetRootSignature(RootSignatureId),
    /// Bind the pipeline state
    SetPipelineState(PipelineStateId),
    /// Point a root parameter at a descriptor in the bound heap
    SetRootDescriptorTable {
        /// Root parameter index
        parameter: u32,
        /// Heap holding the descriptor
        heap: DescriptorHeapId,
        /// First descriptor of the table
        index: u32,
    },
    /// Bind the vertex buffer
    SetVertexBuffer(VertexBufferView),
    /// Bind the index buffer
    SetIndexBuffer(IndexBufferView),
    /// Set the primitive topology
    SetPrimitiveTopology(PrimitiveTopology),
    /// Indexed draw
    DrawIndexed {
        /// Number of indices
        index_count: u32,
        /// Number of instances
        instance_count: u32,
        /// First index
        first_index: u32,
        /// Added to each index
        base_vertex: i32,
        /// First instance
        first_instance: u32,
    },
}

/// Explicit graphics API as seen by the frame core
///
/// All calls are made from the render thread. Only
/// [`GpuBackend::wait_for_fence`] blocks, and it must block on an OS wait
/// primitive rather than spin.
pub trait GpuBackend {
    /// Human-readable adapter name
    fn adapter_name(&self) -> String;

    /// Reason the device was removed, or `None` while it is healthy
    fn device_removed_reason(&self) -> Option<String>;

    /// Create the direct command queue
    fn create_command_queue(&mut self) -> BackendResult<QueueId>;

    /// Create a fence whose completed value starts at `initial_value`
    fn create_fence(&mut self, initial_value: FenceValue) -> BackendResult<FenceId>;

    /// Enqueue closed command lists; FIFO within the queue
    fn execute_command_lists(&mut self, queue: QueueId, lists: &[CommandListId]) -> BackendResult<()>;

    /// Enqueue a GPU-side signal of `value` on `fence`
    fn signal(&mut self, queue: QueueId, fence: FenceId, value: FenceValue) -> BackendResult<()>;

    /// Value the GPU has most recently completed on `fence`
    fn fence_completed_value(&self, fence: FenceId) -> BackendResult<FenceValue>;

    /// Block the calling thread until `fence` reaches `value`
    fn wait_for_fence(&self, fence: FenceId, value: FenceValue) -> BackendResult<()>;

    /// Create a command allocator
    fn create_command_allocator(&mut self) -> BackendResult<CommandAllocatorId>;

    /// Create a command list on `allocator`; the list starts closed
    fn create_command_list(&mut self, allocator: CommandAllocatorId) -> BackendResult<CommandListId>;

    /// Reclaim allocator memory; every list recorded from it must have finished executing
    fn reset_command_allocator(&mut self, allocator: CommandAllocatorId) -> BackendResult<()>;

    /// Reopen a closed list for recording
    fn reset_command_list(
        &mut self,
        list: CommandListId,
        allocator: CommandAllocatorId,
        initial_pipeline: Option<PipelineStateId>,
    ) -> BackendResult<()>;

    /// Record one command into an open list
    fn record(&mut self, list: CommandListId, command: &GpuCommand) -> BackendResult<()>;

    /// Close (finalize) an open list
    fn close_command_list(&mut self, list: CommandListId) -> BackendResult<()>;

    /// Number of quality levels for `sample_count` on `format` (0 = unsupported)
    fn multisample_quality_levels(&self, format: PixelFormat, sample_count: u32) -> BackendResult<u32>;

    /// Create the swap chain presenting through `queue`; returns back buffers in ring order
    fn create_swap_chain(&mut self, queue: QueueId, desc: &SwapChainDesc) -> BackendResult<Vec<ResourceId>>;

    /// Recreate every back buffer at a new size; no GPU work may reference them
    fn resize_swap_chain(&mut self, width: u32, height: u32) -> BackendResult<Vec<ResourceId>>;

    /// Index of the back buffer to render into next
    fn current_back_buffer_index(&self) -> u32;

    /// Flip the current back buffer to the screen
    fn present(&mut self, queue: QueueId) -> BackendResult<()>;

    /// Create a depth-stencil texture in [`ResourceState::Common`]
    fn create_depth_buffer(&mut self, desc: &DepthBufferDesc) -> BackendResult<ResourceId>;

    /// Create a CPU-writable buffer filled with `initial_data`
    fn create_buffer(&mut self, desc: &BufferDesc, initial_data: &[u8]) -> BackendResult<ResourceId>;

    /// Overwrite bytes of a buffer from the CPU
    fn write_buffer(&mut self, buffer: ResourceId, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Create a descriptor heap
    fn create_descriptor_heap(&mut self, desc: &DescriptorHeapDesc) -> BackendResult<DescriptorHeapId>;

    /// Write a constant-buffer view into slot `index` of `heap`
    fn create_constant_buffer_view(
        &mut self,
        heap: DescriptorHeapId,
        index: u32,
        buffer: ResourceId,
        offset: u64,
        size: u64,
    ) -> BackendResult<()>;

    /// Create a root signature
    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> BackendResult<RootSignatureId>;

    /// Create the graphics pipeline state
    fn create_pipeline_state(&mut self, desc: &PipelineStateDesc) -> BackendResult<PipelineStateId>;

    /// Destroy a texture or buffer; no GPU work may reference it
    fn release_resource(&mut self, resource: ResourceId);
}
