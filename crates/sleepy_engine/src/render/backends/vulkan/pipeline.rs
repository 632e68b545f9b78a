//! Descriptor heaps, root signatures and the graphics pipeline in Vulkan terms
//!
//! A descriptor heap of constant-buffer views is a descriptor pool whose sets
//! each hold one uniform buffer at binding 0. A root signature is a pipeline
//! layout with one such set layout per descriptor table.

use std::ffi::CStr;
use std::io::Cursor;

use ash::{vk, Device};

use crate::render::backend::{
    BackendError, BackendResult, PipelineStateDesc, RootParameter, RootSignatureDesc, VertexFormat,
};

use super::api_error;

/// Set layout with a single uniform buffer visible to the vertex stage
pub struct ConstantBufferSetLayout {
    device: Device,
    layout: vk::DescriptorSetLayout,
}

impl ConstantBufferSetLayout {
    /// Create the layout
    pub fn new(device: &Device) -> BackendResult<Self> {
        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build()];
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&create_info, None) }
            .map_err(|e| api_error("vkCreateDescriptorSetLayout", e))?;
        Ok(Self {
            device: device.clone(),
            layout,
        })
    }

    /// Layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for ConstantBufferSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Pool holding one descriptor set per constant-buffer view
pub struct DescriptorHeap {
    device: Device,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

impl DescriptorHeap {
    /// Allocate `count` single-uniform-buffer sets
    pub fn new(device: &Device, layout: &ConstantBufferSetLayout, count: u32) -> BackendResult<Self> {
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(count);
        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(|e| api_error("vkCreateDescriptorPool", e))?;

        let mut heap = Self {
            device: device.clone(),
            pool,
            sets: Vec::new(),
        };
        let layouts = vec![layout.handle(); count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        heap.sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| api_error("vkAllocateDescriptorSets", e))?;
        Ok(heap)
    }

    /// Point descriptor `index` at a range of `buffer`
    pub fn write_constant_buffer(
        &self,
        index: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> BackendResult<()> {
        let set = self.set(index)?;
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset,
            range: size,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info)
            .build();
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        Ok(())
    }

    /// Descriptor set backing `index`
    pub fn set(&self, index: u32) -> BackendResult<vk::DescriptorSet> {
        self.sets.get(index as usize).copied().ok_or_else(|| {
            BackendError::Validation(format!("descriptor {} outside heap of {}", index, self.sets.len()))
        })
    }
}

impl Drop for DescriptorHeap {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Pipeline layout built from a root signature description
pub struct RootSignature {
    device: Device,
    layout: vk::PipelineLayout,
}

impl RootSignature {
    /// Create the layout; every table must be one constant buffer at register 0
    pub fn new(device: &Device, desc: &RootSignatureDesc, cbv_layout: &ConstantBufferSetLayout) -> BackendResult<Self> {
        let mut set_layouts = Vec::with_capacity(desc.parameters.len());
        for parameter in &desc.parameters {
            let RootParameter::DescriptorTable(ranges) = parameter;
            match ranges.as_slice() {
                [range] if range.count == 1 && range.base_register == 0 => set_layouts.push(cbv_layout.handle()),
                _ => {
                    return Err(BackendError::Unsupported(format!(
                        "descriptor table layout {:?}",
                        ranges
                    )))
                }
            }
        }
        let create_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = unsafe { device.create_pipeline_layout(&create_info, None) }
            .map_err(|e| api_error("vkCreatePipelineLayout", e))?;
        Ok(Self {
            device: device.clone(),
            layout,
        })
    }

    /// Layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for RootSignature {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Graphics pipeline rendering with dynamic rendering
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Compile the pipeline for the given attachment formats
    pub fn new(
        device: &Device,
        desc: &PipelineStateDesc,
        layout: &RootSignature,
        color_format: vk::Format,
        depth_format: vk::Format,
        has_stencil: bool,
        samples: vk::SampleCountFlags,
    ) -> BackendResult<Self> {
        let vertex = ShaderModule::new(device, &desc.vertex_shader)?;
        let fragment = ShaderModule::new(device, &desc.pixel_shader)?;

        let entry = CStr::from_bytes_with_nul(b"main\0")
            .map_err(|e| BackendError::Initialization(format!("entry point name: {}", e)))?;
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex.module)
                .name(entry)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment.module)
                .name(entry)
                .build(),
        ];

        let bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: desc.vertex_stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .input_layout
            .iter()
            .map(|element| vk::VertexInputAttributeDescription {
                location: element.location,
                binding: 0,
                format: vertex_format(element.format),
                offset: element.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::builder().topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let color_formats = [color_format];
        let mut rendering = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format)
            .stencil_attachment_format(if has_stencil { depth_format } else { vk::Format::UNDEFINED });

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout.handle())
            .push_next(&mut rendering)
            .build();

        let pipelines = unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None) }
            .map_err(|(_, e)| api_error("vkCreateGraphicsPipelines", e))?;
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Initialization("no pipeline returned".to_string()))?;

        Ok(Self {
            device: device.clone(),
            pipeline,
        })
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

/// Shader module that only lives for pipeline creation
struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    fn new(device: &Device, bytecode: &[u8]) -> BackendResult<Self> {
        let code = ash::util::read_spv(&mut Cursor::new(bytecode))
            .map_err(|e| BackendError::Initialization(format!("invalid SPIR-V: {}", e)))?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { device.create_shader_module(&create_info, None) }
            .map_err(|e| api_error("vkCreateShaderModule", e))?;
        Ok(Self {
            device: device.clone(),
            module,
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

fn vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}
