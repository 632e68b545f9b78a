//! The single hardcoded render pipeline: object constants, binding layout and
//! pipeline state description

use bytemuck::{Pod, Zeroable};

use super::backend::{
    DepthFormat, DescriptorRange, PipelineStateDesc, PixelFormat, RootParameter, RootSignatureDesc,
    RootSignatureId, SampleDesc,
};
use super::error::{RenderError, RenderResult};
use super::mesh::ColorVertex;
use crate::config::ShaderPaths;
use crate::foundation::math::{utils, Mat4};

/// Constant-buffer views must start on this byte boundary
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Per-object constants read by the vertex shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectConstants {
    /// Column-major world * view * projection
    pub world_view_proj: [[f32; 4]; 4],
}

impl ObjectConstants {
    /// Constants for one object
    pub fn new(world_view_proj: &Mat4) -> Self {
        Self {
            world_view_proj: utils::to_cols_array(world_view_proj),
        }
    }

    /// Size of one constant slot once aligned
    pub fn aligned_size() -> u64 {
        let size = std::mem::size_of::<Self>() as u64;
        (size + CONSTANT_BUFFER_ALIGNMENT - 1) & !(CONSTANT_BUFFER_ALIGNMENT - 1)
    }
}

/// Vertex and fragment program bytecode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderBytecode {
    /// Vertex program
    pub vertex: Vec<u8>,
    /// Fragment program
    pub fragment: Vec<u8>,
}

impl ShaderBytecode {
    /// Read both programs from disk
    pub fn load(paths: &ShaderPaths) -> RenderResult<Self> {
        let read = |path: &str| {
            std::fs::read(path).map_err(|source| RenderError::ShaderLoad {
                path: path.to_string(),
                source,
            })
        };
        let bytecode = Self {
            vertex: read(&paths.vertex)?,
            fragment: read(&paths.fragment)?,
        };
        log::debug!(
            "Loaded shaders: {} ({} bytes), {} ({} bytes)",
            paths.vertex,
            bytecode.vertex.len(),
            paths.fragment,
            bytecode.fragment.len()
        );
        Ok(bytecode)
    }
}

/// One descriptor table holding the object constant buffer at register 0
pub fn object_root_signature() -> RootSignatureDesc {
    RootSignatureDesc {
        parameters: vec![RootParameter::DescriptorTable(vec![DescriptorRange {
            count: 1,
            base_register: 0,
        }])],
        allow_input_layout: true,
    }
}

/// Pipeline state for coloured, depth-tested triangle lists
pub fn color_pipeline(
    root_signature: RootSignatureId,
    shaders: &ShaderBytecode,
    render_target_format: PixelFormat,
    depth_format: DepthFormat,
    sample: SampleDesc,
) -> PipelineStateDesc {
    PipelineStateDesc {
        root_signature,
        vertex_shader: shaders.vertex.clone(),
        pixel_shader: shaders.fragment.clone(),
        input_layout: ColorVertex::input_layout(),
        vertex_stride: ColorVertex::stride(),
        render_target_format,
        depth_format,
        sample,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_slot_alignment() {
        assert_eq!(std::mem::size_of::<ObjectConstants>(), 64);
        assert_eq!(ObjectConstants::aligned_size(), 256);
    }

    #[test]
    fn test_missing_shader_file() {
        let paths = ShaderPaths {
            vertex: "does/not/exist.spv".to_string(),
            fragment: "does/not/exist.spv".to_string(),
        };
        assert!(matches!(ShaderBytecode::load(&paths), Err(RenderError::ShaderLoad { .. })));
    }
}
