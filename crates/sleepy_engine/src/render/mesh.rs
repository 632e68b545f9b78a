//! Mesh data and the GPU mesh registry

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use super::backend::{
    BufferDesc, BufferUsage, GpuBackend, IndexBufferView, IndexFormat, InputElement, ResourceId, VertexBufferView,
    VertexFormat,
};
use super::device::Device;
use super::error::{RenderError, RenderResult};

/// Position + colour vertex used by the built-in pipeline
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ColorVertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Linear RGBA colour
    pub color: [f32; 4],
}

impl ColorVertex {
    /// Vertex attributes matching the shader inputs
    pub fn input_layout() -> Vec<InputElement> {
        vec![
            InputElement {
                semantic: "POSITION",
                location: 0,
                format: VertexFormat::Float32x3,
                offset: 0,
            },
            InputElement {
                semantic: "COLOR",
                location: 1,
                format: VertexFormat::Float32x4,
                offset: VertexFormat::Float32x3.size(),
            },
        ]
    }

    /// Vertex stride in bytes
    pub const fn stride() -> u32 {
        std::mem::size_of::<Self>() as u32
    }
}

/// Geometry as raw bytes plus the metadata needed to bind it
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    /// Vertex bytes
    pub vertices: Vec<u8>,
    /// Bytes per vertex
    pub vertex_stride: u32,
    /// Index bytes
    pub indices: Vec<u8>,
    /// Index element format
    pub index_format: IndexFormat,
}

impl MeshData {
    /// Build from typed vertices and 16-bit indices
    pub fn from_slices<V: Pod>(vertices: &[V], indices: &[u16]) -> Self {
        Self {
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            vertex_stride: std::mem::size_of::<V>() as u32,
            indices: bytemuck::cast_slice(indices).to_vec(),
            index_format: IndexFormat::U16,
        }
    }

    /// Number of indices
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32 / self.index_format.size()
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> u32 {
        if self.vertex_stride == 0 {
            0
        } else {
            self.vertices.len() as u32 / self.vertex_stride
        }
    }

    /// Unit-half-extent box with a distinct colour per corner
    pub fn unit_box() -> Self {
        const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
        const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
        const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
        const GREEN: [f32; 4] = [0.0, 0.5, 0.0, 1.0];
        const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];
        const YELLOW: [f32; 4] = [1.0, 1.0, 0.0, 1.0];
        const CYAN: [f32; 4] = [0.0, 1.0, 1.0, 1.0];
        const MAGENTA: [f32; 4] = [1.0, 0.0, 1.0, 1.0];

        let vertex = |position: [f32; 3], color: [f32; 4]| ColorVertex { position, color };
        let vertices = [
            vertex([-1.0, -1.0, -1.0], WHITE),
            vertex([-1.0, 1.0, -1.0], BLACK),
            vertex([1.0, 1.0, -1.0], RED),
            vertex([1.0, -1.0, -1.0], GREEN),
            vertex([-1.0, -1.0, 1.0], BLUE),
            vertex([-1.0, 1.0, 1.0], YELLOW),
            vertex([1.0, 1.0, 1.0], CYAN),
            vertex([1.0, -1.0, 1.0], MAGENTA),
        ];

        #[rustfmt::skip]
        let indices: [u16; 36] = [
            // front
            0, 1, 2, 0, 2, 3,
            // back
            4, 6, 5, 4, 7, 6,
            // left
            4, 5, 1, 4, 1, 0,
            // right
            3, 2, 6, 3, 6, 7,
            // top
            1, 5, 6, 1, 6, 2,
            // bottom
            4, 0, 3, 4, 3, 7,
        ];

        Self::from_slices(&vertices, &indices)
    }
}

/// Handle to a mesh uploaded to the GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshId(pub u32);

/// Vertex and index buffers of an uploaded mesh
#[derive(Debug, Clone, Copy)]
pub struct GpuMesh {
    /// Vertex buffer binding
    pub vertex_view: VertexBufferView,
    /// Index buffer binding
    pub index_view: IndexBufferView,
    /// Number of indices to draw
    pub index_count: u32,
}

/// Owns every uploaded mesh, addressed by [`MeshId`]
#[derive(Debug, Default)]
pub struct MeshRegistry {
    meshes: Vec<GpuMesh>,
}

impl MeshRegistry {
    /// Id of the built-in box, always the first mesh uploaded
    pub const BOX: MeshId = MeshId(0);

    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Upload vertex and index data into new GPU buffers
    pub fn upload<B: GpuBackend>(&mut self, device: &mut Device<B>, data: &MeshData) -> RenderResult<MeshId> {
        if data.vertices.is_empty() || data.indices.is_empty() {
            return Err(RenderError::Initialization("mesh has no geometry".to_string()));
        }
        let vertex_buffer = device.backend_mut().create_buffer(
            &BufferDesc {
                size: data.vertices.len() as u64,
                usage: BufferUsage::Vertex,
            },
            &data.vertices,
        )?;
        let index_buffer = device.backend_mut().create_buffer(
            &BufferDesc {
                size: data.indices.len() as u64,
                usage: BufferUsage::Index,
            },
            &data.indices,
        )?;

        let id = MeshId(self.meshes.len() as u32);
        self.meshes.push(GpuMesh {
            vertex_view: VertexBufferView {
                buffer: vertex_buffer,
                size: data.vertices.len() as u32,
                stride: data.vertex_stride,
            },
            index_view: IndexBufferView {
                buffer: index_buffer,
                size: data.indices.len() as u32,
                format: data.index_format,
            },
            index_count: data.index_count(),
        });
        log::debug!(
            "Uploaded mesh {:?}: {} vertices, {} indices",
            id,
            data.vertex_count(),
            data.index_count()
        );
        Ok(id)
    }

    /// Look up an uploaded mesh
    pub fn get(&self, id: MeshId) -> Option<&GpuMesh> {
        self.meshes.get(id.0 as usize)
    }

    /// Number of uploaded meshes
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    /// Whether nothing was uploaded yet
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Buffers owned by the registry
    fn buffers(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.meshes
            .iter()
            .flat_map(|mesh| [mesh.vertex_view.buffer, mesh.index_view.buffer])
    }

    /// Release every buffer; the GPU must be idle
    pub fn release_all<B: GpuBackend>(&mut self, device: &mut Device<B>) {
        let buffers: Vec<ResourceId> = self.buffers().collect();
        for buffer in buffers {
            device.backend_mut().release_resource(buffer);
        }
        self.meshes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_geometry() {
        let mesh = MeshData::unit_box();
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.index_count(), 36);
        assert_eq!(mesh.vertex_stride, 28);

        let indices: Vec<u16> = mesh
            .indices
            .chunks_exact(2)
            .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
            .collect();
        assert!(indices.iter().all(|&i| i < 8));
    }

    #[test]
    fn test_input_layout_covers_stride() {
        let layout = ColorVertex::input_layout();
        let end = layout
            .iter()
            .map(|element| element.offset + element.format.size())
            .max()
            .unwrap();
        assert_eq!(end, ColorVertex::stride());
    }
}
