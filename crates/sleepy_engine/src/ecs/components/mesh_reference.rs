//! Mesh reference component

use crate::render::MeshId;

/// Which uploaded mesh draws this entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshReference {
    /// Mesh in the renderer's registry
    pub mesh: MeshId,
}

impl MeshReference {
    /// Reference a registered mesh
    pub fn new(mesh: MeshId) -> Self {
        Self { mesh }
    }
}
