//! Contract between the simulation and the renderer

use super::mesh::MeshId;
use crate::foundation::math::Mat4;

/// One object to draw this frame
#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    /// Uploaded mesh to draw
    pub mesh: MeshId,
    /// Object to world transform
    pub world: Mat4,
}

/// Anything that can produce the draw list for a frame
pub trait DrawDataSource {
    /// Append this frame's draw items to `out`
    fn collect_draw_items(&self, out: &mut Vec<DrawItem>);
}

impl DrawDataSource for [DrawItem] {
    fn collect_draw_items(&self, out: &mut Vec<DrawItem>) {
        out.extend_from_slice(self);
    }
}
