//! Shader reference component

/// Shader programs the renderer provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShaderKind {
    /// Per-vertex colour, one world-view-projection constant
    #[default]
    Color,
}

/// Which shader draws this entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShaderReference {
    /// Program to use
    pub shader: ShaderKind,
}

impl ShaderReference {
    /// The vertex-colour shader
    pub fn color() -> Self {
        Self {
            shader: ShaderKind::Color,
        }
    }
}
