//! Component trait and capability mask

use bitflags::bitflags;
use slotmap::SecondaryMap;

use super::{Entity, World};

bitflags! {
    /// Which components an entity carries, and which a system requires
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ComponentMask: u32 {
        /// [`Transform`](super::components::Transform)
        const TRANSFORM = 1 << 0;
        /// [`MeshReference`](super::components::MeshReference)
        const MESH_REFERENCE = 1 << 1;
        /// [`ShaderReference`](super::components::ShaderReference)
        const SHADER_REFERENCE = 1 << 2;
        /// [`Velocity`](super::components::Velocity)
        const VELOCITY = 1 << 3;
        /// [`Collider`](super::components::Collider)
        const COLLIDER = 1 << 4;
    }
}

/// Data attachable to an entity
///
/// Each component type has its own storage in the [`World`] and one bit in the
/// [`ComponentMask`].
pub trait Component: Sized + 'static {
    /// Capability bit of this component type
    const MASK: ComponentMask;

    /// Storage of this component type
    fn storage(world: &World) -> &SecondaryMap<Entity, Self>;

    /// Mutable storage of this component type
    fn storage_mut(world: &mut World) -> &mut SecondaryMap<Entity, Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superset_check() {
        let entity = ComponentMask::TRANSFORM | ComponentMask::MESH_REFERENCE | ComponentMask::SHADER_REFERENCE;
        assert!(entity.contains(ComponentMask::TRANSFORM | ComponentMask::MESH_REFERENCE));
        assert!(!ComponentMask::MESH_REFERENCE.contains(ComponentMask::TRANSFORM | ComponentMask::MESH_REFERENCE));
        assert!(entity.contains(ComponentMask::empty()));
    }

    #[test]
    fn test_bit_values() {
        assert_eq!(ComponentMask::TRANSFORM.bits(), 1);
        assert_eq!(ComponentMask::MESH_REFERENCE.bits(), 2);
        assert_eq!(ComponentMask::SHADER_REFERENCE.bits(), 4);
    }
}
