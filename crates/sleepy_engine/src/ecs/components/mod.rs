//! Component types

mod collider;
mod mesh_reference;
mod shader_reference;
mod transform;
mod velocity;

pub use collider::Collider;
pub use mesh_reference::MeshReference;
pub use shader_reference::{ShaderKind, ShaderReference};
pub use transform::Transform;
pub use velocity::Velocity;

/// Wire a component type to its mask bit and its storage field in the world
macro_rules! impl_component {
    ($component:ty, $mask:ident, $field:ident) => {
        impl crate::ecs::Component for $component {
            const MASK: crate::ecs::ComponentMask = crate::ecs::ComponentMask::$mask;

            fn storage(world: &crate::ecs::World) -> &slotmap::SecondaryMap<crate::ecs::Entity, Self> {
                &world.storages.$field
            }

            fn storage_mut(world: &mut crate::ecs::World) -> &mut slotmap::SecondaryMap<crate::ecs::Entity, Self> {
                &mut world.storages.$field
            }
        }
    };
}

impl_component!(Transform, TRANSFORM, transforms);
impl_component!(MeshReference, MESH_REFERENCE, meshes);
impl_component!(ShaderReference, SHADER_REFERENCE, shaders);
impl_component!(Velocity, VELOCITY, velocities);
impl_component!(Collider, COLLIDER, colliders);
