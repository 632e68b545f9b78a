//! Entity factory
//!
//! Assembles the stock entity archetypes from components. Every archetype draws
//! with the vertex-colour shader and the mesh the factory was built with.

use super::components::{Collider, MeshReference, ShaderReference, Transform, Velocity};
use super::{EcsResult, Entity, World};
use crate::foundation::math::Vec3;
use crate::render::MeshId;

/// Speed of a freshly fired bullet, units per second
pub const BULLET_SPEED: f32 = 20.0;

/// Builds player, enemy, bullet, sphere and skybox entities
#[derive(Debug, Clone, Copy)]
pub struct EntityFactory {
    mesh: MeshId,
    shader: ShaderReference,
}

impl EntityFactory {
    /// Factory drawing every entity with `mesh`
    pub fn new(mesh: MeshId) -> Self {
        Self {
            mesh,
            shader: ShaderReference::color(),
        }
    }

    fn drawable(&self, world: &mut World, transform: Transform) -> EcsResult<Entity> {
        let entity = world.spawn();
        world.insert(entity, transform)?;
        world.insert(entity, MeshReference::new(self.mesh))?;
        world.insert(entity, self.shader)?;
        Ok(entity)
    }

    /// Player at `position`, at rest
    pub fn spawn_player(&self, world: &mut World, position: Vec3) -> EcsResult<Entity> {
        let entity = self.drawable(world, Transform::from_position(position))?;
        world.insert(entity, Velocity::default())?;
        world.insert(entity, Collider::new(1.0))?;
        Ok(entity)
    }

    /// Enemy at `position` drifting with `velocity`
    pub fn spawn_enemy(&self, world: &mut World, position: Vec3, velocity: Vec3) -> EcsResult<Entity> {
        let mut transform = Transform::from_position(position);
        transform.look_at(position + velocity);
        let entity = self.drawable(world, transform)?;
        world.insert(entity, Velocity { linear: velocity })?;
        world.insert(entity, Collider::new(1.0))?;
        Ok(entity)
    }

    /// Small fast projectile leaving `origin` along `direction`
    pub fn spawn_bullet(&self, world: &mut World, origin: Vec3, direction: Vec3) -> EcsResult<Entity> {
        let direction = direction.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::z);
        let mut transform = Transform::from_position(origin).with_uniform_scale(0.2);
        transform.look_at(origin + direction);
        let entity = self.drawable(world, transform)?;
        world.insert(
            entity,
            Velocity {
                linear: direction * BULLET_SPEED,
            },
        )?;
        world.insert(entity, Collider::new(0.2))?;
        Ok(entity)
    }

    /// Static collidable body of `radius`
    pub fn spawn_sphere(&self, world: &mut World, position: Vec3, radius: f32) -> EcsResult<Entity> {
        let entity = self.drawable(world, Transform::from_position(position).with_uniform_scale(radius))?;
        world.insert(entity, Collider::new(radius))?;
        Ok(entity)
    }

    /// Large backdrop around the origin; drawn but never collides
    pub fn spawn_skybox(&self, world: &mut World) -> EcsResult<Entity> {
        self.drawable(world, Transform::identity().with_uniform_scale(500.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::ComponentMask;
    use approx::assert_relative_eq;

    #[test]
    fn test_archetype_masks() {
        let mut world = World::new();
        let factory = EntityFactory::new(MeshId(0));
        let drawable = ComponentMask::TRANSFORM | ComponentMask::MESH_REFERENCE | ComponentMask::SHADER_REFERENCE;

        let player = factory.spawn_player(&mut world, Vec3::zeros()).unwrap();
        let sphere = factory.spawn_sphere(&mut world, Vec3::x(), 2.0).unwrap();
        let skybox = factory.spawn_skybox(&mut world).unwrap();

        assert_eq!(
            world.mask(player).unwrap(),
            drawable | ComponentMask::VELOCITY | ComponentMask::COLLIDER
        );
        assert_eq!(world.mask(sphere).unwrap(), drawable | ComponentMask::COLLIDER);
        assert_eq!(world.mask(skybox).unwrap(), drawable);
    }

    #[test]
    fn test_bullet_moves_along_direction() {
        let mut world = World::new();
        let factory = EntityFactory::new(MeshId(0));
        let bullet = factory
            .spawn_bullet(&mut world, Vec3::zeros(), Vec3::new(0.0, 0.0, -3.0))
            .unwrap();
        let velocity = world.get::<Velocity>(bullet).unwrap();
        assert_relative_eq!(velocity.linear, Vec3::new(0.0, 0.0, -BULLET_SPEED), epsilon = 1e-5);
    }
}
