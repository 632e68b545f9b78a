//! Velocity integration

use crate::ecs::components::{Transform, Velocity};
use crate::ecs::{ComponentMask, Entity, EntityList, System, World};

/// Moves entities by their velocity every tick
#[derive(Debug, Default)]
pub struct MovementSystem {
    entities: EntityList,
}

impl MovementSystem {
    /// Create an empty system
    pub fn new() -> Self {
        Self::default()
    }
}

impl System for MovementSystem {
    fn name(&self) -> &str {
        "movement"
    }

    fn required_components(&self) -> ComponentMask {
        ComponentMask::TRANSFORM | ComponentMask::VELOCITY
    }

    fn entities(&self) -> &[Entity] {
        self.entities.as_slice()
    }

    fn add_entity_unchecked(&mut self, entity: Entity) {
        self.entities.add(entity);
    }

    fn remove_entity_unchecked(&mut self, entity: Entity) -> bool {
        self.entities.remove(entity)
    }

    fn clear_entities(&mut self) {
        self.entities.clear();
    }

    fn update(&mut self, world: &mut World, delta_time: f32) {
        for &entity in self.entities.as_slice() {
            let Some(velocity) = world.get::<Velocity>(entity).copied() else {
                continue;
            };
            if let Some(transform) = world.get_mut::<Transform>(entity) {
                transform.position += velocity.linear * delta_time;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use approx::assert_relative_eq;

    #[test]
    fn test_position_integrates_velocity() {
        let mut world = World::new();
        let entity = world.spawn();
        world.insert(entity, Transform::identity()).unwrap();
        world.insert(entity, Velocity::new(2.0, 0.0, -1.0)).unwrap();

        let mut system = MovementSystem::new();
        system.add_entity(&world, entity).unwrap();
        system.update(&mut world, 0.5);
        system.update(&mut world, 0.5);

        let position = world.get::<Transform>(entity).unwrap().position;
        assert_relative_eq!(position, Vec3::new(2.0, 0.0, -1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_despawned_entities_are_skipped() {
        let mut world = World::new();
        let entity = world.spawn();
        world.insert(entity, Transform::identity()).unwrap();
        world.insert(entity, Velocity::new(1.0, 0.0, 0.0)).unwrap();

        let mut system = MovementSystem::new();
        system.add_entity(&world, entity).unwrap();
        world.despawn(entity);
        system.update(&mut world, 1.0);
    }
}
