//! Sphere-sphere contact detection

use crate::ecs::components::{Collider, Transform};
use crate::ecs::{ComponentMask, Entity, EntityList, System, World};

/// Finds overlapping collider pairs every tick
#[derive(Debug, Default)]
pub struct CollisionSystem {
    entities: EntityList,
    contacts: Vec<(Entity, Entity)>,
}

impl CollisionSystem {
    /// Create an empty system
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs found during the last update, in registration order
    pub fn contacts(&self) -> &[(Entity, Entity)] {
        &self.contacts
    }
}

impl System for CollisionSystem {
    fn name(&self) -> &str {
        "collision"
    }

    fn required_components(&self) -> ComponentMask {
        ComponentMask::TRANSFORM | ComponentMask::COLLIDER
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
        self.contacts.clear();
    }

    fn update(&mut self, world: &mut World, _delta_time: f32) {
        self.contacts.clear();
        let bodies: Vec<_> = self
            .entities
            .as_slice()
            .iter()
            .filter_map(|&entity| {
                let transform = world.get::<Transform>(entity)?;
                let collider = world.get::<Collider>(entity)?;
                Some((entity, transform.position, *collider))
            })
            .collect();

        for (i, (a, a_position, a_collider)) in bodies.iter().enumerate() {
            for (b, b_position, b_collider) in &bodies[i + 1..] {
                if a_collider.intersects(a_position, b_collider, b_position) {
                    self.contacts.push((*a, *b));
                }
            }
        }
        if !self.contacts.is_empty() {
            log::debug!("{} contacts this tick", self.contacts.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;

    fn body(world: &mut World, x: f32, radius: f32) -> Entity {
        let entity = world.spawn();
        world
            .insert(entity, Transform::from_position(Vec3::new(x, 0.0, 0.0)))
            .unwrap();
        world.insert(entity, Collider::new(radius)).unwrap();
        entity
    }

    #[test]
    fn test_reports_each_overlapping_pair_once() {
        let mut world = World::new();
        let a = body(&mut world, 0.0, 1.0);
        let b = body(&mut world, 1.5, 1.0);
        let far = body(&mut world, 10.0, 1.0);

        let mut system = CollisionSystem::new();
        for entity in [a, b, far] {
            system.add_entity(&world, entity).unwrap();
        }
        system.update(&mut world, 0.016);
        assert_eq!(system.contacts(), &[(a, b)]);

        world.get_mut::<Transform>(b).unwrap().position = Vec3::new(5.0, 0.0, 0.0);
        system.update(&mut world, 0.016);
        assert!(system.contacts().is_empty());
    }
}
