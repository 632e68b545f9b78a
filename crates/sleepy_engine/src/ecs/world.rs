//! ECS World implementation
//!
//! Entities are slotmap keys whose value is the entity's capability mask;
//! every component type lives in its own secondary map.

use slotmap::{SecondaryMap, SlotMap};

use super::components::{Collider, MeshReference, ShaderReference, Transform, Velocity};
use super::{Component, ComponentMask, EcsError, EcsResult, Entity};

/// Per-type component storage
#[derive(Default)]
pub(crate) struct Storages {
    pub(crate) transforms: SecondaryMap<Entity, Transform>,
    pub(crate) meshes: SecondaryMap<Entity, MeshReference>,
    pub(crate) shaders: SecondaryMap<Entity, ShaderReference>,
    pub(crate) velocities: SecondaryMap<Entity, Velocity>,
    pub(crate) colliders: SecondaryMap<Entity, Collider>,
}

impl Storages {
    fn remove_all(&mut self, entity: Entity) {
        self.transforms.remove(entity);
        self.meshes.remove(entity);
        self.shaders.remove(entity);
        self.velocities.remove(entity);
        self.colliders.remove(entity);
    }
}

/// ECS World containing all entities and components
#[derive(Default)]
pub struct World {
    entities: SlotMap<Entity, ComponentMask>,
    pub(crate) storages: Storages,
}

impl World {
    /// Create an empty world
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entity with no components
    pub fn spawn(&mut self) -> Entity {
        self.entities.insert(ComponentMask::empty())
    }

    /// Destroy an entity and its components; `false` if it was already gone
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if self.entities.remove(entity).is_some() {
            self.storages.remove_all(entity);
            true
        } else {
            false
        }
    }

    /// Whether `entity` is alive
    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.contains_key(entity)
    }

    /// Capability mask of a live entity
    pub fn mask(&self, entity: Entity) -> EcsResult<ComponentMask> {
        self.entities
            .get(entity)
            .copied()
            .ok_or(EcsError::NoSuchEntity(entity))
    }

    /// Attach (or replace) a component and set its mask bit
    pub fn insert<C: Component>(&mut self, entity: Entity, component: C) -> EcsResult<()> {
        let mask = self
            .entities
            .get_mut(entity)
            .ok_or(EcsError::NoSuchEntity(entity))?;
        mask.insert(C::MASK);
        C::storage_mut(self).insert(entity, component);
        Ok(())
    }

    /// Detach a component and clear its mask bit
    pub fn remove<C: Component>(&mut self, entity: Entity) -> Option<C> {
        let mask = self.entities.get_mut(entity)?;
        mask.remove(C::MASK);
        C::storage_mut(self).remove(entity)
    }

    /// Borrow a component
    pub fn get<C: Component>(&self, entity: Entity) -> Option<&C> {
        C::storage(self).get(entity)
    }

    /// Mutably borrow a component
    pub fn get_mut<C: Component>(&mut self, entity: Entity) -> Option<&mut C> {
        C::storage_mut(self).get_mut(entity)
    }

    /// Live entities with their masks
    pub fn entities(&self) -> impl Iterator<Item = (Entity, ComponentMask)> + '_ {
        self.entities.iter().map(|(entity, mask)| (entity, *mask))
    }

    /// Live entities whose mask contains `required`
    pub fn matching(&self, required: ComponentMask) -> impl Iterator<Item = Entity> + '_ {
        self.entities
            .iter()
            .filter(move |(_, mask)| mask.contains(required))
            .map(|(entity, _)| entity)
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entity is alive
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Destroy every entity
    pub fn clear(&mut self) {
        self.entities.clear();
        self.storages = Storages::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;

    #[test]
    fn test_insert_sets_mask_bits() {
        let mut world = World::new();
        let entity = world.spawn();
        world.insert(entity, Transform::identity()).unwrap();
        world.insert(entity, Velocity::new(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(
            world.mask(entity).unwrap(),
            ComponentMask::TRANSFORM | ComponentMask::VELOCITY
        );

        let removed = world.remove::<Velocity>(entity);
        assert_eq!(removed, Some(Velocity::new(1.0, 0.0, 0.0)));
        assert_eq!(world.mask(entity).unwrap(), ComponentMask::TRANSFORM);
    }

    #[test]
    fn test_despawn_invalidates_id_and_components() {
        let mut world = World::new();
        let entity = world.spawn();
        world.insert(entity, Transform::from_position(Vec3::x())).unwrap();
        assert!(world.despawn(entity));
        assert!(!world.despawn(entity));
        assert!(world.get::<Transform>(entity).is_none());
        assert!(matches!(world.mask(entity), Err(EcsError::NoSuchEntity(e)) if e == entity));

        // A new entity reusing the slot is a different id
        let reused = world.spawn();
        assert_ne!(reused, entity);
        assert!(world.get::<Transform>(reused).is_none());
    }

    #[test]
    fn test_insert_on_dead_entity_fails() {
        let mut world = World::new();
        let entity = world.spawn();
        world.despawn(entity);
        assert!(world.insert(entity, Collider::new(1.0)).is_err());
    }

    #[test]
    fn test_matching_filters_by_superset() {
        let mut world = World::new();
        let both = world.spawn();
        world.insert(both, Transform::identity()).unwrap();
        world.insert(both, Collider::new(1.0)).unwrap();
        let only_transform = world.spawn();
        world.insert(only_transform, Transform::identity()).unwrap();

        let matching: Vec<_> = world
            .matching(ComponentMask::TRANSFORM | ComponentMask::COLLIDER)
            .collect();
        assert_eq!(matching, vec![both]);
        assert_eq!(world.matching(ComponentMask::TRANSFORM).count(), 2);
    }
}
