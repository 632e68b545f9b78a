//! System trait and the entity bookkeeping shared by systems
//!
//! A system processes the entities registered with it. Registration is gated on
//! the entity's capability mask containing the system's required mask.

use thiserror::Error;

use super::{ComponentMask, Entity, World};

/// ECS errors; all recoverable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// The entity lacks components the system requires
    #[error("{entity:?} has {present:?} but system '{system}' requires {required:?}")]
    MissingComponents {
        /// Rejected entity
        entity: Entity,
        /// System that rejected it
        system: String,
        /// Mask the system requires
        required: ComponentMask,
        /// Mask the entity carries
        present: ComponentMask,
    },

    /// Removal of an entity the system does not hold
    #[error("{entity:?} is not registered with system '{system}'")]
    NotInSystem {
        /// Entity
        entity: Entity,
        /// System
        system: String,
    },

    /// The entity id is stale or was never issued
    #[error("{0:?} does not exist")]
    NoSuchEntity(Entity),
}

/// Result type for ECS operations
pub type EcsResult<T> = Result<T, EcsError>;

/// Ordered set of entities registered with a system
#[derive(Debug, Default, Clone)]
pub struct EntityList {
    entities: Vec<Entity>,
}

impl EntityList {
    /// Append unless already present
    pub fn add(&mut self, entity: Entity) {
        if !self.entities.contains(&entity) {
            self.entities.push(entity);
        }
    }

    /// Remove, keeping order; `false` if absent
    pub fn remove(&mut self, entity: Entity) -> bool {
        match self.entities.iter().position(|&e| e == entity) {
            Some(index) => {
                self.entities.remove(index);
                true
            }
            None => false,
        }
    }

    /// Registered entities in registration order
    pub fn as_slice(&self) -> &[Entity] {
        &self.entities
    }

    /// Forget every entity
    pub fn clear(&mut self) {
        self.entities.clear();
    }
}

/// System trait for processing entities and components
pub trait System {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Components an entity must carry to be processed
    fn required_components(&self) -> ComponentMask;

    /// Entities currently registered
    fn entities(&self) -> &[Entity];

    /// Register without checking the mask
    ///
    /// Precondition: the caller has verified that the entity's mask contains
    /// [`System::required_components`].
    fn add_entity_unchecked(&mut self, entity: Entity);

    /// Unregister without checking the mask; returns whether it was registered
    ///
    /// Precondition: the caller has verified that the entity's mask contains
    /// [`System::required_components`].
    fn remove_entity_unchecked(&mut self, entity: Entity) -> bool;

    /// Forget every registered entity
    fn clear_entities(&mut self);

    /// Process registered entities for one tick
    fn update(&mut self, world: &mut World, delta_time: f32);

    /// Register after checking the entity carries the required components
    fn add_entity(&mut self, world: &World, entity: Entity) -> EcsResult<()> {
        check_components(self.name(), self.required_components(), world, entity)?;
        self.add_entity_unchecked(entity);
        Ok(())
    }

    /// Unregister after checking the entity carries the required components
    fn remove_entity(&mut self, world: &World, entity: Entity) -> EcsResult<()> {
        check_components(self.name(), self.required_components(), world, entity)?;
        if self.remove_entity_unchecked(entity) {
            Ok(())
        } else {
            Err(EcsError::NotInSystem {
                entity,
                system: self.name().to_string(),
            })
        }
    }
}

fn check_components(system: &str, required: ComponentMask, world: &World, entity: Entity) -> EcsResult<()> {
    let present = world.mask(entity)?;
    if present.contains(required) {
        Ok(())
    } else {
        log::debug!(
            "System '{}' rejected {:?}: has {:?}, requires {:?}",
            system,
            entity,
            present,
            required
        );
        Err(EcsError::MissingComponents {
            entity,
            system: system.to_string(),
            required,
            present,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::components::{MeshReference, Transform};
    use crate::render::MeshId;

    struct Recorder {
        entities: EntityList,
        ticks: u32,
    }

    impl System for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn required_components(&self) -> ComponentMask {
            ComponentMask::TRANSFORM | ComponentMask::MESH_REFERENCE
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

        fn update(&mut self, _world: &mut World, _delta_time: f32) {
            self.ticks += 1;
        }
    }

    fn recorder() -> Recorder {
        Recorder {
            entities: EntityList::default(),
            ticks: 0,
        }
    }

    #[test]
    fn test_add_rejects_missing_components() {
        let mut world = World::new();
        let entity = world.spawn();
        world.insert(entity, MeshReference::new(MeshId(0))).unwrap();

        let mut system = recorder();
        let err = system.add_entity(&world, entity).unwrap_err();
        assert_eq!(
            err,
            EcsError::MissingComponents {
                entity,
                system: "recorder".to_string(),
                required: ComponentMask::TRANSFORM | ComponentMask::MESH_REFERENCE,
                present: ComponentMask::MESH_REFERENCE,
            }
        );
        assert!(system.entities().is_empty());
    }

    #[test]
    fn test_add_accepts_superset_once() {
        let mut world = World::new();
        let entity = world.spawn();
        world.insert(entity, MeshReference::new(MeshId(0))).unwrap();
        world.insert(entity, Transform::identity()).unwrap();

        let mut system = recorder();
        system.add_entity(&world, entity).unwrap();
        system.add_entity(&world, entity).unwrap();
        assert_eq!(system.entities(), &[entity]);
    }

    #[test]
    fn test_remove_validates_and_reports_absence() {
        let mut world = World::new();
        let entity = world.spawn();
        world.insert(entity, MeshReference::new(MeshId(0))).unwrap();
        world.insert(entity, Transform::identity()).unwrap();

        let mut system = recorder();
        assert!(matches!(
            system.remove_entity(&world, entity),
            Err(EcsError::NotInSystem { .. })
        ));
        system.add_entity(&world, entity).unwrap();
        system.remove_entity(&world, entity).unwrap();
        assert!(system.entities().is_empty());
    }

    #[test]
    fn test_unchecked_skips_validation() {
        let mut world = World::new();
        let entity = world.spawn();
        let mut system = recorder();
        system.add_entity_unchecked(entity);
        assert_eq!(system.entities(), &[entity]);
        system.update(&mut world, 0.016);
        assert_eq!(system.ticks, 1);
    }
}
