//! Game states: a world, its systems, and a stack of active states
//!
//! A [`GameState`] owns the entities of one scene and the systems that update
//! them. States stack: pushing a state exits the current one, popping releases
//! the top state and re-enters the one below it.

use super::components::{MeshReference, Transform};
use super::{ComponentMask, EcsError, EcsResult, Entity, System, World};
use crate::render::{DrawDataSource, DrawItem};

/// Components an entity needs to be drawn
pub const DRAWABLE: ComponentMask = ComponentMask::TRANSFORM
    .union(ComponentMask::MESH_REFERENCE)
    .union(ComponentMask::SHADER_REFERENCE);

/// One scene: world, systems and registered entities
pub struct GameState {
    name: String,
    world: World,
    systems: Vec<Box<dyn System>>,
    entities: Vec<Entity>,
    active: bool,
}

impl GameState {
    /// Empty state
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            world: World::new(),
            systems: Vec::new(),
            entities: Vec::new(),
            active: false,
        }
    }

    /// State name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entities and components
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable entities and components
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Append a system; systems update in the order they were added
    pub fn add_system(&mut self, system: Box<dyn System>) {
        log::debug!("State '{}': added system '{}'", self.name, system.name());
        self.systems.push(system);
    }

    /// Registered systems in update order
    pub fn systems(&self) -> &[Box<dyn System>] {
        &self.systems
    }

    /// Entities registered with this state
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Register an entity with the state and with every system it qualifies for
    ///
    /// Returns the number of systems that took the entity.
    pub fn add_entity(&mut self, entity: Entity) -> EcsResult<usize> {
        let mask = self.world.mask(entity)?;
        let mut joined = 0;
        for system in &mut self.systems {
            if mask.contains(system.required_components()) {
                // Mask checked above
                system.add_entity_unchecked(entity);
                joined += 1;
            }
        }
        if !self.entities.contains(&entity) {
            self.entities.push(entity);
        }
        Ok(joined)
    }

    /// Unregister an entity from the state and every system holding it
    pub fn remove_entity(&mut self, entity: Entity) -> EcsResult<usize> {
        let position = self
            .entities
            .iter()
            .position(|&e| e == entity)
            .ok_or_else(|| EcsError::NotInSystem {
                entity,
                system: self.name.clone(),
            })?;
        self.entities.remove(position);
        let left = self
            .systems
            .iter_mut()
            .map(|system| system.remove_entity_unchecked(entity))
            .filter(|&removed| removed)
            .count();
        Ok(left)
    }

    /// Run every system once, in registration order
    pub fn update(&mut self, delta_time: f32) {
        for system in &mut self.systems {
            system.update(&mut self.world, delta_time);
        }
    }

    /// Called when the state becomes the top of the stack
    pub fn enter(&mut self) {
        self.active = true;
        log::info!("Entering state '{}'", self.name);
    }

    /// Called when the state stops being the top of the stack
    pub fn exit(&mut self) {
        self.active = false;
        log::info!("Leaving state '{}'", self.name);
    }

    /// Whether the state is the top of its stack
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Destroy every registered entity and empty every system
    ///
    /// Returns the number of entities destroyed.
    pub fn release(&mut self) -> usize {
        for system in &mut self.systems {
            system.clear_entities();
        }
        let released = self
            .entities
            .drain(..)
            .filter(|&entity| self.world.despawn(entity))
            .count();
        log::debug!("State '{}': released {} entities", self.name, released);
        released
    }
}

impl DrawDataSource for GameState {
    fn collect_draw_items(&self, out: &mut Vec<DrawItem>) {
        for &entity in &self.entities {
            let Ok(mask) = self.world.mask(entity) else {
                continue;
            };
            if !mask.contains(DRAWABLE) {
                continue;
            }
            if let (Some(transform), Some(mesh)) = (
                self.world.get::<Transform>(entity),
                self.world.get::<MeshReference>(entity),
            ) {
                out.push(DrawItem {
                    mesh: mesh.mesh,
                    world: transform.matrix(),
                });
            }
        }
    }
}

/// Stack of game states; only the top one updates and draws
#[derive(Default)]
pub struct GameStateStack {
    states: Vec<GameState>,
}

impl GameStateStack {
    /// Empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `state` current; the previous top exits but keeps its entities
    pub fn push(&mut self, mut state: GameState) {
        if let Some(current) = self.states.last_mut() {
            current.exit();
        }
        state.enter();
        self.states.push(state);
    }

    /// Exit and release the current state; the previous one re-enters
    pub fn pop(&mut self) -> Option<GameState> {
        let mut state = self.states.pop()?;
        state.exit();
        state.release();
        if let Some(previous) = self.states.last_mut() {
            previous.enter();
        }
        Some(state)
    }

    /// Top state
    pub fn current(&self) -> Option<&GameState> {
        self.states.last()
    }

    /// Mutable top state
    pub fn current_mut(&mut self) -> Option<&mut GameState> {
        self.states.last_mut()
    }

    /// State below the top, resumed when the top is popped
    pub fn previous(&self) -> Option<&GameState> {
        self.states.iter().rev().nth(1)
    }

    /// Number of stacked states
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no state is stacked
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Update the top state
    pub fn update(&mut self, delta_time: f32) {
        if let Some(state) = self.states.last_mut() {
            state.update(delta_time);
        }
    }

    /// Pop and release every state, top first
    pub fn release_all(&mut self) {
        while self.pop().is_some() {}
    }
}

impl DrawDataSource for GameStateStack {
    fn collect_draw_items(&self, out: &mut Vec<DrawItem>) {
        if let Some(state) = self.current() {
            state.collect_draw_items(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::components::{Collider, Velocity};
    use crate::ecs::factory::EntityFactory;
    use crate::ecs::systems::{CollisionSystem, MovementSystem};
    use crate::foundation::math::Vec3;
    use crate::render::MeshId;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Probe {
        label: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
        entities: crate::ecs::EntityList,
    }

    impl System for Probe {
        fn name(&self) -> &str {
            self.label
        }
        fn required_components(&self) -> ComponentMask {
            ComponentMask::empty()
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
            self.log.borrow_mut().push(self.label);
        }
    }

    #[test]
    fn test_update_visits_systems_once_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut state = GameState::new("test");
        for label in ["first", "second", "third"] {
            state.add_system(Box::new(Probe {
                label,
                log: Rc::clone(&log),
                entities: Default::default(),
            }));
        }
        state.update(0.016);
        state.update(0.016);
        assert_eq!(
            *log.borrow(),
            vec!["first", "second", "third", "first", "second", "third"]
        );
    }

    #[test]
    fn test_add_entity_routes_by_mask() {
        let mut state = GameState::new("routing");
        state.add_system(Box::new(MovementSystem::new()));
        state.add_system(Box::new(CollisionSystem::new()));

        let world = state.world_mut();
        let mover = world.spawn();
        world.insert(mover, Transform::identity()).unwrap();
        world.insert(mover, Velocity::new(1.0, 0.0, 0.0)).unwrap();
        let static_body = world.spawn();
        world.insert(static_body, Transform::identity()).unwrap();
        world.insert(static_body, Collider::new(1.0)).unwrap();

        assert_eq!(state.add_entity(mover).unwrap(), 1);
        assert_eq!(state.add_entity(static_body).unwrap(), 1);
        assert_eq!(state.systems()[0].entities(), &[mover]);
        assert_eq!(state.systems()[1].entities(), &[static_body]);

        assert_eq!(state.remove_entity(mover).unwrap(), 1);
        assert!(state.systems()[0].entities().is_empty());
        assert!(state.remove_entity(mover).is_err());
    }

    #[test]
    fn test_release_destroys_entities_in_bulk() {
        let mut state = GameState::new("level");
        state.add_system(Box::new(MovementSystem::new()));
        let factory = EntityFactory::new(MeshId(0));
        for i in 0..4 {
            let entity = factory
                .spawn_player(state.world_mut(), Vec3::new(i as f32, 0.0, 0.0))
                .unwrap();
            state.add_entity(entity).unwrap();
        }
        assert_eq!(state.release(), 4);
        assert!(state.world().is_empty());
        assert!(state.entities().is_empty());
        assert!(state.systems()[0].entities().is_empty());
    }

    #[test]
    fn test_draw_items_only_for_drawable_entities() {
        let mut state = GameState::new("draw");
        let factory = EntityFactory::new(MeshId(0));
        let drawn = factory.spawn_sphere(state.world_mut(), Vec3::new(1.0, 2.0, 3.0), 1.0).unwrap();
        let hidden = state.world_mut().spawn();
        state.world_mut().insert(hidden, Transform::identity()).unwrap();
        state.add_entity(drawn).unwrap();
        state.add_entity(hidden).unwrap();

        let mut items = Vec::new();
        state.collect_draw_items(&mut items);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].mesh, MeshId(0));
        assert_eq!(items[0].world[(0, 3)], 1.0);
        assert_eq!(items[0].world[(2, 3)], 3.0);
    }

    #[test]
    fn test_stack_enter_exit_and_previous_link() {
        let mut stack = GameStateStack::new();
        stack.push(GameState::new("menu"));
        assert!(stack.current().unwrap().is_active());

        stack.push(GameState::new("level"));
        assert_eq!(stack.current().unwrap().name(), "level");
        assert_eq!(stack.previous().unwrap().name(), "menu");
        assert!(!stack.previous().unwrap().is_active());

        let popped = stack.pop().unwrap();
        assert_eq!(popped.name(), "level");
        assert!(!popped.is_active());
        assert!(stack.current().unwrap().is_active());
        assert!(stack.previous().is_none());

        stack.release_all();
        assert!(stack.is_empty());
    }
}
