//! Entity-Component-System implementation
//!
//! Entities are generational slotmap keys, components live in per-type
//! secondary maps and systems are trait objects gated by a capability mask.

pub mod component;
pub mod components;
pub mod entity;
pub mod factory;
pub mod game_state;
pub mod system;
pub mod systems;
pub mod world;

pub use component::{Component, ComponentMask};
pub use entity::Entity;
pub use factory::EntityFactory;
pub use game_state::{GameState, GameStateStack};
pub use system::{EcsError, EcsResult, EntityList, System};
pub use world::World;
