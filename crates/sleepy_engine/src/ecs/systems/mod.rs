//! Built-in systems

mod collision;
mod movement;

pub use collision::CollisionSystem;
pub use movement::MovementSystem;
