//! Velocity component

use crate::foundation::math::Vec3;

/// Linear velocity in units per second
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Velocity {
    /// Units per second along each axis
    pub linear: Vec3,
}

impl Velocity {
    /// Velocity from components
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            linear: Vec3::new(x, y, z),
        }
    }

    /// Replace the velocity
    pub fn set(&mut self, x: f32, y: f32, z: f32) {
        self.linear = Vec3::new(x, y, z);
    }
}
