//! Transform component
//!
//! Position, orientation and scale in world space (Y-up, right-handed).

use crate::foundation::math::{Mat4, Point3, Quat, Vec3};

/// World-space placement of an entity
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// World space position
    pub position: Vec3,

    /// World space rotation
    pub rotation: Quat,

    /// Per-axis scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create from position only
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Builder-style uniform scale
    pub fn with_uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::new(scale, scale, scale);
        self
    }

    /// Move to an absolute position
    pub fn set_position(&mut self, x: f32, y: f32, z: f32) {
        self.position = Vec3::new(x, y, z);
    }

    /// Set per-axis scale
    pub fn set_scale(&mut self, x: f32, y: f32, z: f32) {
        self.scale = Vec3::new(x, y, z);
    }

    /// Replace the orientation with Euler angles in radians
    pub fn set_rotation(&mut self, yaw: f32, pitch: f32, roll: f32) {
        self.rotation = Quat::from_euler_angles(roll, pitch, yaw);
    }

    /// Apply an additional rotation (radians) on top of the current one
    pub fn rotate(&mut self, yaw: f32, pitch: f32, roll: f32) {
        self.rotation = Quat::from_euler_angles(roll, pitch, yaw) * self.rotation;
    }

    /// Orient the forward axis towards `target`; no-op when already there
    pub fn look_at(&mut self, target: Vec3) {
        let direction = target - self.position;
        if direction.norm_squared() <= f32::EPSILON {
            return;
        }
        let up = if direction.cross(&Vec3::y()).norm_squared() <= f32::EPSILON {
            Vec3::z()
        } else {
            Vec3::y()
        };
        self.rotation = Quat::face_towards(&direction, &up);
    }

    /// Unit vector the entity faces (+Z in local space)
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::z()
    }

    /// World matrix: translation * rotation * scale
    pub fn matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }

    /// Transform a local-space point into world space
    pub fn transform_point(&self, point: Point3) -> Point3 {
        self.matrix().transform_point(&point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_matrix_applies_scale_then_translation() {
        let transform = Transform::from_position(Vec3::new(1.0, 2.0, 3.0)).with_uniform_scale(2.0);
        let p = transform.transform_point(Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Point3::new(3.0, 2.0, 3.0), epsilon = 1e-6);
    }

    #[test]
    fn test_look_at_points_forward_at_target() {
        let mut transform = Transform::identity();
        transform.look_at(Vec3::new(10.0, 0.0, 0.0));
        assert_relative_eq!(transform.forward(), Vec3::x(), epsilon = 1e-5);
    }

    #[test]
    fn test_look_at_straight_up_does_not_degenerate() {
        let mut transform = Transform::identity();
        transform.look_at(Vec3::new(0.0, 5.0, 0.0));
        assert_relative_eq!(transform.forward(), Vec3::y(), epsilon = 1e-5);
    }
}
