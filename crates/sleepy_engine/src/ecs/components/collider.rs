//! Sphere collider component

use crate::foundation::math::Vec3;

/// Bounding sphere centred on the entity's position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collider {
    /// Sphere radius in world units
    pub radius: f32,
}

impl Collider {
    /// Sphere of `radius`
    pub fn new(radius: f32) -> Self {
        Self { radius }
    }

    /// Whether two spheres overlap; touching spheres do not
    pub fn intersects(&self, position: &Vec3, other: &Self, other_position: &Vec3) -> bool {
        let reach = self.radius + other.radius;
        (position - other_position).norm_squared() < reach * reach
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_is_strict() {
        let a = Collider::new(1.0);
        let b = Collider::new(1.0);
        assert!(a.intersects(&Vec3::zeros(), &b, &Vec3::new(1.9, 0.0, 0.0)));
        assert!(!a.intersects(&Vec3::zeros(), &b, &Vec3::new(2.0, 0.0, 0.0)));
        assert!(!a.intersects(&Vec3::zeros(), &b, &Vec3::new(1.5, 1.5, 0.0)));
    }
}
