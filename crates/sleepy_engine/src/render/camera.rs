//! Orbit camera
//!
//! The camera sits on a sphere around a target point, addressed by spherical
//! coordinates (radius, polar angle `phi`, azimuth `theta`). Projection follows
//! Vulkan clip-space conventions: right-handed view space, depth in `[0, 1]`
//! and Y pointing down in clip space.

use crate::foundation::math::{constants, utils, Mat4, Point3, Vec3};

/// Default vertical field of view in radians
pub const DEFAULT_FOV: f32 = constants::QUARTER_PI;
/// Default near plane distance
pub const DEFAULT_NEAR: f32 = 1.0;
/// Default far plane distance
pub const DEFAULT_FAR: f32 = 1000.0;

const MIN_RADIUS: f32 = 3.0;
const MAX_RADIUS: f32 = 15.0;
const PHI_MARGIN: f32 = 0.1;

/// Spherical camera looking at a target
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitCamera {
    /// Distance from the target
    pub radius: f32,
    /// Polar angle from +Y, radians
    pub phi: f32,
    /// Azimuth around +Y, radians
    pub theta: f32,
    /// Point the camera looks at
    pub target: Vec3,
    /// Vertical field of view, radians
    pub fov: f32,
    /// Width / height of the viewport
    pub aspect: f32,
    /// Near plane distance
    pub near: f32,
    /// Far plane distance
    pub far: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            radius: 5.0,
            phi: constants::QUARTER_PI,
            theta: 1.5 * constants::PI,
            target: Vec3::zeros(),
            fov: DEFAULT_FOV,
            aspect: 1.0,
            near: DEFAULT_NEAR,
            far: DEFAULT_FAR,
        }
    }
}

impl OrbitCamera {
    /// Camera with the default orbit and the given aspect ratio
    pub fn new(aspect: f32) -> Self {
        Self {
            aspect,
            ..Self::default()
        }
    }

    /// Update the aspect ratio after a viewport change
    pub fn set_aspect_ratio(&mut self, aspect: f32) {
        if (self.aspect - aspect).abs() > 0.01 {
            log::debug!("Camera aspect ratio changed: {:.3} -> {:.3}", self.aspect, aspect);
        }
        self.aspect = aspect;
    }

    /// Orbit by angle deltas in radians; `phi` stays off the poles
    pub fn rotate(&mut self, d_theta: f32, d_phi: f32) {
        self.theta += d_theta;
        self.phi = utils::clamp(self.phi + d_phi, PHI_MARGIN, constants::PI - PHI_MARGIN);
    }

    /// Move towards or away from the target
    pub fn zoom(&mut self, delta: f32) {
        self.radius = utils::clamp(self.radius + delta, MIN_RADIUS, MAX_RADIUS);
    }

    /// World-space eye position
    pub fn position(&self) -> Vec3 {
        let (sin_phi, cos_phi) = self.phi.sin_cos();
        let (sin_theta, cos_theta) = self.theta.sin_cos();
        self.target
            + Vec3::new(
                self.radius * sin_phi * cos_theta,
                self.radius * cos_phi,
                self.radius * sin_phi * sin_theta,
            )
    }

    /// World to view transform
    pub fn view_matrix(&self) -> Mat4 {
        let eye = Point3::from(self.position());
        let target = Point3::from(self.target);
        Mat4::look_at_rh(&eye, &target, &Vec3::y())
    }

    /// View to clip transform
    pub fn projection_matrix(&self) -> Mat4 {
        let f = 1.0 / (self.fov * 0.5).tan();
        let range = self.near - self.far;
        #[rustfmt::skip]
        let projection = Mat4::new(
            f / self.aspect, 0.0, 0.0,                   0.0,
            0.0,             -f,  0.0,                   0.0,
            0.0,             0.0, self.far / range,      self.near * self.far / range,
            0.0,             0.0, -1.0,                  0.0,
        );
        projection
    }

    /// Combined view-projection
    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_position_on_sphere() {
        let camera = OrbitCamera::default();
        assert_relative_eq!(camera.position().norm(), 5.0, epsilon = 1e-5);
    }

    #[test]
    fn test_depth_range_maps_to_unit_interval() {
        let camera = OrbitCamera::new(4.0 / 3.0);
        let proj = camera.projection_matrix();

        let near = proj * Vec4::new(0.0, 0.0, -camera.near, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);

        let far = proj * Vec4::new(0.0, 0.0, -camera.far, 1.0);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_target_projects_to_screen_centre() {
        let camera = OrbitCamera::new(1.5);
        let clip = camera.view_projection() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(clip.x / clip.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(clip.y / clip.w, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_rotate_and_zoom_are_clamped() {
        let mut camera = OrbitCamera::default();
        camera.rotate(0.0, 100.0);
        assert!(camera.phi < constants::PI);
        camera.zoom(-100.0);
        assert_relative_eq!(camera.radius, 3.0);
        camera.zoom(100.0);
        assert_relative_eq!(camera.radius, 15.0);
    }
}
