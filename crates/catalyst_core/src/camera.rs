use glam::{Mat4, Quat, Vec3};

use crate::transform::Transform;

#[derive(Clone, Debug)]
pub struct Camera {
    pub fov: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    /// Distance of the fixed far culling plane. The projection itself is
    /// infinite.
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov: 45.0f32.to_radians(),
            aspect_ratio: 16.0 / 9.0, // Standard monitor
            near: 0.1,
            far: 10_000.0,
        }
    }
}

impl Camera {
    /// Reverse-Z infinite perspective with Y flipped for Vulkan clip space.
    pub fn compute_projection_matrix(&self) -> Mat4 {
        let aspect = if self.aspect_ratio > 0.0 {
            self.aspect_ratio
        } else {
            1.0
        };
        let mut projection = Mat4::perspective_infinite_reverse_rh(self.fov, aspect, self.near);
        projection.y_axis.y *= -1.0;
        projection
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.aspect_ratio = width as f32 / height as f32;
        }
    }
}

const PITCH_LIMIT: f32 = 89.0 * std::f32::consts::PI / 180.0;

/// First-person camera driven by WASD and mouse motion.
#[derive(Clone, Debug)]
pub struct FlyCamera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub speed: f32,
    pub sensitivity: f32,
    pub lens: Camera,
}

impl FlyCamera {
    pub fn new(position: Vec3, lens: Camera) -> Self {
        Self {
            position,
            yaw: 0.0,
            pitch: 0.0,
            speed: 5.0,
            sensitivity: 0.002,
            lens,
        }
    }

    pub fn rotation(&self) -> Quat {
        Quat::from_rotation_y(self.yaw) * Quat::from_rotation_x(self.pitch)
    }

    pub fn transform(&self) -> Transform {
        Transform {
            translation: self.position,
            rotation: self.rotation(),
            scale: Vec3::ONE,
        }
    }

    /// World -> view. The inverse of the camera's own placement.
    pub fn view_matrix(&self) -> Mat4 {
        self.transform().compute_matrix().inverse()
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.lens.compute_projection_matrix()
    }

    /// `axes` is (right, up, forward) intent in the range [-1, 1].
    pub fn apply_movement(&mut self, axes: Vec3, delta_seconds: f32) {
        if axes == Vec3::ZERO {
            return;
        }
        let transform = self.transform();
        let direction =
            transform.right() * axes.x + Vec3::Y * axes.y + transform.forward() * axes.z;
        self.position += direction.normalize_or_zero() * self.speed * delta_seconds;
    }

    /// Raw mouse delta in pixels.
    pub fn apply_look(&mut self, dx: f32, dy: f32) {
        self.yaw -= dx * self.sensitivity;
        self.pitch = (self.pitch - dy * self.sensitivity).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn projection_flips_y_for_vulkan() {
        let camera = Camera::default();
        let projection = camera.compute_projection_matrix();
        let clip = projection * Vec4::new(0.0, 1.0, -5.0, 1.0);
        assert!(clip.y < 0.0);
    }

    #[test]
    fn reverse_z_maps_near_plane_to_one() {
        let camera = Camera::default();
        let projection = camera.compute_projection_matrix();
        let clip = projection * Vec4::new(0.0, 0.0, -camera.near, 1.0);
        assert!((clip.z / clip.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn moving_forward_follows_negative_z() {
        let mut camera = FlyCamera::new(Vec3::ZERO, Camera::default());
        camera.apply_movement(Vec3::new(0.0, 0.0, 1.0), 1.0);
        assert!(camera.position.z < 0.0);
        assert!(camera.position.x.abs() < 1e-5);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = FlyCamera::new(Vec3::ZERO, Camera::default());
        camera.apply_look(0.0, -1.0e6);
        assert!(camera.pitch <= PITCH_LIMIT);
    }

    #[test]
    fn view_matrix_moves_world_opposite_to_camera() {
        let camera = FlyCamera::new(Vec3::new(0.0, 0.0, 5.0), Camera::default());
        let origin_in_view = camera.view_matrix().transform_point3(Vec3::ZERO);
        assert!(origin_in_view.abs_diff_eq(Vec3::new(0.0, 0.0, -5.0), 1e-5));
    }
}
