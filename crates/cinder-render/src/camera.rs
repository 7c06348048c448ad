//! Camera and view management.

use glam::{Mat4, Vec3};

/// Camera for rendering.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// Create a new camera.
    pub fn new(
        position: Vec3,
        target: Vec3,
        up: Vec3,
        fov: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let direction = (target - position).normalize();
        Self {
            position,
            direction,
            up,
            fov,
            aspect,
            near,
            far,
        }
    }

    /// Place the camera on a sphere around `target` and look at it.
    ///
    /// `yaw` rotates around the world Y axis, `pitch` tilts up from the
    /// horizontal plane. Both are in radians.
    pub fn orbit(&mut self, target: Vec3, radius: f32, yaw: f32, pitch: f32) {
        let (sin_yaw, cos_yaw) = yaw.sin_cos();
        let (sin_pitch, cos_pitch) = pitch.sin_cos();
        let offset = Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw) * radius;
        self.position = target + offset;
        self.look_at(target);
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        self.direction = (target - self.position).normalize();
    }

    /// Set the aspect ratio from a framebuffer size. Zero-sized
    /// framebuffers leave the aspect unchanged.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.direction, self.up)
    }

    /// Right-handed perspective with Vulkan's downward clip-space Y.
    pub fn projection_matrix(&self) -> Mat4 {
        let mut projection = Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far);
        projection.y_axis.y *= -1.0;
        projection
    }

    /// Get the view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Get camera uniforms for GPU.
    pub fn uniforms(&self) -> CameraUniforms {
        CameraUniforms::from(self)
    }
}

/// Camera uniform buffer data for GPU (std140-compatible).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    pub position: [f32; 4],
}

impl Default for CameraUniforms {
    fn default() -> Self {
        Self::from(&Camera::default())
    }
}

impl From<&Camera> for CameraUniforms {
    fn from(camera: &Camera) -> Self {
        Self {
            view: camera.view_matrix().to_cols_array_2d(),
            projection: camera.projection_matrix().to_cols_array_2d(),
            view_projection: camera.view_projection_matrix().to_cols_array_2d(),
            position: [camera.position.x, camera.position.y, camera.position.z, 1.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    #[test]
    fn uniforms_are_std140_sized() {
        assert_eq!(std::mem::size_of::<CameraUniforms>(), 3 * 64 + 16);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let camera = Camera {
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            aspect: 1.0,
            ..Camera::default()
        };

        // A point above the view axis lands in the upper half of the
        // framebuffer, which is negative Y in Vulkan clip space
        let clip = camera.view_projection_matrix() * Vec4::new(0.0, 1.0, -5.0, 1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn near_and_far_map_to_zero_and_one() {
        let camera = Camera {
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            ..Camera::default()
        };
        let vp = camera.view_projection_matrix();

        let near = vp * Vec4::new(0.0, 0.0, -camera.near, 1.0);
        let far = vp * Vec4::new(0.0, 0.0, -camera.far, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn orbit_keeps_radius_and_faces_target() {
        let mut camera = Camera::default();
        let target = Vec3::new(1.0, 2.0, 3.0);
        camera.orbit(target, 10.0, 0.7, 0.3);

        assert_relative_eq!(camera.position.distance(target), 10.0, epsilon = 1e-4);
        let to_target = (target - camera.position).normalize();
        assert_relative_eq!(camera.direction.dot(to_target), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn zero_viewport_keeps_aspect() {
        let mut camera = Camera::default();
        camera.set_viewport(800, 600);
        assert_relative_eq!(camera.aspect, 800.0 / 600.0);
        camera.set_viewport(0, 600);
        assert_relative_eq!(camera.aspect, 800.0 / 600.0);
    }
}
