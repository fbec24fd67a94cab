//! Camera system

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::backend::ClipSpace;

/// Up vector for a look-at along `direction` that never degenerates
///
/// Falls back to +Z when `direction` is (anti)parallel to +Y.
pub fn safe_up(direction: Vec3) -> Vec3 {
    let dir = direction.normalize_or_zero();
    if dir.dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// Perspective camera owned by the scene
///
/// Matrices are recomputed whenever one of the inputs changes, and
/// [`Camera::generation`] advances so dependants can tell.
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    target: Vec3,
    up: Vec3,
    fov_y_degrees: f32,
    aspect: f32,
    near: f32,
    far: f32,
    view: Mat4,
    projection: Mat4,
    generation: u64,
}

impl Default for Camera {
    fn default() -> Self {
        let mut camera = Self {
            position: Vec3::ZERO,
            target: Vec3::NEG_Z,
            up: Vec3::Y,
            fov_y_degrees: 60.0,
            aspect: 1.0,
            near: 0.1,
            far: 1000.0,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            generation: 0,
        };
        camera.update_view();
        camera.update_projection();
        camera
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        let mut camera = Self::default();
        camera.set_position(position);
        camera.look_at(target);
        camera
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    /// Vertical field of view in degrees
    pub fn fov_y(&self) -> f32 {
        self.fov_y_degrees
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Set the perspective parameters. Invalid ranges are ignored.
    pub fn set_perspective(&mut self, fov_y_degrees: f32, aspect: f32, near: f32, far: f32) {
        if fov_y_degrees == self.fov_y_degrees
            && aspect == self.aspect
            && near == self.near
            && far == self.far
        {
            return;
        }
        if !(fov_y_degrees > 0.0 && fov_y_degrees < 180.0) || aspect <= 0.0 || near <= 0.0 || far <= near {
            log::warn!(
                "Camera: ignoring perspective fov={} aspect={} near={} far={}",
                fov_y_degrees,
                aspect,
                near,
                far
            );
            return;
        }
        self.fov_y_degrees = fov_y_degrees;
        self.aspect = aspect;
        self.near = near;
        self.far = far;
        self.update_projection();
    }

    /// Update aspect ratio from a viewport size
    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let aspect = width as f32 / height as f32;
        self.set_perspective(self.fov_y_degrees, aspect, self.near, self.far);
    }

    pub fn set_position(&mut self, position: Vec3) {
        if position == self.position {
            return;
        }
        self.position = position;
        self.update_view();
    }

    pub fn look_at(&mut self, target: Vec3) {
        if target == self.target {
            return;
        }
        self.target = target;
        self.update_view();
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection * self.view
    }

    /// View-projection with the backend's clip-space correction applied
    pub fn clip_view_projection(&self, clip: &ClipSpace) -> Mat4 {
        clip.correction * self.projection * self.view
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    /// World-space corners of the frustum slice between `near` and `far`
    ///
    /// The first four corners lie on the near plane, the last four on the far
    /// plane, each ordered bottom-left, bottom-right, top-right, top-left.
    pub fn frustum_slice_corners(&self, near: f32, far: f32) -> [Vec3; 8] {
        let tan_half = (self.fov_y_degrees.to_radians() * 0.5).tan();
        let inv_view = self.view.inverse();
        let mut corners = [Vec3::ZERO; 8];
        for (plane, depth) in [near, far].into_iter().enumerate() {
            let h = depth * tan_half;
            let w = h * self.aspect;
            let local = [
                Vec3::new(-w, -h, -depth),
                Vec3::new(w, -h, -depth),
                Vec3::new(w, h, -depth),
                Vec3::new(-w, h, -depth),
            ];
            for (i, p) in local.into_iter().enumerate() {
                corners[plane * 4 + i] = inv_view.transform_point3(p);
            }
        }
        corners
    }

    /// Build camera uniform data for shaders
    pub fn uniform_data(&self, clip: &ClipSpace, time_seconds: f32) -> CameraUniformData {
        CameraUniformData {
            view: self.view,
            inv_view_proj: self.clip_view_projection(clip).inverse(),
            position_time: self.position.extend(time_seconds),
        }
    }

    fn update_view(&mut self) {
        let forward = self.target - self.position;
        if forward.length_squared() > 1e-12 {
            self.up = safe_up(forward);
            self.view = Mat4::look_at_rh(self.position, self.target, self.up);
        }
        self.generation += 1;
    }

    fn update_projection(&mut self) {
        self.projection =
            Mat4::perspective_rh(self.fov_y_degrees.to_radians(), self.aspect, self.near, self.far);
        self.generation += 1;
    }
}

/// Camera uniform block shared by the lighting resolve
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniformData {
    pub view: Mat4,
    pub inv_view_proj: Mat4,
    /// xyz = camera position, w = scene time in seconds
    pub position_time: Vec4,
}

/// View-projection block used by the geometry passes
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ViewUniformData {
    pub view_proj: Mat4,
    pub camera_pos: Vec4,
}

impl ViewUniformData {
    pub fn new(camera: &Camera, clip: &ClipSpace) -> Self {
        Self {
            view_proj: camera.clip_view_projection(clip),
            camera_pos: camera.position().extend(1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let camera = Camera::default();
        assert_eq!(camera.near(), 0.1);
        assert_eq!(camera.far(), 1000.0);
        assert_eq!(camera.fov_y(), 60.0);
        assert_eq!(camera.aspect(), 1.0);
        assert_eq!(camera.forward(), Vec3::NEG_Z);
    }

    #[test]
    fn test_unchanged_setters_keep_generation() {
        let mut camera = Camera::default();
        let generation = camera.generation();
        camera.set_perspective(60.0, 1.0, 0.1, 1000.0);
        camera.set_position(Vec3::ZERO);
        camera.look_at(Vec3::NEG_Z);
        assert_eq!(camera.generation(), generation);

        camera.set_aspect(1920, 1080);
        assert!(camera.generation() > generation);
    }

    #[test]
    fn test_invalid_perspective_is_ignored() {
        let mut camera = Camera::default();
        camera.set_perspective(60.0, 1.0, 10.0, 5.0);
        camera.set_perspective(0.0, 1.0, 0.1, 100.0);
        assert_eq!(camera.near(), 0.1);
        assert_eq!(camera.far(), 1000.0);
        assert_eq!(camera.fov_y(), 60.0);
    }

    #[test]
    fn test_look_straight_down_has_finite_view() {
        let mut camera = Camera::new(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO);
        camera.look_at(Vec3::ZERO);
        assert!(camera.view_matrix().is_finite());
        assert!((camera.forward() - Vec3::NEG_Y).length() < 1e-5);
    }

    #[test]
    fn test_frustum_slice_corners() {
        let camera = Camera::default();
        let corners = camera.frustum_slice_corners(1.0, 2.0);
        let tan_half = 30.0_f32.to_radians().tan();
        assert!((corners[0] - Vec3::new(-tan_half, -tan_half, -1.0)).length() < 1e-5);
        assert!((corners[6] - Vec3::new(2.0 * tan_half, 2.0 * tan_half, -2.0)).length() < 1e-5);
    }

    #[test]
    fn test_safe_up() {
        assert_eq!(safe_up(Vec3::NEG_Y), Vec3::Z);
        assert_eq!(safe_up(Vec3::new(1.0, -1.0, 0.0)), Vec3::Y);
    }
}
