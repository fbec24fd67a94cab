//! Scene management
//!
//! The scene is the single per-frame source of truth for the renderer. The
//! host mutates it before each frame, either directly or through
//! [`Scene::apply`].

mod bounds;
mod camera;
mod light;
mod material;
mod mesh;
pub mod primitives;
mod update;

pub use bounds::*;
pub use camera::*;
pub use light::*;
pub use material::*;
pub use mesh::*;
pub use update::*;

use glam::Vec3;

/// How haze around beams is modelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BeamModel {
    #[default]
    SoftHaze,
    Physical,
}

impl BeamModel {
    pub fn code(&self) -> u32 {
        match self {
            BeamModel::SoftHaze => 0,
            BeamModel::Physical => 1,
        }
    }
}

/// The scene containing all renderable content
#[derive(Debug)]
pub struct Scene {
    pub camera: Camera,
    meshes: Vec<Mesh>,
    lights: Vec<Light>,
    static_lights: Vec<Light>,
    lights_dirty: bool,
    /// GPU resources of replaced or removed meshes, released by the renderer
    retired: Vec<MeshGpu>,

    pub ambient_color: Vec3,
    pub ambient_intensity: f32,
    /// Atmospheric haze amount
    pub smoke_amount: f32,
    pub beam_model: BeamModel,
    pub bloom_intensity: f32,
    pub bloom_radius: f32,
    pub volumetric_enabled: bool,
    pub shadows_enabled: bool,
    pub smoke_noise_enabled: bool,
    pub time_seconds: f32,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            camera: Camera::default(),
            meshes: Vec::new(),
            lights: Vec::new(),
            static_lights: Vec::new(),
            lights_dirty: false,
            retired: Vec::new(),
            ambient_color: Vec3::ZERO,
            ambient_intensity: 1.0,
            smoke_amount: 0.0,
            beam_model: BeamModel::SoftHaze,
            bloom_intensity: 0.6,
            bloom_radius: 6.0,
            volumetric_enabled: true,
            shadows_enabled: true,
            smoke_noise_enabled: true,
            time_seconds: 0.0,
        }
    }
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    /// Mutable access to meshes. Adding and removing goes through the scene so
    /// GPU resources are retired properly.
    pub fn meshes_mut(&mut self) -> &mut [Mesh] {
        &mut self.meshes
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> usize {
        self.meshes.push(mesh);
        self.meshes.len() - 1
    }

    pub fn mesh_index(&self, id: ObjectId) -> Option<usize> {
        self.meshes.iter().position(|m| m.id == Some(id))
    }

    pub fn find_mesh(&self, id: ObjectId) -> Option<&Mesh> {
        self.mesh_index(id).map(|i| &self.meshes[i])
    }

    pub fn find_mesh_mut(&mut self, id: ObjectId) -> Option<&mut Mesh> {
        self.mesh_index(id).map(move |i| &mut self.meshes[i])
    }

    pub fn remove_mesh(&mut self, index: usize) -> Option<Mesh> {
        if index >= self.meshes.len() {
            return None;
        }
        let mut mesh = self.meshes.remove(index);
        self.retired.push(std::mem::take(&mut mesh.gpu));
        Some(mesh)
    }

    pub fn clear_meshes(&mut self) {
        for mut mesh in self.meshes.drain(..) {
            self.retired.push(std::mem::take(&mut mesh.gpu));
        }
    }

    /// GPU resources waiting to be released
    pub fn take_retired(&mut self) -> Vec<MeshGpu> {
        std::mem::take(&mut self.retired)
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    /// Replace the light list. Returns `false` and leaves the scene untouched
    /// when the new list is identical.
    pub fn set_lights(&mut self, lights: Vec<Light>) -> bool {
        if self.lights == lights {
            return false;
        }
        self.lights = lights;
        self.lights_dirty = true;
        true
    }

    pub fn lights_dirty(&self) -> bool {
        self.lights_dirty
    }

    pub fn clear_lights_dirty(&mut self) {
        self.lights_dirty = false;
    }

    /// First directional light that casts shadows
    pub fn shadow_casting_sun(&self) -> Option<(usize, &Light)> {
        self.lights
            .iter()
            .enumerate()
            .find(|(_, l)| l.cast_shadows && matches!(l.kind, LightKind::Directional { .. }))
    }

    /// Apply one frame of host changes
    pub fn apply(&mut self, update: SceneUpdate) -> UpdateSummary {
        let mut summary = UpdateSummary::default();

        if let Some(camera) = update.camera {
            self.apply_camera(&camera);
        }

        if let Some(static_lights) = update.static_lights {
            self.static_lights = static_lights;
        }
        let mut lights = self.static_lights.clone();
        lights.extend(update.pending_lights);
        summary.lights_changed = self.set_lights(lights);

        for mesh in update.add_meshes {
            match mesh.id.and_then(|id| self.mesh_index(id)) {
                Some(index) => {
                    let old = std::mem::replace(&mut self.meshes[index], mesh);
                    self.retired.push(old.gpu);
                    summary.meshes_replaced += 1;
                }
                None => {
                    self.meshes.push(mesh);
                    summary.meshes_added += 1;
                }
            }
        }

        for change in update.mesh_updates {
            let Some(mesh) = self.find_mesh_mut(change.id) else {
                summary.unknown_ids.push(change.id);
                continue;
            };
            if let Some(base_model) = change.base_model {
                mesh.set_base_model(base_model);
            }
            if let Some(offset) = change.user_offset {
                mesh.set_user_offset(offset);
            }
            if let Some(material) = change.material {
                mesh.material = material;
            }
            if let Some(selected) = change.selected {
                mesh.selected = selected;
            }
            if let Some(selectable) = change.selectable {
                mesh.selectable = selectable;
            }
            if let Some(visible) = change.visible {
                mesh.visible = visible;
            }
            summary.meshes_updated += 1;
        }

        for id in update.remove_meshes {
            match self.mesh_index(id) {
                Some(index) => {
                    self.remove_mesh(index);
                    summary.meshes_removed += 1;
                }
                None => summary.unknown_ids.push(id),
            }
        }

        if !summary.unknown_ids.is_empty() {
            log::debug!("Scene: update referenced unknown ids {:?}", summary.unknown_ids);
        }
        summary
    }

    fn apply_camera(&mut self, update: &CameraUpdate) {
        let camera = &mut self.camera;
        if let Some(position) = update.position {
            camera.set_position(position);
        }
        if let Some(target) = update.target {
            camera.look_at(target);
        }
        camera.set_perspective(
            update.fov_y.unwrap_or(camera.fov_y()),
            update.aspect.unwrap_or(camera.aspect()),
            update.near.unwrap_or(camera.near()),
            update.far.unwrap_or(camera.far()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use glam::Mat4;

    #[test]
    fn test_set_lights_detects_changes() {
        let mut scene = Scene::new();
        assert!(scene.set_lights(vec![Light::point(Vec3::ZERO, 5.0)]));
        assert!(scene.lights_dirty());
        scene.clear_lights_dirty();

        assert!(!scene.set_lights(vec![Light::point(Vec3::ZERO, 5.0)]));
        assert!(!scene.lights_dirty());

        assert!(scene.set_lights(vec![Light::point(Vec3::ZERO, 5.0).with_intensity(2.0)]));
    }

    #[test]
    fn test_pending_lights_merge_once() {
        let mut scene = Scene::new();
        let summary = scene.apply(SceneUpdate {
            static_lights: Some(vec![Light::directional(Vec3::NEG_Y)]),
            pending_lights: vec![Light::point(Vec3::ONE, 3.0)],
            ..Default::default()
        });
        assert!(summary.lights_changed);
        assert_eq!(scene.lights().len(), 2);

        scene.apply(SceneUpdate::default());
        assert_eq!(scene.lights().len(), 1);
    }

    #[test]
    fn test_mesh_updates_mutate_in_place() {
        let mut scene = Scene::new();
        let id = ObjectId(7);
        scene.apply(SceneUpdate {
            add_meshes: vec![primitives::cube("cube").with_id(id)],
            ..Default::default()
        });
        let summary = scene.apply(SceneUpdate {
            mesh_updates: vec![MeshUpdate::new(id)
                .transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)))
                .selected(true)],
            ..Default::default()
        });
        assert_eq!(summary.meshes_updated, 1);
        assert_eq!(scene.meshes().len(), 1);
        let mesh = scene.find_mesh(id).unwrap();
        assert!(mesh.selected);
        assert_eq!(mesh.model().w_axis.z, -5.0);
    }

    #[test]
    fn test_replaced_and_removed_meshes_retire_gpu() {
        let mut backend = RecordingBackend::new();
        let mut scene = Scene::new();
        let id = ObjectId(1);
        scene.add_mesh(primitives::cube("cube").with_id(id));
        scene.meshes_mut()[0].sync_gpu(&mut backend);

        let summary = scene.apply(SceneUpdate {
            add_meshes: vec![primitives::sphere("ball", 0.5, 8, 8).with_id(id)],
            ..Default::default()
        });
        assert_eq!(summary.meshes_replaced, 1);
        assert_eq!(scene.meshes().len(), 1);

        let summary = scene.apply(SceneUpdate {
            remove_meshes: vec![id, ObjectId(99)],
            ..Default::default()
        });
        assert_eq!(summary.meshes_removed, 1);
        assert_eq!(summary.unknown_ids, vec![ObjectId(99)]);

        let retired = scene.take_retired();
        assert_eq!(retired.len(), 2);
        for mut gpu in retired {
            gpu.release(&mut backend);
        }
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_camera_update() {
        let mut scene = Scene::new();
        scene.apply(SceneUpdate {
            camera: Some(CameraUpdate {
                position: Some(Vec3::new(0.0, 1.0, 5.0)),
                fov_y: Some(45.0),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(scene.camera.position(), Vec3::new(0.0, 1.0, 5.0));
        assert_eq!(scene.camera.fov_y(), 45.0);
        assert_eq!(scene.camera.near(), 0.1);
    }
}
