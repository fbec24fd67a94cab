//! Host-facing scene update API
//!
//! The host builds one [`SceneUpdate`] per frame from its own object model and
//! hands it to [`Scene::apply`](crate::scene::Scene::apply).

use glam::{Mat4, Vec3};

use crate::scene::light::Light;
use crate::scene::material::Material;
use crate::scene::mesh::{Mesh, ObjectId};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraUpdate {
    pub position: Option<Vec3>,
    pub target: Option<Vec3>,
    /// Vertical field of view in degrees
    pub fov_y: Option<f32>,
    pub near: Option<f32>,
    pub far: Option<f32>,
    pub aspect: Option<f32>,
}

/// In-place changes to a mesh identified by its [`ObjectId`]
#[derive(Debug, Clone, PartialEq)]
pub struct MeshUpdate {
    pub id: ObjectId,
    pub base_model: Option<Mat4>,
    pub user_offset: Option<Vec3>,
    pub material: Option<Material>,
    pub selected: Option<bool>,
    pub selectable: Option<bool>,
    pub visible: Option<bool>,
}

impl MeshUpdate {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            base_model: None,
            user_offset: None,
            material: None,
            selected: None,
            selectable: None,
            visible: None,
        }
    }

    pub fn transform(mut self, base_model: Mat4) -> Self {
        self.base_model = Some(base_model);
        self
    }

    pub fn offset(mut self, offset: Vec3) -> Self {
        self.user_offset = Some(offset);
        self
    }

    pub fn material(mut self, material: Material) -> Self {
        self.material = Some(material);
        self
    }

    pub fn selected(mut self, selected: bool) -> Self {
        self.selected = Some(selected);
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }
}

/// One frame worth of host changes
#[derive(Debug, Default)]
pub struct SceneUpdate {
    pub camera: Option<CameraUpdate>,
    /// Replaces the persistent light list when present
    pub static_lights: Option<Vec<Light>>,
    /// Lights for this update only, appended after the static ones
    pub pending_lights: Vec<Light>,
    /// New meshes. A mesh whose id is already present replaces it.
    pub add_meshes: Vec<Mesh>,
    pub mesh_updates: Vec<MeshUpdate>,
    pub remove_meshes: Vec<ObjectId>,
}

impl SceneUpdate {
    pub fn is_empty(&self) -> bool {
        self.camera.is_none()
            && self.static_lights.is_none()
            && self.pending_lights.is_empty()
            && self.add_meshes.is_empty()
            && self.mesh_updates.is_empty()
            && self.remove_meshes.is_empty()
    }
}

/// What [`Scene::apply`](crate::scene::Scene::apply) changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSummary {
    pub lights_changed: bool,
    pub meshes_added: usize,
    pub meshes_replaced: usize,
    pub meshes_updated: usize,
    pub meshes_removed: usize,
    /// Ids referenced by updates or removals that no mesh carries
    pub unknown_ids: Vec<ObjectId>,
}
