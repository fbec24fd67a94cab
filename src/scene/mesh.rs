//! Scene meshes and the GPU resources they own

use std::borrow::Cow;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::backend::{
    BackendResult, BindGroupEntry, BindGroupHandle, BindGroupLayoutHandle, BufferHandle,
    BufferDescriptor, BufferUsage, GraphicsBackend, Vertex,
};
use crate::scene::bounds::Aabb;
use crate::scene::material::{AlphaMode, Material};

/// Host-assigned identity used to update meshes in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GizmoAxis {
    X,
    Y,
    Z,
}

impl GizmoAxis {
    pub fn index(&self) -> usize {
        match self {
            GizmoAxis::X => 0,
            GizmoAxis::Y => 1,
            GizmoAxis::Z => 2,
        }
    }

    pub fn direction(&self) -> Vec3 {
        match self {
            GizmoAxis::X => Vec3::X,
            GizmoAxis::Y => Vec3::Y,
            GizmoAxis::Z => Vec3::Z,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GizmoKind {
    Translate,
    Rotate,
}

/// Marks a manipulator mesh, drawn as an overlay and never lit or shadowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gizmo {
    pub axis: GizmoAxis,
    pub kind: GizmoKind,
}

/// Which pass a per-mesh bind group belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshBindingSlot {
    GBuffer = 0,
    Shadow = 1,
    Gizmo = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MeshBindings {
    layout: BindGroupLayoutHandle,
    group: BindGroupHandle,
}

/// Per-mesh uniform block: transforms and material
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshUniformData {
    pub model: Mat4,
    pub normal_matrix: Mat4,
    /// rgb = base colour, a = metalness
    pub base_color_metal: Vec4,
    /// roughness, occlusion, alpha, alpha cutoff
    pub roughness_occlusion: Vec4,
    /// rgb = emissive, a = alpha mode
    pub emissive: Vec4,
}

impl MeshUniformData {
    pub fn new(model: Mat4, material: &Material) -> Self {
        let normal_matrix = if model.determinant().abs() > 1e-12 {
            model.inverse().transpose()
        } else {
            Mat4::IDENTITY
        };
        let alpha_mode = match material.alpha_mode {
            AlphaMode::Opaque => 0.0,
            AlphaMode::Mask => 1.0,
            AlphaMode::Blend => 2.0,
        };
        Self {
            model,
            normal_matrix,
            base_color_metal: material.base_color.extend(material.metalness),
            roughness_occlusion: Vec4::new(
                material.roughness,
                material.occlusion,
                material.alpha,
                material.alpha_cutoff,
            ),
            emissive: material.emissive.extend(alpha_mode),
        }
    }
}

/// GPU resources owned by a mesh
///
/// Geometry buffers are uploaded once. Bind groups are rebuilt when the
/// owning pass hands in a different layout.
#[derive(Debug, Default)]
pub struct MeshGpu {
    vertex_buffer: Option<BufferHandle>,
    index_buffer: Option<BufferHandle>,
    index_count: u32,
    uniform_buffer: Option<BufferHandle>,
    uploaded: Option<MeshUniformData>,
    bindings: [Option<MeshBindings>; 3],
}

impl MeshGpu {
    pub fn vertex_buffer(&self) -> Option<BufferHandle> {
        self.vertex_buffer
    }

    pub fn index_buffer(&self) -> Option<BufferHandle> {
        self.index_buffer
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn uniform_buffer(&self) -> Option<BufferHandle> {
        self.uniform_buffer
    }

    /// Vertex and index data are on the GPU and there is something to draw
    pub fn has_geometry(&self) -> bool {
        self.vertex_buffer.is_some() && self.index_buffer.is_some() && self.index_count > 0
    }

    /// Upload geometry once. Without indices the vertices are drawn as a
    /// plain triangle list, matching how picking reads them.
    pub fn ensure_geometry(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        name: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> BackendResult<()> {
        if self.vertex_buffer.is_some() {
            return Ok(());
        }
        let indices: Cow<[u32]> = if indices.is_empty() {
            Cow::Owned(sequential_indices(vertices.len()))
        } else {
            Cow::Borrowed(indices)
        };
        if vertices.is_empty() || indices.is_empty() {
            return Ok(());
        }
        let indices: &[u32] = &indices;
        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} vertices", name)),
                size: std::mem::size_of_val(vertices) as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            },
            bytemuck::cast_slice(vertices),
        )?;
        let index_buffer = match backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} indices", name)),
                size: std::mem::size_of_val(indices) as u64,
                usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
            },
            bytemuck::cast_slice(indices),
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                backend.destroy_buffer(vertex_buffer);
                return Err(e);
            }
        };
        self.vertex_buffer = Some(vertex_buffer);
        self.index_buffer = Some(index_buffer);
        self.index_count = indices.len() as u32;
        Ok(())
    }

    /// Write the uniform block, skipping the upload when nothing changed
    pub fn upload_uniforms(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        name: &str,
        data: &MeshUniformData,
    ) -> BackendResult<()> {
        let buffer = match self.uniform_buffer {
            Some(buffer) => buffer,
            None => {
                let buffer = backend.create_buffer(&BufferDescriptor::uniform(
                    &format!("{} uniforms", name),
                    std::mem::size_of::<MeshUniformData>() as u64,
                ))?;
                self.uniform_buffer = Some(buffer);
                self.uploaded = None;
                buffer
            }
        };
        if self.uploaded.as_ref() == Some(data) {
            return Ok(());
        }
        backend.write_buffer(buffer, 0, bytemuck::bytes_of(data));
        self.uploaded = Some(*data);
        Ok(())
    }

    /// Bind group exposing the uniform block at binding 0 under `layout`
    pub fn bind_group(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        slot: MeshBindingSlot,
        layout: BindGroupLayoutHandle,
    ) -> Option<BindGroupHandle> {
        let uniform_buffer = self.uniform_buffer?;
        let index = slot as usize;
        if let Some(existing) = self.bindings[index] {
            if existing.layout == layout {
                return Some(existing.group);
            }
            backend.destroy_bind_group(existing.group);
            self.bindings[index] = None;
        }
        match backend.create_bind_group(layout, &[(0, BindGroupEntry::buffer(uniform_buffer))]) {
            Ok(group) => {
                self.bindings[index] = Some(MeshBindings { layout, group });
                Some(group)
            }
            Err(e) => {
                log::warn!("Mesh: failed to create {:?} bind group: {}", slot, e);
                None
            }
        }
    }

    /// Drop bind groups created against a layout that is going away
    pub fn release_bindings(&mut self, backend: &mut dyn GraphicsBackend, slot: MeshBindingSlot) {
        if let Some(existing) = self.bindings[slot as usize].take() {
            backend.destroy_bind_group(existing.group);
        }
    }

    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        for binding in self.bindings.iter_mut() {
            if let Some(existing) = binding.take() {
                backend.destroy_bind_group(existing.group);
            }
        }
        for buffer in [
            self.vertex_buffer.take(),
            self.index_buffer.take(),
            self.uniform_buffer.take(),
        ]
        .into_iter()
        .flatten()
        {
            backend.destroy_buffer(buffer);
        }
        self.index_count = 0;
        self.uploaded = None;
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_buffer.is_none()
            && self.index_buffer.is_none()
            && self.uniform_buffer.is_none()
            && self.bindings.iter().all(Option::is_none)
    }
}

/// Indices of an implicit triangle list, dropping a trailing partial triangle
pub fn sequential_indices(vertex_count: usize) -> Vec<u32> {
    (0..(vertex_count - vertex_count % 3) as u32).collect()
}

/// A renderable mesh with baked geometry
#[derive(Debug, Default)]
pub struct Mesh {
    pub name: String,
    pub id: Option<ObjectId>,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    base_model: Mat4,
    user_offset: Vec3,
    model: Mat4,
    /// Local-space bounds; `None` means they have to be scanned from vertices
    pub bounds: Option<Aabb>,
    pub material: Material,
    pub selected: bool,
    pub selectable: bool,
    pub visible: bool,
    pub gizmo: Option<Gizmo>,
    pub gpu: MeshGpu,
}

impl Mesh {
    pub fn new(name: &str, vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let bounds = Aabb::from_vertices(&vertices);
        Self {
            name: name.to_string(),
            vertices,
            indices,
            base_model: Mat4::IDENTITY,
            model: Mat4::IDENTITY,
            bounds,
            selectable: true,
            visible: true,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: ObjectId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_transform(mut self, base_model: Mat4) -> Self {
        self.set_base_model(base_model);
        self
    }

    pub fn with_gizmo(mut self, gizmo: Gizmo) -> Self {
        self.gizmo = Some(gizmo);
        self
    }

    pub fn base_model(&self) -> Mat4 {
        self.base_model
    }

    pub fn user_offset(&self) -> Vec3 {
        self.user_offset
    }

    /// `translate(user_offset) * base_model`
    pub fn model(&self) -> Mat4 {
        self.model
    }

    pub fn set_base_model(&mut self, base_model: Mat4) {
        self.base_model = base_model;
        self.update_model();
    }

    pub fn set_user_offset(&mut self, offset: Vec3) {
        self.user_offset = offset;
        self.update_model();
    }

    fn update_model(&mut self) {
        self.model = Mat4::from_translation(self.user_offset) * self.base_model;
    }

    pub fn is_gizmo(&self) -> bool {
        self.gizmo.is_some()
    }

    /// Visible, opaque, non-gizmo geometry
    pub fn casts_shadow(&self) -> bool {
        self.visible && !self.is_gizmo() && self.material.is_opaque()
    }

    /// Cached bounds, or a scan of the vertices when none are cached
    pub fn local_bounds(&self) -> Option<Aabb> {
        self.bounds.or_else(|| Aabb::from_vertices(&self.vertices))
    }

    pub fn world_bounds(&self) -> Option<Aabb> {
        self.local_bounds().map(|b| b.transformed(&self.model))
    }

    pub fn uniform_data(&self) -> MeshUniformData {
        MeshUniformData::new(self.model, &self.material)
    }

    /// Upload geometry if needed and refresh the uniform block
    pub fn sync_gpu(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Err(e) = self
            .gpu
            .ensure_geometry(backend, &self.name, &self.vertices, &self.indices)
        {
            log::warn!("Mesh '{}': geometry upload failed: {}", self.name, e);
            return;
        }
        let data = self.uniform_data();
        if let Err(e) = self.gpu.upload_uniforms(backend, &self.name, &data) {
            log::warn!("Mesh '{}': uniform upload failed: {}", self.name, e);
        }
    }
}
