//! Selection outline geometry
//!
//! Each selected mesh is outlined by the 12 edges of its local bounding box,
//! transformed by the model matrix, drawn as a line list over the lit image.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::backend::{VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode};
use crate::scene::Mesh;

/// Box edges as pairs of [`crate::scene::Aabb::corners`] indices
pub const BOX_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

pub const MAX_OUTLINED_MESHES: usize = 256;
pub const VERTICES_PER_BOX: usize = BOX_EDGES.len() * 2;
pub const MAX_OUTLINE_VERTICES: usize = MAX_OUTLINED_MESHES * VERTICES_PER_BOX;

/// Uniform block of the outline pipeline
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct OutlineUniform {
    pub view_proj: Mat4,
    /// depth scale, depth bias, reverse-Z, flip sample Y
    pub depth_params: Vec4,
    /// width, height, 1 / width, 1 / height
    pub screen_params: Vec4,
}

pub fn outline_vertex_layout() -> VertexBufferLayout {
    VertexBufferLayout {
        array_stride: std::mem::size_of::<Vec3>() as u64,
        step_mode: VertexStepMode::Vertex,
        attributes: vec![VertexAttribute {
            location: 0,
            format: VertexFormat::Float32x3,
            offset: 0,
        }],
    }
}

pub fn is_outlined(mesh: &Mesh) -> bool {
    mesh.selected && mesh.visible && !mesh.vertices.is_empty()
}

/// Line list vertices outlining every selected, visible mesh with geometry.
/// Output stops at whole boxes once [`MAX_OUTLINE_VERTICES`] is reached.
pub fn selection_outline_vertices(meshes: &[Mesh]) -> Vec<Vec3> {
    let mut vertices = Vec::new();
    for mesh in meshes.iter().filter(|mesh| is_outlined(mesh)) {
        if vertices.len() + VERTICES_PER_BOX > MAX_OUTLINE_VERTICES {
            break;
        }
        let Some(bounds) = mesh.local_bounds() else {
            continue;
        };
        let model = mesh.model();
        let corners = bounds.corners().map(|corner| model.transform_point3(corner));
        for (a, b) in BOX_EDGES {
            vertices.push(corners[a]);
            vertices.push(corners[b]);
        }
    }
    vertices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::primitives;

    #[test]
    fn test_selected_cube_yields_24_vertices() {
        let mut cube = primitives::cube("cube").with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)));
        cube.selected = true;
        let vertices = selection_outline_vertices(&[cube]);
        assert_eq!(vertices.len(), 24);
        for v in &vertices {
            assert!((v.z + 5.0).abs() <= 0.5 + 1e-5, "{:?}", v);
        }
    }

    #[test]
    fn test_unselected_hidden_and_empty_are_skipped() {
        let plain = primitives::cube("plain");
        let mut hidden = primitives::cube("hidden");
        hidden.selected = true;
        hidden.visible = false;
        let mut empty = Mesh::new("empty", Vec::new(), Vec::new());
        empty.selected = true;
        assert!(selection_outline_vertices(&[plain, hidden, empty]).is_empty());
    }

    #[test]
    fn test_outline_is_capped() {
        let meshes: Vec<Mesh> = (0..MAX_OUTLINED_MESHES + 10)
            .map(|i| {
                let mut mesh = primitives::cube(&format!("cube {}", i));
                mesh.selected = true;
                mesh
            })
            .collect();
        assert_eq!(selection_outline_vertices(&meshes).len(), MAX_OUTLINE_VERTICES);
    }
}
