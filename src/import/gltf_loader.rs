//! glTF 2.0 import
//!
//! Every primitive becomes one [`Mesh`]. Geometry is read through the
//! `gltf` accessor readers; images are never decoded.

use std::path::Path;

use glam::{Mat3, Mat4, Vec2, Vec3};

use super::{ImportError, ModelImporter};
use crate::backend::Vertex;
use crate::scene::{sequential_indices, AlphaMode, Material, Mesh, Scene};

const MIN_EXTENT: f32 = 1e-5;

#[derive(Debug, Clone, Copy, Default)]
pub struct GltfImporter;

impl GltfImporter {
    pub fn new() -> Self {
        Self
    }
}

impl ModelImporter for GltfImporter {
    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gltf") || ext.eq_ignore_ascii_case("glb"))
    }

    fn load(&self, path: &Path, scene: &mut Scene, append: bool) -> Result<usize, ImportError> {
        if !self.supports(path) {
            return Err(ImportError::UnsupportedFormat(path.display().to_string()));
        }
        let meshes = read_meshes(path)?;
        if meshes.is_empty() {
            return Err(ImportError::EmptyScene(path.display().to_string()));
        }

        if !append {
            scene.clear_meshes();
        }
        let count = meshes.len();
        for mesh in meshes {
            scene.add_mesh(mesh);
        }
        Ok(count)
    }
}

/// All meshes of the default scene (or the first one), transforms baked
pub fn read_meshes(path: &Path) -> Result<Vec<Mesh>, ImportError> {
    let gltf::Gltf { document, blob } = gltf::Gltf::open(path)?;
    let buffers = gltf::import_buffers(&document, path.parent(), blob)?;

    let Some(root) = document.default_scene().or_else(|| document.scenes().next()) else {
        return Ok(Vec::new());
    };

    let mut meshes = Vec::new();
    for node in root.nodes() {
        visit_node(&node, Mat4::IDENTITY, &buffers, &mut meshes);
    }
    Ok(meshes)
}

fn visit_node(node: &gltf::Node<'_>, parent: Mat4, buffers: &[gltf::buffer::Data], out: &mut Vec<Mesh>) {
    let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());

    if let Some(mesh) = node.mesh() {
        let primitive_count = mesh.primitives().len();
        let base_name = node
            .name()
            .or_else(|| mesh.name())
            .map(String::from)
            .unwrap_or_else(|| format!("mesh {}", mesh.index()));

        for (index, primitive) in mesh.primitives().enumerate() {
            let name = if primitive_count > 1 {
                format!("{}_prim{}", base_name, index)
            } else {
                base_name.clone()
            };
            match read_primitive(&primitive, world, buffers, &name) {
                Some(mesh) => out.push(mesh),
                None => log::warn!("Import: skipping primitive {} of '{}' without triangles", index, name),
            }
        }
    }

    for child in node.children() {
        visit_node(&child, world, buffers, out);
    }
}

fn read_primitive(
    primitive: &gltf::Primitive<'_>,
    world: Mat4,
    buffers: &[gltf::buffer::Data],
    name: &str,
) -> Option<Mesh> {
    if primitive.mode() != gltf::mesh::Mode::Triangles {
        return None;
    }
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]));

    let positions: Vec<Vec3> = reader.read_positions()?.map(Vec3::from).collect();
    if positions.is_empty() {
        return None;
    }
    let normals: Option<Vec<Vec3>> = reader.read_normals().map(|iter| iter.map(Vec3::from).collect());
    let uvs: Option<Vec<Vec2>> = reader
        .read_tex_coords(0)
        .map(|coords| coords.into_f32().map(Vec2::from).collect());

    let normal_matrix = if world.determinant().abs() > 1e-12 {
        Mat3::from_mat4(world.inverse().transpose())
    } else {
        Mat3::IDENTITY
    };

    let mut vertices: Vec<Vertex> = positions
        .iter()
        .enumerate()
        .map(|(i, &position)| {
            let normal = normals
                .as_ref()
                .and_then(|n| n.get(i).copied())
                .unwrap_or(Vec3::Y);
            Vertex::new(
                world.transform_point3(position),
                (normal_matrix * normal).try_normalize().unwrap_or(Vec3::Y),
                uvs.as_ref().and_then(|uv| uv.get(i).copied()).unwrap_or(Vec2::ZERO),
            )
        })
        .collect();

    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices
            .into_u32()
            .collect::<Vec<_>>()
            .chunks_exact(3)
            .filter(|tri| tri.iter().all(|&i| (i as usize) < vertices.len()))
            .flatten()
            .copied()
            .collect(),
        None => sequential_indices(vertices.len()),
    };
    if indices.is_empty() {
        return None;
    }

    planar_uvs_if_degenerate(&mut vertices);

    Some(Mesh::new(name, vertices, indices).with_material(read_material(&primitive.material())))
}

/// Replace a collapsed UV set with a projection onto the two largest bounds axes
pub fn planar_uvs_if_degenerate(vertices: &mut [Vertex]) {
    let Some(first) = vertices.first() else {
        return;
    };
    let (mut uv_min, mut uv_max) = (first.uv, first.uv);
    let (mut min, mut max) = (first.position, first.position);
    for vertex in vertices.iter() {
        uv_min = uv_min.min(vertex.uv);
        uv_max = uv_max.max(vertex.uv);
        min = min.min(vertex.position);
        max = max.max(vertex.position);
    }
    let range = uv_max - uv_min;
    if range.x >= MIN_EXTENT || range.y >= MIN_EXTENT {
        return;
    }

    let extent = (max - min).max(Vec3::splat(MIN_EXTENT));
    // Drop the thinnest axis
    let (u_axis, v_axis) = if extent.x <= extent.y && extent.x <= extent.z {
        (2, 1)
    } else if extent.y <= extent.x && extent.y <= extent.z {
        (0, 2)
    } else {
        (0, 1)
    };
    for vertex in vertices.iter_mut() {
        let local = (vertex.position - min) / extent;
        vertex.uv = Vec2::new(local[u_axis], local[v_axis]);
    }
}

fn read_material(material: &gltf::Material<'_>) -> Material {
    let pbr = material.pbr_metallic_roughness();
    let [r, g, b, a] = pbr.base_color_factor();
    let alpha_mode = match material.alpha_mode() {
        gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
        gltf::material::AlphaMode::Mask => AlphaMode::Mask,
        gltf::material::AlphaMode::Blend => AlphaMode::Blend,
    };

    let mut out = Material::default()
        .with_base_color(Vec3::new(r, g, b))
        .with_metalness(pbr.metallic_factor())
        .with_roughness(pbr.roughness_factor())
        .with_emissive(Vec3::from(material.emissive_factor()))
        .with_alpha(a, alpha_mode);
    if let Some(occlusion) = material.occlusion_texture() {
        out = out.with_occlusion(occlusion.strength());
    }
    out.alpha_cutoff = material.alpha_cutoff().unwrap_or(0.5);
    out.double_sided = material.double_sided();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{importer_for, load_model};
    use std::path::PathBuf;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("stage_renderer_import_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// One triangle in the XY plane, no normals, UVs or indices, under a
    /// node translated to z = -5
    fn write_triangle(dir: &Path) -> PathBuf {
        let positions: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        std::fs::write(dir.join("triangle.bin"), bytemuck::cast_slice(&positions)).unwrap();
        let json = r#"{
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [ { "nodes": [0] } ],
            "nodes": [ { "name": "tri", "mesh": 0, "translation": [0.0, 0.0, -5.0] } ],
            "meshes": [ { "primitives": [ { "attributes": { "POSITION": 0 }, "material": 0 } ] } ],
            "materials": [ {
                "pbrMetallicRoughness": { "baseColorFactor": [1.0, 0.0, 0.0, 0.5], "metallicFactor": 0.25, "roughnessFactor": 0.75 },
                "emissiveFactor": [0.0, 1.0, 0.0],
                "alphaMode": "BLEND",
                "doubleSided": true
            } ],
            "buffers": [ { "uri": "triangle.bin", "byteLength": 36 } ],
            "bufferViews": [ { "buffer": 0, "byteOffset": 0, "byteLength": 36 } ],
            "accessors": [ {
                "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]
            } ]
        }"#;
        let path = dir.join("triangle.gltf");
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_load_triangle() {
        let dir = temp_dir("triangle");
        let path = write_triangle(&dir);
        let mut scene = Scene::new();
        scene.add_mesh(crate::scene::primitives::cube("existing"));

        assert_eq!(GltfImporter::new().load(&path, &mut scene, false).unwrap(), 1);
        assert_eq!(scene.meshes().len(), 1);

        let mesh = &scene.meshes()[0];
        assert_eq!(mesh.name, "tri");
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert!(mesh.vertices.iter().all(|v| (v.position.z + 5.0).abs() < 1e-6));
        assert!(mesh.vertices.iter().all(|v| v.normal == Vec3::Y));
        // Planar UVs over X and Y
        assert_eq!(mesh.vertices[1].uv, Vec2::new(1.0, 0.0));
        assert_eq!(mesh.vertices[2].uv, Vec2::new(0.0, 1.0));
        let bounds = mesh.local_bounds().unwrap();
        assert_eq!(bounds.max, Vec3::new(1.0, 1.0, -5.0));

        assert_eq!(mesh.material.base_color, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(mesh.material.alpha_mode, AlphaMode::Blend);
        assert_eq!(mesh.material.alpha, 0.5);
        assert_eq!(mesh.material.metalness, 0.25);
        assert_eq!(mesh.material.emissive, Vec3::Y);
        assert!(mesh.material.double_sided);
    }

    #[test]
    fn test_append_keeps_existing() {
        let dir = temp_dir("append");
        let path = write_triangle(&dir);
        let mut scene = Scene::new();
        scene.add_mesh(crate::scene::primitives::cube("existing"));
        assert_eq!(load_model(&path, &mut scene, true).unwrap(), 1);
        assert_eq!(scene.meshes().len(), 2);
    }

    #[test]
    fn test_empty_scene() {
        let dir = temp_dir("empty");
        let path = dir.join("empty.gltf");
        std::fs::write(&path, r#"{ "asset": { "version": "2.0" } }"#).unwrap();
        let mut scene = Scene::new();
        scene.add_mesh(crate::scene::primitives::cube("existing"));

        let err = GltfImporter::new().load(&path, &mut scene, false).unwrap_err();
        assert!(matches!(err, ImportError::EmptyScene(_)));
        assert_eq!(scene.meshes().len(), 1);
    }

    #[test]
    fn test_unreadable_and_unsupported() {
        let mut scene = Scene::new();
        let err = GltfImporter::new()
            .load(Path::new("/definitely/missing.glb"), &mut scene, false)
            .unwrap_err();
        assert!(matches!(err, ImportError::Gltf(_)));
        assert!(matches!(
            importer_for(Path::new("model.obj")),
            Err(ImportError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_planar_uvs_keep_real_coordinates() {
        let mut vertices = vec![
            Vertex::new(Vec3::ZERO, Vec3::Y, Vec2::new(0.2, 0.2)),
            Vertex::new(Vec3::X, Vec3::Y, Vec2::new(0.8, 0.2)),
        ];
        planar_uvs_if_degenerate(&mut vertices);
        assert_eq!(vertices[1].uv, Vec2::new(0.8, 0.2));
    }
}
