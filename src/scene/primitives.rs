//! Primitive mesh builders
//!
//! All primitives are centred at the origin, wound counter-clockwise when seen
//! from outside, and carry baked bounds.

use glam::{Vec2, Vec3};
use std::f32::consts::{PI, TAU};

use crate::backend::Vertex;
use crate::scene::bounds::Aabb;
use crate::scene::mesh::Mesh;

fn with_bounds(mut mesh: Mesh, min: Vec3, max: Vec3) -> Mesh {
    mesh.bounds = Some(Aabb::new(min, max));
    mesh
}

/// Unit cube with per-face normals and UVs
pub fn cube(name: &str) -> Mesh {
    let faces = [
        // Front face
        (Vec3::new(-0.5, -0.5, 0.5), Vec3::new(0.5, -0.5, 0.5), Vec3::new(0.5, 0.5, 0.5), Vec3::new(-0.5, 0.5, 0.5), Vec3::Z),
        // Back face
        (Vec3::new(0.5, -0.5, -0.5), Vec3::new(-0.5, -0.5, -0.5), Vec3::new(-0.5, 0.5, -0.5), Vec3::new(0.5, 0.5, -0.5), Vec3::NEG_Z),
        // Right face
        (Vec3::new(0.5, -0.5, 0.5), Vec3::new(0.5, -0.5, -0.5), Vec3::new(0.5, 0.5, -0.5), Vec3::new(0.5, 0.5, 0.5), Vec3::X),
        // Left face
        (Vec3::new(-0.5, -0.5, -0.5), Vec3::new(-0.5, -0.5, 0.5), Vec3::new(-0.5, 0.5, 0.5), Vec3::new(-0.5, 0.5, -0.5), Vec3::NEG_X),
        // Top face
        (Vec3::new(-0.5, 0.5, 0.5), Vec3::new(0.5, 0.5, 0.5), Vec3::new(0.5, 0.5, -0.5), Vec3::new(-0.5, 0.5, -0.5), Vec3::Y),
        // Bottom face
        (Vec3::new(-0.5, -0.5, -0.5), Vec3::new(0.5, -0.5, -0.5), Vec3::new(0.5, -0.5, 0.5), Vec3::new(-0.5, -0.5, 0.5), Vec3::NEG_Y),
    ];
    let uvs = [
        Vec2::new(0.0, 1.0),
        Vec2::new(1.0, 1.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(0.0, 0.0),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (face, (a, b, c, d, normal)) in faces.into_iter().enumerate() {
        for (position, uv) in [a, b, c, d].into_iter().zip(uvs) {
            vertices.push(Vertex::new(position, normal, uv));
        }
        let base = face as u32 * 4;
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    with_bounds(
        Mesh::new(name, vertices, indices),
        Vec3::splat(-0.5),
        Vec3::splat(0.5),
    )
}

/// Unit quad in the XY plane facing +Z
pub fn quad(name: &str) -> Mesh {
    let h = 0.5;
    let vertices = vec![
        Vertex::new(Vec3::new(-h, -h, 0.0), Vec3::Z, Vec2::new(0.0, 1.0)),
        Vertex::new(Vec3::new(h, -h, 0.0), Vec3::Z, Vec2::new(1.0, 1.0)),
        Vertex::new(Vec3::new(h, h, 0.0), Vec3::Z, Vec2::new(1.0, 0.0)),
        Vertex::new(Vec3::new(-h, h, 0.0), Vec3::Z, Vec2::new(0.0, 0.0)),
    ];
    with_bounds(
        Mesh::new(name, vertices, vec![0, 1, 2, 0, 2, 3]),
        Vec3::new(-h, -h, 0.0),
        Vec3::new(h, h, 0.0),
    )
}

/// Square ground plane in XZ facing +Y
pub fn plane(name: &str, size: f32) -> Mesh {
    let h = size * 0.5;
    let vertices = vec![
        Vertex::new(Vec3::new(-h, 0.0, h), Vec3::Y, Vec2::new(0.0, 1.0)),
        Vertex::new(Vec3::new(h, 0.0, h), Vec3::Y, Vec2::new(1.0, 1.0)),
        Vertex::new(Vec3::new(h, 0.0, -h), Vec3::Y, Vec2::new(1.0, 0.0)),
        Vertex::new(Vec3::new(-h, 0.0, -h), Vec3::Y, Vec2::new(0.0, 0.0)),
    ];
    with_bounds(
        Mesh::new(name, vertices, vec![0, 1, 2, 0, 2, 3]),
        Vec3::new(-h, 0.0, -h),
        Vec3::new(h, 0.0, h),
    )
}

/// UV sphere. At least 2 rings and 3 sectors.
pub fn sphere(name: &str, radius: f32, rings: u32, sectors: u32) -> Mesh {
    let rings = rings.max(2);
    let sectors = sectors.max(3);
    let row = sectors + 1;

    let mut vertices = Vec::with_capacity(((rings + 1) * row) as usize);
    for r in 0..=rings {
        let v = r as f32 / rings as f32;
        let phi = v * PI;
        let (sin_phi, y) = phi.sin_cos();
        for s in 0..=sectors {
            let u = s as f32 / sectors as f32;
            let (sin_theta, cos_theta) = (u * TAU).sin_cos();
            let normal = Vec3::new(cos_theta * sin_phi, y, sin_theta * sin_phi);
            vertices.push(Vertex::new(normal * radius, normal, Vec2::new(u, v)));
        }
    }

    let mut indices = Vec::with_capacity((rings * sectors * 6) as usize);
    for r in 0..rings {
        for s in 0..sectors {
            let a = r * row + s;
            let b = a + 1;
            let c = a + row;
            let d = c + 1;
            indices.extend_from_slice(&[a, b, c, b, d, c]);
        }
    }

    with_bounds(
        Mesh::new(name, vertices, indices),
        Vec3::splat(-radius),
        Vec3::splat(radius),
    )
}

/// Capped cylinder along Y
pub fn cylinder(name: &str, radius: f32, height: f32, segments: u32) -> Mesh {
    let segments = segments.max(3);
    let half = height * 0.5;
    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    // Side
    for s in 0..=segments {
        let u = s as f32 / segments as f32;
        let (sin, cos) = (u * TAU).sin_cos();
        let normal = Vec3::new(cos, 0.0, sin);
        vertices.push(Vertex::new(Vec3::new(cos * radius, -half, sin * radius), normal, Vec2::new(u, 1.0)));
        vertices.push(Vertex::new(Vec3::new(cos * radius, half, sin * radius), normal, Vec2::new(u, 0.0)));
    }
    for s in 0..segments {
        let a = s * 2;
        let c = a + 1;
        let b = a + 2;
        let d = a + 3;
        indices.extend_from_slice(&[a, c, b, b, c, d]);
    }

    // Caps
    for (y, normal) in [(half, Vec3::Y), (-half, Vec3::NEG_Y)] {
        let center = vertices.len() as u32;
        vertices.push(Vertex::new(Vec3::new(0.0, y, 0.0), normal, Vec2::splat(0.5)));
        for s in 0..=segments {
            let (sin, cos) = (s as f32 / segments as f32 * TAU).sin_cos();
            vertices.push(Vertex::new(
                Vec3::new(cos * radius, y, sin * radius),
                normal,
                Vec2::new(0.5 + cos * 0.5, 0.5 + sin * 0.5),
            ));
        }
        for s in 0..segments {
            let ring = center + 1 + s;
            if normal.y > 0.0 {
                indices.extend_from_slice(&[center, ring + 1, ring]);
            } else {
                indices.extend_from_slice(&[center, ring, ring + 1]);
            }
        }
    }

    with_bounds(
        Mesh::new(name, vertices, indices),
        Vec3::new(-radius, -half, -radius),
        Vec3::new(radius, half, radius),
    )
}

/// Partial torus in the XY plane, used for rotation handles
pub fn arc(
    name: &str,
    major_radius: f32,
    tube_radius: f32,
    start_angle: f32,
    end_angle: f32,
    segments: u32,
    sides: u32,
) -> Mesh {
    let segments = segments.max(1);
    let sides = sides.max(3);
    let row = sides + 1;

    let mut vertices = Vec::with_capacity(((segments + 1) * row) as usize);
    for i in 0..=segments {
        let u = i as f32 / segments as f32;
        let (st, ct) = (start_angle + (end_angle - start_angle) * u).sin_cos();
        for j in 0..=sides {
            let v = j as f32 / sides as f32;
            let (sp, cp) = (v * TAU).sin_cos();
            let r = major_radius + tube_radius * cp;
            vertices.push(Vertex::new(
                Vec3::new(r * ct, r * st, tube_radius * sp),
                Vec3::new(ct * cp, st * cp, sp),
                Vec2::new(u, v),
            ));
        }
    }

    let mut indices = Vec::with_capacity((segments * sides * 6) as usize);
    for i in 0..segments {
        for j in 0..sides {
            let a = i * row + j;
            let b = a + 1;
            let c = a + row;
            let d = c + 1;
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }

    let extent = major_radius + tube_radius;
    with_bounds(
        Mesh::new(name, vertices, indices),
        Vec3::new(-extent, -extent, -tube_radius),
        Vec3::new(extent, extent, tube_radius),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every triangle's geometric normal agrees with its vertex normals
    fn assert_outward_winding(mesh: &Mesh) {
        for tri in mesh.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| mesh.vertices[i as usize]);
            let face = (b.position - a.position).cross(c.position - a.position);
            if face.length_squared() < 1e-12 {
                continue;
            }
            let normal = a.normal + b.normal + c.normal;
            assert!(face.dot(normal) > 0.0, "{}: inward triangle {:?}", mesh.name, tri);
        }
    }

    #[test]
    fn test_cube_layout() {
        let mesh = cube("cube");
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
        assert_eq!(mesh.bounds, Some(Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5))));
    }

    #[test]
    fn test_sphere_clamps_tessellation() {
        let mesh = sphere("sphere", 1.0, 0, 0);
        assert_eq!(mesh.vertices.len(), 3 * 4);
        assert_eq!(mesh.indices.len(), 2 * 3 * 6);
    }

    #[test]
    fn test_windings_face_outward() {
        assert_outward_winding(&cube("cube"));
        assert_outward_winding(&quad("quad"));
        assert_outward_winding(&plane("plane", 4.0));
        assert_outward_winding(&sphere("sphere", 0.5, 16, 24));
        assert_outward_winding(&cylinder("cylinder", 0.5, 2.0, 12));
        assert_outward_winding(&arc("arc", 1.0, 0.05, 0.0, PI, 24, 8));
    }

    #[test]
    fn test_baked_bounds_contain_vertices() {
        for mesh in [
            sphere("sphere", 0.5, 8, 12),
            cylinder("cylinder", 0.5, 2.0, 12),
            arc("arc", 1.0, 0.1, 0.0, TAU, 32, 8),
        ] {
            let bounds = mesh.bounds.unwrap();
            let grown = Aabb::new(bounds.min - Vec3::splat(1e-5), bounds.max + Vec3::splat(1e-5));
            assert!(mesh.vertices.iter().all(|v| grown.contains(v.position)));
        }
    }
}
