//! Mouse picking against scene meshes
//!
//! A ray is unprojected from a normalized window position through the
//! camera, then tested against every eligible mesh in its local space: a
//! bounds rejection first, then each triangle. The closest world-space hit
//! wins. Ray/plane and closest-point-on-axis helpers drive gizmo dragging.

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::backend::ClipSpace;
use crate::scene::{Aabb, Camera, Mesh, Scene};

const EPSILON: f32 = 1e-6;

/// Which meshes a pick may return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PickFilter {
    /// Every visible non-gizmo mesh
    #[default]
    All,
    /// Visible non-gizmo meshes with `selectable` set
    SelectableOnly,
    /// Visible gizmo meshes only
    GizmosOnly,
}

impl PickFilter {
    pub fn accepts(&self, mesh: &Mesh) -> bool {
        if !mesh.visible || mesh.vertices.is_empty() {
            return false;
        }
        match self {
            PickFilter::All => !mesh.is_gizmo(),
            PickFilter::SelectableOnly => !mesh.is_gizmo() && mesh.selectable,
            PickFilter::GizmosOnly => mesh.is_gizmo(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickHit {
    pub mesh_index: usize,
    pub world_position: Vec3,
    /// World-space distance from the ray origin
    pub distance: f32,
}

/// Half-line with a unit direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// `None` when `direction` has no usable length
    pub fn new(origin: Vec3, direction: Vec3) -> Option<Self> {
        let direction = direction.try_normalize()?;
        Some(Self { origin, direction })
    }

    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Ray under a window position in `[0, 1]²`, origin top-left, starting
    /// on the near plane.
    pub fn from_camera(camera: &Camera, clip: &ClipSpace, point: Vec2) -> Option<Self> {
        let view_proj = camera.clip_view_projection(clip);
        if view_proj.determinant().abs() < f32::EPSILON {
            return None;
        }
        let inverse = view_proj.inverse();

        let x = 2.0 * point.x - 1.0;
        let y = 1.0 - 2.0 * point.y;
        let (mut near_z, mut far_z) = (if clip.depth_zero_to_one { 0.0 } else { -1.0 }, 1.0);
        if clip.reverse_z() {
            std::mem::swap(&mut near_z, &mut far_z);
        }

        let near = unproject(&inverse, Vec4::new(x, y, near_z, 1.0))?;
        let far = unproject(&inverse, Vec4::new(x, y, far_z, 1.0))?;
        Self::new(near, far - near)
    }

    /// Same ray expressed in the space `matrix` maps into
    pub fn transformed(&self, matrix: &Mat4) -> Option<Self> {
        Self::new(
            matrix.transform_point3(self.origin),
            matrix.transform_vector3(self.direction),
        )
    }

    /// Entry and exit distances through `bounds`. Misses, and boxes wholly
    /// behind the origin, give `None`.
    pub fn intersect_aabb(&self, bounds: &Aabb) -> Option<(f32, f32)> {
        let mut t_near = 0.0f32;
        let mut t_far = f32::MAX;
        for axis in 0..3 {
            let origin = self.origin[axis];
            let direction = self.direction[axis];
            let (min, max) = (bounds.min[axis], bounds.max[axis]);

            if direction.abs() < EPSILON {
                if origin < min || origin > max {
                    return None;
                }
                continue;
            }

            let mut t1 = (min - origin) / direction;
            let mut t2 = (max - origin) / direction;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_near = t_near.max(t1);
            t_far = t_far.min(t2);
            if t_near > t_far {
                return None;
            }
        }
        (t_far >= 0.0).then_some((t_near, t_far))
    }

    /// Möller–Trumbore. Parallel rays, hits outside the triangle and hits at
    /// or behind the origin give `None`.
    pub fn intersect_triangle(&self, v0: Vec3, v1: Vec3, v2: Vec3) -> Option<f32> {
        let e1 = v1 - v0;
        let e2 = v2 - v0;
        let p = self.direction.cross(e2);
        let det = e1.dot(p);
        if det.abs() < EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;
        let t = self.origin - v0;
        let u = t.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = t.cross(e1);
        let v = self.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let hit = e2.dot(q) * inv_det;
        (hit > EPSILON).then_some(hit)
    }

    /// Point where the ray crosses the plane through `plane_origin`
    pub fn intersect_plane(&self, plane_origin: Vec3, plane_normal: Vec3) -> Option<Vec3> {
        let denom = self.direction.dot(plane_normal);
        if denom.abs() < EPSILON {
            return None;
        }
        let t = (plane_origin - self.origin).dot(plane_normal) / denom;
        (t > 0.0).then(|| self.point_at(t))
    }

    /// Parameter along the axis line of the point closest to this ray
    pub fn closest_axis_t(&self, axis_origin: Vec3, axis_direction: Vec3) -> Option<f32> {
        let a = self.direction.dot(self.direction);
        let b = self.direction.dot(axis_direction);
        let c = axis_direction.dot(axis_direction);
        if c < EPSILON {
            return None;
        }
        let w0 = self.origin - axis_origin;
        let d = self.direction.dot(w0);
        let e = axis_direction.dot(w0);
        let denom = a * c - b * b;
        if denom.abs() < EPSILON {
            return Some(-e / c);
        }
        Some((a * e - b * d) / denom)
    }
}

fn unproject(inverse: &Mat4, clip: Vec4) -> Option<Vec3> {
    let world = *inverse * clip;
    if world.w.abs() < EPSILON {
        return None;
    }
    let point = world.truncate() / world.w;
    point.is_finite().then_some(point)
}

/// Triangles of a mesh, from the index list or consecutive vertex triples
fn triangles(mesh: &Mesh) -> impl Iterator<Item = [Vec3; 3]> + '_ {
    let position = |index: usize| mesh.vertices.get(index).map(|v| v.position);
    let count = if mesh.indices.is_empty() {
        mesh.vertices.len() / 3
    } else {
        mesh.indices.len() / 3
    };
    (0..count).filter_map(move |tri| {
        let corner = |k: usize| {
            if mesh.indices.is_empty() {
                position(tri * 3 + k)
            } else {
                position(mesh.indices[tri * 3 + k] as usize)
            }
        };
        Some([corner(0)?, corner(1)?, corner(2)?])
    })
}

/// Closest hit of `ray` against a single mesh, in world space
pub fn pick_mesh(ray: &Ray, mesh: &Mesh) -> Option<(Vec3, f32)> {
    let model = mesh.model();
    if model.determinant().abs() < f32::EPSILON {
        return None;
    }
    let local = ray.transformed(&model.inverse())?;
    let bounds = mesh.local_bounds()?;
    local.intersect_aabb(&bounds)?;

    let mut closest: Option<(Vec3, f32)> = None;
    for [v0, v1, v2] in triangles(mesh) {
        let Some(t) = local.intersect_triangle(v0, v1, v2) else {
            continue;
        };
        let world = model.transform_point3(local.point_at(t));
        let distance = world.distance(ray.origin);
        if closest.map_or(true, |(_, best)| distance < best) {
            closest = Some((world, distance));
        }
    }
    closest
}

/// Closest hit of `ray` across the meshes `filter` accepts
pub fn pick_ray(scene: &Scene, ray: &Ray, filter: PickFilter) -> Option<PickHit> {
    let mut best: Option<PickHit> = None;
    for (mesh_index, mesh) in scene.meshes().iter().enumerate() {
        if !filter.accepts(mesh) {
            continue;
        }
        let Some((world_position, distance)) = pick_mesh(ray, mesh) else {
            continue;
        };
        if best.map_or(true, |hit| distance < hit.distance) {
            best = Some(PickHit {
                mesh_index,
                world_position,
                distance,
            });
        }
    }
    best
}

/// Mesh under a window position in `[0, 1]²`
pub fn pick(scene: &Scene, clip: &ClipSpace, point: Vec2, filter: PickFilter) -> Option<PickHit> {
    let ray = Ray::from_camera(&scene.camera, clip, point)?;
    pick_ray(scene, &ray, filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{primitives, Gizmo, GizmoAxis, GizmoKind};
    use rstest::rstest;

    fn unit_box() -> Aabb {
        Aabb {
            min: Vec3::splat(-0.5),
            max: Vec3::splat(0.5),
        }
    }

    #[rstest]
    #[case(Vec3::new(0.1, 0.2, 5.0), Vec3::NEG_Z, Vec3::new(0.1, 0.2, 0.5))]
    #[case(Vec3::new(0.1, 0.2, -5.0), Vec3::Z, Vec3::new(0.1, 0.2, -0.5))]
    #[case(Vec3::new(5.0, 0.1, 0.2), Vec3::NEG_X, Vec3::new(0.5, 0.1, 0.2))]
    #[case(Vec3::new(-5.0, 0.1, 0.2), Vec3::X, Vec3::new(-0.5, 0.1, 0.2))]
    #[case(Vec3::new(0.1, 5.0, 0.2), Vec3::NEG_Y, Vec3::new(0.1, 0.5, 0.2))]
    #[case(Vec3::new(0.1, -5.0, 0.2), Vec3::Y, Vec3::new(0.1, -0.5, 0.2))]
    fn test_axis_rays_hit_expected_face(#[case] origin: Vec3, #[case] direction: Vec3, #[case] face: Vec3) {
        let ray = Ray::new(origin, direction).unwrap();
        let (t_near, _) = ray.intersect_aabb(&unit_box()).unwrap();
        assert!((ray.point_at(t_near) - face).length() < 1e-5);

        let (hit, distance) = pick_mesh(&ray, &primitives::cube("cube")).unwrap();
        assert!((hit - face).length() < 1e-4, "{:?}", hit);
        assert!((distance - 4.5).abs() < 1e-4);
    }

    #[test]
    fn test_aabb_miss_and_behind() {
        let miss = Ray::new(Vec3::new(2.0, 0.0, 5.0), Vec3::NEG_Z).unwrap();
        assert!(miss.intersect_aabb(&unit_box()).is_none());
        let behind = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::Z).unwrap();
        assert!(behind.intersect_aabb(&unit_box()).is_none());
        let inside = Ray::new(Vec3::ZERO, Vec3::X).unwrap();
        assert_eq!(inside.intersect_aabb(&unit_box()), Some((0.0, 0.5)));
    }

    #[test]
    fn test_triangle_rejections() {
        let (v0, v1, v2) = (Vec3::ZERO, Vec3::X, Vec3::Y);
        let down = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::NEG_Z).unwrap();
        assert!((down.intersect_triangle(v0, v1, v2).unwrap() - 1.0).abs() < 1e-6);

        let parallel = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::X).unwrap();
        assert!(parallel.intersect_triangle(v0, v1, v2).is_none());
        let outside = Ray::new(Vec3::new(0.75, 0.75, 1.0), Vec3::NEG_Z).unwrap();
        assert!(outside.intersect_triangle(v0, v1, v2).is_none());
        let away = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::Z).unwrap();
        assert!(away.intersect_triangle(v0, v1, v2).is_none());
        let on_plane = Ray::new(Vec3::new(0.25, 0.25, 0.0), Vec3::NEG_Z).unwrap();
        assert!(on_plane.intersect_triangle(v0, v1, v2).is_none());
    }

    #[test]
    fn test_degenerate_direction() {
        assert!(Ray::new(Vec3::ZERO, Vec3::ZERO).is_none());
        let ray = Ray::new(Vec3::ZERO, Vec3::X).unwrap();
        assert!(ray.closest_axis_t(Vec3::ZERO, Vec3::ZERO).is_none());
    }

    #[test]
    fn test_plane_and_axis_helpers() {
        let ray = Ray::new(Vec3::new(1.0, 5.0, 0.0), Vec3::NEG_Y).unwrap();
        assert_eq!(ray.intersect_plane(Vec3::ZERO, Vec3::Y), Some(Vec3::new(1.0, 0.0, 0.0)));
        assert!(ray.intersect_plane(Vec3::new(0.0, 10.0, 0.0), Vec3::Y).is_none());
        assert!(ray.intersect_plane(Vec3::ZERO, Vec3::X).is_none());

        // Ray straight down at x = 3 crosses the X axis at t = 3
        let ray = Ray::new(Vec3::new(3.0, 5.0, 0.0), Vec3::NEG_Y).unwrap();
        assert!((ray.closest_axis_t(Vec3::ZERO, Vec3::X).unwrap() - 3.0).abs() < 1e-5);
        // Parallel to the axis: projection of the origin
        let ray = Ray::new(Vec3::new(2.0, 1.0, 0.0), Vec3::X).unwrap();
        assert!((ray.closest_axis_t(Vec3::ZERO, Vec3::X).unwrap() - 2.0).abs() < 1e-5);
    }

    /// Off the cube's face diagonals
    const NEAR_CENTER: Vec2 = Vec2::new(0.52, 0.47);

    fn scene_with(meshes: Vec<Mesh>) -> Scene {
        let mut scene = Scene::new();
        scene.camera.set_position(Vec3::ZERO);
        scene.camera.look_at(Vec3::NEG_Z);
        for mesh in meshes {
            scene.add_mesh(mesh);
        }
        scene
    }

    fn at(mut mesh: Mesh, z: f32) -> Mesh {
        mesh = mesh.with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, z)));
        mesh
    }

    fn gizmo(mut mesh: Mesh) -> Mesh {
        mesh.gizmo = Some(Gizmo {
            axis: GizmoAxis::X,
            kind: GizmoKind::Translate,
        });
        mesh
    }

    #[test]
    fn test_pick_closest_mesh_through_camera() {
        let scene = scene_with(vec![at(primitives::cube("far"), -10.0), at(primitives::cube("near"), -5.0)]);
        let hit = pick(&scene, &ClipSpace::default(), NEAR_CENTER, PickFilter::All).unwrap();
        assert_eq!(hit.mesh_index, 1);
        assert!((hit.world_position.z + 4.5).abs() < 1e-3);

        let miss = pick(&scene, &ClipSpace::default(), Vec2::new(0.0, 0.0), PickFilter::All);
        assert!(miss.is_none());
    }

    #[test]
    fn test_filters() {
        let mut unselectable = at(primitives::cube("fixed"), -5.0);
        unselectable.selectable = false;
        let handle = gizmo(at(primitives::cube("handle"), -8.0));
        let mut hidden = at(primitives::cube("hidden"), -3.0);
        hidden.visible = false;
        let scene = scene_with(vec![unselectable, handle, hidden]);
        let clip = ClipSpace::default();
        let center = NEAR_CENTER;

        assert_eq!(pick(&scene, &clip, center, PickFilter::All).unwrap().mesh_index, 0);
        assert!(pick(&scene, &clip, center, PickFilter::SelectableOnly).is_none());
        assert_eq!(pick(&scene, &clip, center, PickFilter::GizmosOnly).unwrap().mesh_index, 1);

        let mut unselectable_gizmo = gizmo(at(primitives::cube("locked handle"), -5.0));
        unselectable_gizmo.selectable = false;
        let scene = scene_with(vec![unselectable_gizmo]);
        assert!(pick(&scene, &clip, center, PickFilter::SelectableOnly).is_none());
    }

    #[test]
    fn test_non_indexed_mesh() {
        let cube = primitives::cube("cube");
        let flat: Vec<_> = cube.indices.iter().map(|&i| cube.vertices[i as usize]).collect();
        let mesh = at(Mesh::new("soup", flat, Vec::new()), -5.0);
        let scene = scene_with(vec![mesh]);
        assert!(pick(&scene, &ClipSpace::default(), NEAR_CENTER, PickFilter::All).is_some());
    }
}
