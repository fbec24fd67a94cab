//! Picking, host updates and fixture invariants through the public API.

mod common;

use std::f32::consts::PI;

use glam::{Mat4, Vec2, Vec3};
use rstest::rstest;

use common::{renderer, Profile};
use stage_renderer::backend::GraphicsBackend;
use stage_renderer::picking::{pick_mesh, pick_ray};
use stage_renderer::scene::{
    primitives, Gizmo, GizmoAxis, GizmoKind, LightKind, MeshUpdate, ObjectId, SceneUpdate, SpotCone,
};
use stage_renderer::{pick, Light, PickFilter, Ray, Scene};

/// Slightly off centre so rays never run along a face diagonal
const NEAR_CENTER: Vec2 = Vec2::new(0.52, 0.47);

/// Camera at z = 10 looking at a cube at the origin and a gizmo ring in front of it
fn pick_scene() -> Scene {
    let mut scene = Scene::new();
    scene.camera.set_position(Vec3::new(0.0, 0.0, 10.0));
    scene.camera.look_at(Vec3::ZERO);
    scene.add_mesh(primitives::cube("target").with_id(ObjectId(1)));
    scene.add_mesh(
        primitives::arc("ring", 0.3, 0.2, 0.0, 2.0 * PI, 24, 8)
            .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, 2.0)))
            .with_gizmo(Gizmo {
                axis: GizmoAxis::Z,
                kind: GizmoKind::Rotate,
            }),
    );
    scene
}

// ============================================================================
// Picking
// ============================================================================

#[rstest]
#[case::full(Profile::Full)]
#[case::reverse_z(Profile::ReverseZ)]
#[case::gl_like(Profile::GlLike)]
fn test_pick_through_camera(#[case] profile: Profile) {
    let backend = profile.backend();
    let clip = backend.clip_space();
    let scene = pick_scene();

    let hit = pick(&scene, &clip, NEAR_CENTER, PickFilter::All).unwrap();
    assert_eq!(hit.mesh_index, 0);
    assert!((hit.world_position.z - 0.5).abs() < 1e-3, "{:?}", hit);
    assert!((hit.distance - 9.5).abs() < 0.05);

    assert!(pick(&scene, &clip, Vec2::new(0.02, 0.02), PickFilter::All).is_none());
}

#[test]
fn test_pick_filters() {
    let clip = Profile::Full.backend().clip_space();
    let mut scene = pick_scene();

    // The ring sits in front of the cube at this point but is a gizmo
    let ring_point = Vec2::new(0.5325, 0.5);
    let gizmo = pick(&scene, &clip, ring_point, PickFilter::GizmosOnly).unwrap();
    assert_eq!(gizmo.mesh_index, 1);
    let plain = pick(&scene, &clip, ring_point, PickFilter::All).unwrap();
    assert_eq!(plain.mesh_index, 0);

    scene.meshes_mut()[0].selectable = false;
    assert!(pick(&scene, &clip, NEAR_CENTER, PickFilter::SelectableOnly).is_none());
    assert!(pick(&scene, &clip, NEAR_CENTER, PickFilter::All).is_some());

    scene.meshes_mut()[1].selectable = false;
    assert_eq!(
        pick(&scene, &clip, ring_point, PickFilter::GizmosOnly).map(|hit| hit.mesh_index),
        Some(1)
    );
}

#[test]
fn test_missing_bounds_box_means_no_hit() {
    let cube = primitives::cube("cube").with_transform(Mat4::from_translation(Vec3::new(3.0, 0.0, 0.0)));
    let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z).unwrap();
    assert!(pick_mesh(&ray, &cube).is_none());
    assert!(Ray::new(Vec3::ZERO, Vec3::ZERO).is_none());
}

#[test]
fn test_closest_mesh_wins() {
    let mut scene = Scene::new();
    scene.add_mesh(primitives::cube("far").with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -6.0))));
    scene.add_mesh(primitives::cube("near").with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0))));

    let ray = Ray::new(Vec3::new(0.1, 0.2, 0.0), Vec3::NEG_Z).unwrap();
    let hit = pick_ray(&scene, &ray, PickFilter::All).unwrap();
    assert_eq!(hit.mesh_index, 1);
    assert!((hit.distance - 2.5).abs() < 1e-4);
}

#[test]
fn test_axis_drag_helpers() {
    let ray = Ray::new(Vec3::new(2.0, 1.0, 5.0), Vec3::NEG_Z).unwrap();
    let on_plane = ray.intersect_plane(Vec3::ZERO, Vec3::Z).unwrap();
    assert!((on_plane - Vec3::new(2.0, 1.0, 0.0)).length() < 1e-5);

    let t = ray.closest_axis_t(Vec3::ZERO, Vec3::X).unwrap();
    assert!((t - 2.0).abs() < 1e-5);
    assert!(ray.closest_axis_t(Vec3::ZERO, Vec3::ZERO).is_none());
}

// ============================================================================
// Host Updates
// ============================================================================

#[test]
fn test_updates_mutate_in_place() {
    let mut backend = Profile::Full.backend();
    let mut renderer = renderer();
    let mut scene = pick_scene();
    renderer.render(&mut backend, &mut scene).unwrap();
    let buffer = scene.meshes()[0].gpu.vertex_buffer().unwrap();

    scene.apply(SceneUpdate {
        mesh_updates: vec![MeshUpdate::new(ObjectId(1)).offset(Vec3::new(0.0, 3.0, 0.0)).selected(true)],
        ..Default::default()
    });
    renderer.render(&mut backend, &mut scene).unwrap();

    assert_eq!(scene.meshes().len(), 2);
    let mesh = &scene.meshes()[0];
    assert!(mesh.selected);
    assert_eq!(mesh.gpu.vertex_buffer(), Some(buffer));
    assert!(backend.is_buffer_alive(buffer));

    let clip = backend.clip_space();
    assert!(pick(&scene, &clip, NEAR_CENTER, PickFilter::All).is_none());
}

#[test]
fn test_pending_lights_merge_once() {
    let mut scene = Scene::new();
    scene.apply(SceneUpdate {
        static_lights: Some(vec![Light::directional(Vec3::NEG_Y)]),
        pending_lights: vec![Light::point(Vec3::Y, 5.0)],
        ..Default::default()
    });
    assert_eq!(scene.lights().len(), 2);
    assert!(scene.lights_dirty());

    scene.clear_lights_dirty();
    scene.apply(SceneUpdate::default());
    assert_eq!(scene.lights().len(), 1);
    assert!(matches!(scene.lights()[0].kind, LightKind::Directional { .. }));
}

// ============================================================================
// Fixture Invariants
// ============================================================================

#[rstest]
#[case(5.0)]
#[case(14.0)]
#[case(45.0)]
#[case(89.0)]
fn test_fixture_cones_keep_inner_within_outer(#[case] degrees: f32) {
    let fixtures = [
        Light::spot_fixture(Vec3::ZERO, Vec3::NEG_Y, degrees),
        Light::moving_head(Vec3::ZERO, Vec3::NEG_Y, degrees, None),
        Light::beam_bar(Vec3::ZERO, Vec3::NEG_Y, 10.0, 0.1),
    ];
    for light in fixtures {
        let spot = light.as_spot().unwrap();
        assert!(spot.cone.inner() <= spot.cone.outer());
    }
}

#[test]
fn test_cone_setter_sequences() {
    let mut cone = SpotCone::from_degrees(30.0);
    for (inner, outer) in [(1.0, 0.2), (0.1, 0.05), (-1.0, 0.4), (0.6, 0.3), (0.3, 1.2)] {
        cone.set_inner(inner);
        assert!(cone.inner() <= cone.outer());
        cone.set_outer(outer);
        assert!(cone.inner() <= cone.outer());
        assert!(cone.inner() >= 0.0);
    }
}
