//! Light-space math for cascaded and spot shadows

use glam::{Mat4, Vec3};

use crate::render_graph::CASCADE_COUNT;
use crate::scene::{safe_up, Camera, Light, LightKind, SpotLight};

/// Weight of the logarithmic split against the uniform one
pub const SPLIT_BLEND: f32 = 0.5;
/// Distance the light eye is pulled back from the slice centroid
pub const LIGHT_DISTANCE: f32 = 50.0;
/// Extra depth added in front of and behind each cascade
pub const DEPTH_MARGIN: f32 = 50.0;
pub const MIN_ORTHO_NEAR: f32 = 0.1;
pub const SPOT_NEAR: f32 = 1.0;

/// Split distances `[near, s1, s2, far]` blending logarithmic and uniform splits
pub fn cascade_splits(near: f32, far: f32) -> [f32; CASCADE_COUNT + 1] {
    let mut splits = [near; CASCADE_COUNT + 1];
    for (i, split) in splits.iter_mut().enumerate().skip(1) {
        let p = i as f32 / CASCADE_COUNT as f32;
        let log_split = near * (far / near).powf(p);
        let uniform_split = near + (far - near) * p;
        *split = log_split * SPLIT_BLEND + uniform_split * (1.0 - SPLIT_BLEND);
    }
    splits[CASCADE_COUNT] = far;
    splits
}

/// Orthographic light view-projection tightly bounding the camera frustum
/// slice `[near, far]`. `None` when the light direction is degenerate.
pub fn cascade_view_proj(camera: &Camera, light_dir: Vec3, near: f32, far: f32) -> Option<Mat4> {
    let dir = light_dir.try_normalize()?;
    let corners = camera.frustum_slice_corners(near, far);
    let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;

    let eye = center - dir * LIGHT_DISTANCE;
    let view = Mat4::look_at_rh(eye, center, safe_up(dir));

    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    for corner in corners {
        let p = view.transform_point3(corner);
        min = min.min(p);
        max = max.max(p);
    }

    let ortho_near = (-max.z - DEPTH_MARGIN).max(MIN_ORTHO_NEAR);
    let ortho_far = (-min.z + DEPTH_MARGIN).max(ortho_near + 0.1);
    let projection = Mat4::orthographic_rh(min.x, max.x, min.y, max.y, ortho_near, ortho_far);
    let view_proj = projection * view;
    view_proj.is_finite().then_some(view_proj)
}

/// Far plane used for a spot light shadow
pub fn spot_far(range: f32) -> f32 {
    range.max(SPOT_NEAR + 0.1)
}

/// Perspective view-projection covering the whole spot cone
pub fn spot_view_proj(spot: &SpotLight, near: f32, far: f32) -> Option<Mat4> {
    let dir = spot.direction.try_normalize()?;
    let view = Mat4::look_at_rh(spot.position, spot.position + dir, safe_up(dir));
    let fov = (spot.cone.outer() * 2.0).max(0.01);
    let projection = Mat4::perspective_rh(fov, 1.0, near, far);
    let view_proj = projection * view;
    view_proj.is_finite().then_some(view_proj)
}

/// A spot light competing for a shadow slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotCandidate {
    pub light_index: usize,
    pub score: f32,
}

/// Shadow casting spots with positive range, best first. The score favours
/// long reach close to the camera: `range / max(distance, 0.1)`.
pub fn rank_spot_candidates(lights: &[Light], camera_position: Vec3) -> Vec<SpotCandidate> {
    let mut candidates: Vec<SpotCandidate> = lights
        .iter()
        .enumerate()
        .filter_map(|(light_index, light)| {
            let LightKind::Spot(spot) = &light.kind else {
                return None;
            };
            if !light.cast_shadows || spot.range <= 0.0 {
                return None;
            }
            let distance = spot.position.distance(camera_position);
            Some(SpotCandidate {
                light_index,
                score: spot.range / distance.max(0.1),
            })
        })
        .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_splits_are_monotonic() {
        for (near, far) in [(0.1, 1000.0), (0.5, 50.0), (1.0, 2.0)] {
            let splits = cascade_splits(near, far);
            assert_eq!(splits[0], near);
            assert_eq!(splits[CASCADE_COUNT], far);
            for pair in splits.windows(2) {
                assert!(pair[0] < pair[1], "{:?}", splits);
            }
        }
    }

    #[test]
    fn test_cascade_contains_frustum_slice() {
        let camera = Camera::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO);
        let dir = Vec3::new(-0.3, -1.0, -0.2);
        let view_proj = cascade_view_proj(&camera, dir, 0.1, 20.0).unwrap();

        for corner in camera.frustum_slice_corners(0.1, 20.0) {
            let clip = view_proj * corner.extend(1.0);
            let ndc = clip.truncate() / clip.w;
            assert!(ndc.x.abs() <= 1.0 + 1e-3, "{:?}", ndc);
            assert!(ndc.y.abs() <= 1.0 + 1e-3, "{:?}", ndc);
            assert!((-1e-3..=1.0 + 1e-3).contains(&ndc.z), "{:?}", ndc);
        }
    }

    #[test]
    fn test_vertical_light_and_zero_direction() {
        let camera = Camera::default();
        let view_proj = cascade_view_proj(&camera, Vec3::NEG_Y, 0.1, 10.0).unwrap();
        assert!(view_proj.is_finite());
        assert!(cascade_view_proj(&camera, Vec3::ZERO, 0.1, 10.0).is_none());
    }

    #[test]
    fn test_cascades_are_deterministic() {
        let camera = Camera::new(Vec3::new(1.0, 3.0, 4.0), Vec3::new(0.0, 0.0, -5.0));
        let a = cascade_view_proj(&camera, Vec3::new(0.2, -1.0, 0.1), 1.0, 30.0);
        let b = cascade_view_proj(&camera, Vec3::new(0.2, -1.0, 0.1), 1.0, 30.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_spot_projection_centers_the_cone_axis() {
        let light = Light::spot_fixture(Vec3::new(0.0, 5.0, 0.0), Vec3::NEG_Y, 20.0);
        let spot = light.as_spot().unwrap();
        let view_proj = spot_view_proj(spot, SPOT_NEAR, spot_far(spot.range)).unwrap();
        let clip = view_proj * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
        assert_eq!(spot_far(0.5), SPOT_NEAR + 0.1);
    }

    #[test]
    fn test_spot_ranking() {
        let lights = vec![
            Light::spot_fixture(Vec3::new(0.0, 5.0, -20.0), Vec3::NEG_Y, 20.0).with_shadows(true),
            Light::point(Vec3::ZERO, 10.0).with_shadows(true),
            Light::spot_fixture(Vec3::new(0.0, 5.0, -2.0), Vec3::NEG_Y, 20.0).with_shadows(true),
            Light::spot_fixture(Vec3::new(0.0, 5.0, -1.0), Vec3::NEG_Y, 20.0).with_shadows(false),
        ];
        let ranked = rank_spot_candidates(&lights, Vec3::ZERO);
        let order: Vec<usize> = ranked.iter().map(|c| c.light_index).collect();
        assert_eq!(order, vec![2, 0]);
    }
}
