//! Light types for the scene

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

use crate::scene::Scene;

/// Maximum number of lights uploaded to the GPU
pub const MAX_LIGHTS: usize = 100;

/// Spot cone half-angles in radians, always `inner <= outer`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotCone {
    inner: f32,
    outer: f32,
}

impl Default for SpotCone {
    fn default() -> Self {
        Self {
            inner: 0.5,
            outer: 0.7,
        }
    }
}

impl SpotCone {
    /// Negative angles become zero and `inner` is clamped to `outer`
    pub fn new(inner: f32, outer: f32) -> Self {
        let outer = outer.max(0.0);
        Self {
            inner: inner.max(0.0).min(outer),
            outer,
        }
    }

    /// Outer half-angle of `cone_degrees`, softened over the last 20%
    pub fn from_degrees(cone_degrees: f32) -> Self {
        let outer = cone_degrees.to_radians();
        Self::new(outer * 0.8, outer)
    }

    pub fn inner(&self) -> f32 {
        self.inner
    }

    pub fn outer(&self) -> f32 {
        self.outer
    }

    pub fn set_inner(&mut self, inner: f32) {
        self.inner = inner.max(0.0).min(self.outer);
    }

    /// Narrowing the outer angle pulls the inner angle with it
    pub fn set_outer(&mut self, outer: f32) {
        self.outer = outer.max(0.0);
        self.inner = self.inner.min(self.outer);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BeamShape {
    /// Beam widens with the cone
    #[default]
    Cone,
    /// Fixed-width beam (beam bars)
    Beam,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Beam {
    pub shape: BeamShape,
    pub radius: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotLight {
    pub position: Vec3,
    pub direction: Vec3,
    pub range: f32,
    pub cone: SpotCone,
    /// Shadow softness sample count
    pub quality_steps: u32,
    pub gobo: Option<String>,
    pub beam: Beam,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            direction: Vec3::NEG_Y,
            range: 10.0,
            cone: SpotCone::default(),
            quality_steps: 8,
            gobo: None,
            beam: Beam::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LightKind {
    Directional {
        direction: Vec3,
    },
    Point {
        position: Vec3,
        range: f32,
    },
    Spot(SpotLight),
    Area {
        position: Vec3,
        direction: Vec3,
        range: f32,
        size: Vec2,
    },
}

impl LightKind {
    /// Type code understood by the lighting shaders
    pub fn type_code(&self) -> u32 {
        match self {
            LightKind::Directional { .. } => 0,
            LightKind::Point { .. } => 1,
            LightKind::Spot(_) => 2,
            LightKind::Area { .. } => 3,
        }
    }
}

/// A scene light. Recomputed from host configuration every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub color: Vec3,
    pub intensity: f32,
    pub cast_shadows: bool,
    pub kind: LightKind,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            cast_shadows: true,
            kind: LightKind::Point {
                position: Vec3::ZERO,
                range: 10.0,
            },
        }
    }
}

impl Light {
    pub fn directional(direction: Vec3) -> Self {
        Self {
            kind: LightKind::Directional { direction },
            ..Default::default()
        }
    }

    pub fn point(position: Vec3, range: f32) -> Self {
        Self {
            kind: LightKind::Point { position, range },
            ..Default::default()
        }
    }

    pub fn spot(spot: SpotLight) -> Self {
        Self {
            kind: LightKind::Spot(spot),
            ..Default::default()
        }
    }

    pub fn area(position: Vec3, direction: Vec3, size: Vec2) -> Self {
        Self {
            kind: LightKind::Area {
                position,
                direction,
                range: 10.0,
                size,
            },
            ..Default::default()
        }
    }

    /// Generic spot fixture, `cone_degrees` is the outer half-angle
    pub fn spot_fixture(position: Vec3, direction: Vec3, cone_degrees: f32) -> Self {
        Self::spot(SpotLight {
            position,
            direction,
            cone: SpotCone::from_degrees(cone_degrees),
            ..Default::default()
        })
    }

    /// Moving head: zoom sets the cone, optional gobo
    pub fn moving_head(position: Vec3, direction: Vec3, zoom_degrees: f32, gobo: Option<String>) -> Self {
        Self::spot(SpotLight {
            position,
            direction,
            range: 20.0,
            cone: SpotCone::from_degrees(zoom_degrees),
            gobo,
            ..Default::default()
        })
    }

    /// One emitter of a beam bar: a 1 degree cone with a fixed-width beam
    pub fn beam_bar(position: Vec3, direction: Vec3, range: f32, beam_radius: f32) -> Self {
        Self::spot(SpotLight {
            position,
            direction,
            range,
            cone: SpotCone::from_degrees(1.0),
            beam: Beam {
                shape: BeamShape::Beam,
                radius: beam_radius,
            },
            ..Default::default()
        })
    }

    pub fn with_color(mut self, color: Vec3) -> Self {
        self.color = color;
        self
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_shadows(mut self, cast_shadows: bool) -> Self {
        self.cast_shadows = cast_shadows;
        self
    }

    pub fn position(&self) -> Vec3 {
        match &self.kind {
            LightKind::Directional { .. } => Vec3::ZERO,
            LightKind::Point { position, .. } | LightKind::Area { position, .. } => *position,
            LightKind::Spot(spot) => spot.position,
        }
    }

    pub fn direction(&self) -> Vec3 {
        match &self.kind {
            LightKind::Directional { direction } | LightKind::Area { direction, .. } => *direction,
            LightKind::Spot(spot) => spot.direction,
            LightKind::Point { .. } => Vec3::ZERO,
        }
    }

    /// Zero for directional lights, which have no falloff
    pub fn range(&self) -> f32 {
        match &self.kind {
            LightKind::Directional { .. } => 0.0,
            LightKind::Point { range, .. } | LightKind::Area { range, .. } => *range,
            LightKind::Spot(spot) => spot.range,
        }
    }

    pub fn as_spot(&self) -> Option<&SpotLight> {
        match &self.kind {
            LightKind::Spot(spot) => Some(spot),
            _ => None,
        }
    }

    pub fn gobo(&self) -> Option<&str> {
        self.as_spot().and_then(|s| s.gobo.as_deref())
    }
}

/// Packed light array consumed by the lighting resolve and light culling
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightsUniform {
    /// x = light count, yzw = ambient colour scaled by intensity
    pub count_ambient: Vec4,
    /// smoke amount, beam model, bloom intensity, bloom radius
    pub params: Vec4,
    /// volumetric, smoke noise, shadows, unused
    pub flags: Vec4,
    pub beam: [Vec4; MAX_LIGHTS],
    pub pos_range: [Vec4; MAX_LIGHTS],
    pub color_intensity: [Vec4; MAX_LIGHTS],
    pub dir_inner: [Vec4; MAX_LIGHTS],
    /// cos outer, type code, then gobo layer and quality steps (spot) or area size
    pub other: [Vec4; MAX_LIGHTS],
}

fn flag(value: bool) -> f32 {
    if value {
        1.0
    } else {
        0.0
    }
}

impl LightsUniform {
    pub fn from_scene(scene: &Scene) -> Self {
        let mut data = Self::zeroed();
        let lights = scene.lights();
        let count = lights.len().min(MAX_LIGHTS);
        let ambient = scene.ambient_color * scene.ambient_intensity;

        data.count_ambient = Vec4::new(count as f32, ambient.x, ambient.y, ambient.z);
        data.params = Vec4::new(
            scene.smoke_amount,
            scene.beam_model.code() as f32,
            scene.bloom_intensity,
            scene.bloom_radius,
        );
        data.flags = Vec4::new(
            flag(scene.volumetric_enabled),
            flag(scene.smoke_noise_enabled),
            flag(scene.shadows_enabled),
            0.0,
        );

        for (i, light) in lights.iter().take(count).enumerate() {
            let dir = light.direction().normalize_or_zero();
            data.pos_range[i] = light.position().extend(light.range());
            data.color_intensity[i] = light.color.extend(light.intensity);

            let (inner, outer, extra, beam) = match &light.kind {
                LightKind::Spot(spot) => {
                    let gobo_layer = if spot.gobo.is_some() { i as f32 } else { -1.0 };
                    (
                        spot.cone.inner(),
                        spot.cone.outer(),
                        Vec2::new(gobo_layer, spot.quality_steps as f32),
                        spot.beam,
                    )
                }
                LightKind::Area { size, .. } => {
                    let cone = SpotCone::default();
                    (cone.inner(), cone.outer(), *size, Beam::default())
                }
                _ => {
                    let cone = SpotCone::default();
                    (cone.inner(), cone.outer(), Vec2::ZERO, Beam::default())
                }
            };
            let beam_shape = match beam.shape {
                BeamShape::Cone => 0.0,
                BeamShape::Beam => 1.0,
            };

            data.dir_inner[i] = dir.extend(inner.cos());
            data.beam[i] = Vec4::new(beam.radius, beam_shape, 0.0, 0.0);
            data.other[i] = Vec4::new(outer.cos(), light.kind.type_code() as f32, extra.x, extra.y);
        }
        data
    }

    pub fn light_count(&self) -> usize {
        self.count_ambient.x as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cone_setters_keep_inner_below_outer() {
        let mut cone = SpotCone::new(0.9, 0.4);
        assert!(cone.inner() <= cone.outer());

        cone.set_inner(2.0);
        assert_eq!(cone.inner(), cone.outer());

        cone.set_outer(0.1);
        assert_eq!(cone.outer(), 0.1);
        assert!(cone.inner() <= 0.1);

        cone.set_outer(1.0);
        cone.set_inner(0.5);
        assert_eq!(cone.inner(), 0.5);
    }

    #[test]
    fn test_fixture_cones() {
        for light in [
            Light::spot_fixture(Vec3::ZERO, Vec3::NEG_Y, 25.0),
            Light::moving_head(Vec3::ZERO, Vec3::NEG_Y, 40.0, None),
            Light::beam_bar(Vec3::ZERO, Vec3::NEG_Y, 15.0, 0.05),
        ] {
            let spot = light.as_spot().unwrap();
            assert!(spot.cone.inner() <= spot.cone.outer());
            assert!((spot.cone.inner() - spot.cone.outer() * 0.8).abs() < 1e-6);
        }
        let bar = Light::beam_bar(Vec3::ZERO, Vec3::NEG_Y, 15.0, 0.05);
        assert_eq!(bar.as_spot().unwrap().beam.shape, BeamShape::Beam);
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(Light::directional(Vec3::NEG_Y).kind.type_code(), 0);
        assert_eq!(Light::point(Vec3::ZERO, 5.0).kind.type_code(), 1);
        assert_eq!(Light::spot(SpotLight::default()).kind.type_code(), 2);
        assert_eq!(Light::area(Vec3::ZERO, Vec3::NEG_Y, Vec2::ONE).kind.type_code(), 3);
    }

    #[test]
    fn test_uniform_packing() {
        let mut scene = Scene::default();
        scene.ambient_color = Vec3::splat(0.5);
        scene.ambient_intensity = 2.0;
        scene.set_lights(vec![
            Light::point(Vec3::new(1.0, 2.0, 3.0), 7.0),
            Light::moving_head(Vec3::Y, Vec3::NEG_Y, 30.0, Some("gobo.png".into())),
            Light::area(Vec3::ZERO, Vec3::NEG_Y, Vec2::new(2.0, 3.0)),
        ]);

        let data = LightsUniform::from_scene(&scene);
        assert_eq!(data.light_count(), 3);
        assert_eq!(data.count_ambient.y, 1.0);
        assert_eq!(data.pos_range[0], Vec4::new(1.0, 2.0, 3.0, 7.0));
        assert_eq!(data.other[1].y, 2.0);
        assert_eq!(data.other[1].z, 1.0);
        assert_eq!(data.other[1].w, 8.0);
        assert_eq!(data.other[2].z, 2.0);
        assert_eq!(data.other[2].w, 3.0);
        assert_eq!(data.flags.z, 1.0);
    }

    #[test]
    fn test_uniform_caps_light_count() {
        let mut scene = Scene::default();
        scene.set_lights(vec![Light::point(Vec3::ZERO, 1.0); MAX_LIGHTS + 20]);
        assert_eq!(LightsUniform::from_scene(&scene).light_count(), MAX_LIGHTS);
    }
}
