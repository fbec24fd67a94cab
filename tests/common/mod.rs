//! Common utilities for renderer integration tests.
//!
//! Every test runs against the [`RecordingBackend`], configured through a
//! [`Profile`] that mimics the capability set of a real GPU API.

#![allow(dead_code)]

use glam::{Mat4, Vec3, Vec4};

use stage_renderer::backend::{BackendCapabilities, RecordingBackend, ShaderStageKind};
use stage_renderer::cache::ShaderManager;
use stage_renderer::pipeline::REQUIRED_STAGES;
use stage_renderer::scene::primitives;
use stage_renderer::{DeferredRenderer, Light, RendererConfig, Scene};

pub const STUB_VS: &str = "@vertex\nfn main() -> @builtin(position) vec4<f32> {\n    return vec4<f32>(0.0, 0.0, 0.0, 1.0);\n}\n";
pub const STUB_FS: &str = "@fragment\nfn main() -> @location(0) vec4<f32> {\n    return vec4<f32>(1.0, 1.0, 1.0, 1.0);\n}\n";
pub const STUB_CS: &str = "@compute @workgroup_size(1)\nfn main() {}\n";

// ============================================================================
// Backend Profiles
// ============================================================================

/// Capability sets the passes must handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Compute, zero-to-one depth, Y-up NDC
    Full,
    /// No compute shaders, so no tiled light culling
    NoCompute,
    /// Projection correction that flips depth
    ReverseZ,
    /// [-1, 1] clip depth with a bottom-left framebuffer origin
    GlLike,
}

impl Profile {
    pub fn backend(self) -> RecordingBackend {
        match self {
            Profile::Full => RecordingBackend::new(),
            Profile::NoCompute => RecordingBackend::new().with_capabilities(BackendCapabilities {
                compute: false,
                storage_buffer_light_culling: false,
                ..Default::default()
            }),
            Profile::ReverseZ => RecordingBackend::new().with_clip_correction(reverse_z_correction()),
            Profile::GlLike => RecordingBackend::new().with_capabilities(BackendCapabilities {
                clip_depth_zero_to_one: false,
                y_up_in_framebuffer: true,
                ..Default::default()
            }),
        }
    }

    pub fn supports_light_culling(self) -> bool {
        self != Profile::NoCompute
    }
}

/// Maps depth `z` to `1 - z`
pub fn reverse_z_correction() -> Mat4 {
    Mat4::from_cols(
        Vec4::X,
        Vec4::Y,
        Vec4::new(0.0, 0.0, -1.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 1.0),
    )
}

// ============================================================================
// Renderer Setup
// ============================================================================

/// Shader manager serving a trivial, valid stage for every name the passes request
pub fn stub_shaders() -> ShaderManager {
    let shaders = ShaderManager::new("missing-shader-dir");
    for (name, kind) in REQUIRED_STAGES {
        let source = match kind {
            ShaderStageKind::Vertex => STUB_VS,
            ShaderStageKind::Fragment => STUB_FS,
            ShaderStageKind::Compute => STUB_CS,
        };
        shaders.register_source(name, *kind, source);
    }
    shaders
}

/// Small shadow maps keep the recorded uploads light
pub fn test_config() -> RendererConfig {
    RendererConfig {
        shadow_map_size: 256,
        spot_shadow_map_size: 64,
        gobo_size: 8,
        ..Default::default()
    }
}

pub fn renderer() -> DeferredRenderer {
    DeferredRenderer::with_shaders(test_config(), stub_shaders())
}

// ============================================================================
// Scenes
// ============================================================================

/// Camera at the origin looking down -Z, a selected unit cube at (0, 0, -5)
/// and a shadow casting directional light
pub fn cube_scene() -> Scene {
    let mut scene = Scene::new();
    scene.camera.set_position(Vec3::ZERO);
    scene.camera.look_at(Vec3::new(0.0, 0.0, -1.0));

    let mut cube = primitives::cube("cube").with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)));
    cube.selected = true;
    scene.add_mesh(cube);
    scene.set_lights(vec![Light::directional(Vec3::new(-0.3, -1.0, -0.2)).with_shadows(true)]);
    scene
}

/// [`cube_scene`] plus a floor and two shadow casting spots
pub fn stage_scene() -> Scene {
    let mut scene = cube_scene();
    scene.add_mesh(
        primitives::plane("floor", 20.0).with_transform(Mat4::from_translation(Vec3::new(0.0, -1.0, -5.0))),
    );

    let mut lights = scene.lights().to_vec();
    lights.push(Light::spot_fixture(Vec3::new(-2.0, 4.0, -3.0), Vec3::new(0.3, -1.0, -0.4), 25.0));
    lights.push(Light::spot_fixture(Vec3::new(2.0, 4.0, -3.0), Vec3::new(-0.3, -1.0, -0.4), 25.0));
    scene.set_lights(lights);
    scene
}
