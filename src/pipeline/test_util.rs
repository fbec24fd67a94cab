use glam::{Mat4, Vec3};

use crate::backend::{GraphicsBackend, RecordingBackend, ShaderStageKind};
use crate::cache::{RenderTargetCache, ShaderManager};
use crate::config::RendererConfig;
use crate::pipeline::REQUIRED_STAGES;
use crate::render_graph::{FrameContext, RenderPass};
use crate::scene::{primitives, Light, Scene};

pub const STUB_VS: &str = "@vertex\nfn main() -> @builtin(position) vec4<f32> {\n    return vec4<f32>(0.0, 0.0, 0.0, 1.0);\n}\n";
pub const STUB_FS: &str = "@fragment\nfn main() -> @location(0) vec4<f32> {\n    return vec4<f32>(1.0, 1.0, 1.0, 1.0);\n}\n";
pub const STUB_CS: &str = "@compute @workgroup_size(1)\nfn main() {}\n";

/// Shader manager serving a trivial stage for every required name
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

/// Camera at the origin looking down -Z, a selected unit cube at (0, 0, -5)
/// and a shadow casting sun
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

/// Run `prepare` then `execute` of each pass in order, inside an open frame
pub fn run_passes(
    backend: &mut RecordingBackend,
    scene: &mut Scene,
    shaders: &ShaderManager,
    targets: &mut RenderTargetCache,
    config: &RendererConfig,
    passes: &mut [&mut dyn RenderPass],
) -> (crate::render_graph::ShadowData, crate::render_graph::LightCullingData) {
    if backend.current_frame().is_none() {
        let _ = backend.begin_frame();
    }
    let mut ctx = FrameContext::new(backend, targets, shaders, scene, config);
    for pass in passes.iter_mut() {
        pass.prepare(&mut ctx);
    }
    for pass in passes.iter_mut() {
        pass.execute(&mut ctx);
    }
    (ctx.shadows, ctx.light_culling)
}
