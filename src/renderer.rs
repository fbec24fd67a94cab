//! Deferred renderer facade
//!
//! Owns the render graph, the render target cache and the shader manager, and
//! drives one frame per [`DeferredRenderer::render`] call.

use crate::backend::{BackendResult, GraphicsBackend};
use crate::cache::{RenderTargetCache, ShaderManager};
use crate::config::RendererConfig;
use crate::pipeline::{build_deferred_graph, missing_stages};
use crate::render_graph::{FrameContext, LightCullingData, RenderGraph, ShadowData};
use crate::scene::Scene;

/// What a frame produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// `false` when the graph did not run
    pub rendered: bool,
    pub width: u32,
    pub height: u32,
    pub shadows: ShadowData,
    pub light_culling: LightCullingData,
    pub lighting_enabled: bool,
}

pub struct DeferredRenderer {
    config: RendererConfig,
    graph: RenderGraph,
    targets: RenderTargetCache,
    shaders: ShaderManager,
    initialized: bool,
    frame_count: u64,
}

impl DeferredRenderer {
    /// Create a renderer that loads shaders from `config.shader_dir`
    pub fn new(config: RendererConfig) -> Self {
        let shaders = ShaderManager::new(config.shader_dir.clone());
        Self::with_shaders(config, shaders)
    }

    /// Create a renderer around an already populated shader manager
    pub fn with_shaders(config: RendererConfig, shaders: ShaderManager) -> Self {
        Self {
            config,
            graph: RenderGraph::new(),
            targets: RenderTargetCache::new(),
            shaders,
            initialized: false,
            frame_count: 0,
        }
    }

    /// Build the pass list. Called lazily by the first frame.
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.graph = build_deferred_graph(&self.config);
        self.initialized = true;

        let missing = missing_stages(&self.shaders);
        if !missing.is_empty() {
            log::warn!(
                "Renderer: {} shader stage(s) unavailable in {}: {}",
                missing.len(),
                self.shaders.shader_dir().display(),
                missing.join(", ")
            );
        }
        log::info!("Renderer: initialized with passes [{}]", self.graph.pass_names().join(", "));
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Render `scene` into the next swapchain image and present it
    pub fn render(&mut self, backend: &mut dyn GraphicsBackend, scene: &mut Scene) -> BackendResult<FrameReport> {
        self.initialize();
        release_retired(backend, scene);

        let (width, height) = backend.surface_size();
        if width == 0 || height == 0 {
            log::trace!("Renderer: zero-sized surface, skipping frame");
            return Ok(FrameReport::default());
        }

        backend.begin_frame()?;
        let report = self.run_graph(backend, scene);
        backend.end_frame()?;
        self.frame_count += 1;
        Ok(report)
    }

    /// Run the graph against an already open frame (or none at all), leaving
    /// frame begin and presentation to the caller
    pub fn render_offscreen(&mut self, backend: &mut dyn GraphicsBackend, scene: &mut Scene) -> FrameReport {
        self.initialize();
        release_retired(backend, scene);
        let report = self.run_graph(backend, scene);
        self.frame_count += 1;
        report
    }

    fn run_graph(&mut self, backend: &mut dyn GraphicsBackend, scene: &mut Scene) -> FrameReport {
        let mut ctx = FrameContext::new(backend, &mut self.targets, &self.shaders, scene, &self.config);
        let (width, height) = ctx.target_size().unwrap_or((0, 0));
        let rendered = self.graph.run(&mut ctx);

        FrameReport {
            rendered,
            width,
            height,
            lighting_enabled: ctx.lighting_enabled,
            shadows: std::mem::take(&mut ctx.shadows),
            light_culling: std::mem::take(&mut ctx.light_culling),
        }
    }

    /// Resize the surface. Size dependent targets are recreated by the
    /// passes on the next frame.
    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::debug!("Renderer: ignoring resize to {}x{}", width, height);
            return;
        }
        backend.resize(width, height);
        let (actual_width, actual_height) = backend.surface_size();
        log::debug!("Renderer: resized to {}x{}", actual_width, actual_height);
    }

    /// Release every GPU resource held by passes, the target cache and the
    /// scene's meshes. The renderer can be used again afterwards.
    pub fn shutdown(&mut self, backend: &mut dyn GraphicsBackend, scene: &mut Scene) {
        self.graph.clear(backend);
        self.targets.release_all(backend);
        release_retired(backend, scene);
        for mesh in scene.meshes_mut() {
            mesh.gpu.release(backend);
        }
        self.shaders.clear_cache();
        self.initialized = false;
        log::info!("Renderer: shut down after {} frame(s)", self.frame_count);
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Toggle the G-buffer passthrough view from the next frame on
    pub fn set_debug_gbuffer(&mut self, enabled: bool) {
        self.config.debug_gbuffer_passthrough = enabled;
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut RenderGraph {
        &mut self.graph
    }

    pub fn targets(&self) -> &RenderTargetCache {
        &self.targets
    }

    pub fn shaders(&self) -> &ShaderManager {
        &self.shaders
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

fn release_retired(backend: &mut dyn GraphicsBackend, scene: &mut Scene) {
    let retired = scene.take_retired();
    if !retired.is_empty() {
        log::debug!("Renderer: releasing {} retired mesh resource set(s)", retired.len());
    }
    for mut gpu in retired {
        gpu.release(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordedCall, RecordingBackend};
    use crate::pipeline::test_util::{cube_scene, stub_shaders};
    use crate::pipeline::LightingPass;

    fn renderer(config: RendererConfig) -> DeferredRenderer {
        DeferredRenderer::with_shaders(config, stub_shaders())
    }

    #[test]
    fn test_frame_is_bracketed() {
        let mut backend = RecordingBackend::new();
        let mut scene = cube_scene();
        let mut renderer = renderer(RendererConfig::default());

        let report = renderer.render(&mut backend, &mut scene).unwrap();
        assert!(report.rendered);
        assert_eq!((report.width, report.height), (1280, 720));
        assert_eq!(report.shadows.cascade_count, 3);

        let calls = backend.calls();
        assert_eq!(calls.first(), Some(&RecordedCall::BeginFrame));
        assert_eq!(calls.last(), Some(&RecordedCall::EndFrame));
        assert_eq!(backend.frame_index(), 1);
        assert!(backend.render_pass_labels().iter().any(|label| label == "Post Pass"));
    }

    #[test]
    fn test_skip_lighting_leaves_pass_out() {
        let config = RendererConfig {
            skip_lighting: true,
            ..Default::default()
        };
        let mut renderer = renderer(config);
        renderer.initialize();
        assert!(renderer.graph().find_pass::<LightingPass>().is_none());
        assert_eq!(renderer.graph().pass_names().len(), 5);
    }

    #[test]
    fn test_offscreen_does_not_present() {
        let mut backend = RecordingBackend::new();
        let mut scene = cube_scene();
        let mut renderer = renderer(RendererConfig::default());

        let report = renderer.render_offscreen(&mut backend, &mut scene);
        assert!(report.rendered);
        assert!(!backend.calls().contains(&RecordedCall::EndFrame));
    }

    #[test]
    fn test_zero_surface_skips_frame() {
        let mut backend = RecordingBackend::new().with_surface_size(0, 0);
        let mut scene = cube_scene();
        let mut renderer = renderer(RendererConfig::default());

        let report = renderer.render(&mut backend, &mut scene).unwrap();
        assert!(!report.rendered);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_retired_meshes_are_released() {
        let mut backend = RecordingBackend::new();
        let mut scene = cube_scene();
        let mut renderer = renderer(RendererConfig::default());
        renderer.render(&mut backend, &mut scene).unwrap();

        let buffer = scene.meshes()[0].gpu.vertex_buffer().unwrap();
        assert!(backend.is_buffer_alive(buffer));
        scene.clear_meshes();
        renderer.render(&mut backend, &mut scene).unwrap();
        assert!(!backend.is_buffer_alive(buffer));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut backend = RecordingBackend::new();
        let mut scene = cube_scene();
        let mut renderer = renderer(RendererConfig::default());
        renderer.render(&mut backend, &mut scene).unwrap();
        renderer.render(&mut backend, &mut scene).unwrap();
        assert!(backend.live_resource_count() > 0);

        renderer.shutdown(&mut backend, &mut scene);
        assert_eq!(backend.live_resource_count(), 0);
        assert!(!renderer.is_initialized());
    }
}
