//! Deferred rendering pipeline
//!
//! Passes in execution order:
//! 1. Depth - early-z slot, records nothing yet
//! 2. G-Buffer - opaque geometry into three colour targets plus depth
//! 3. Shadow - directional cascades and spot light shadow maps
//! 4. Light culling - per-tile light lists on compute capable backends
//! 5. Lighting - full-screen deferred resolve plus the selection outline
//! 6. Post - bloom, composite to the swapchain, gizmo overlay

pub mod depth;
pub mod gbuffer;
pub mod light_culling;
pub mod lighting;
pub mod post;
pub mod shadow;

#[cfg(test)]
pub(crate) mod test_util;

pub use depth::DepthPass;
pub use gbuffer::GBufferPass;
pub use light_culling::LightCullingPass;
pub use lighting::LightingPass;
pub use post::PostPass;
pub use shadow::ShadowPass;

use crate::backend::*;
use crate::cache::ShaderManager;
use crate::config::RendererConfig;
use crate::render_graph::RenderGraph;
use crate::scene::Scene;

/// Every shader stage requested by the built-in passes
pub const REQUIRED_STAGES: &[(&str, ShaderStageKind)] = &[
    (gbuffer::GBUFFER_VS, ShaderStageKind::Vertex),
    (gbuffer::GBUFFER_FS, ShaderStageKind::Fragment),
    (shadow::SHADOW_VS, ShaderStageKind::Vertex),
    (shadow::SHADOW_FS, ShaderStageKind::Fragment),
    (shadow::SHADOW_SPOT_FS, ShaderStageKind::Fragment),
    (light_culling::LIGHT_CULL_CS, ShaderStageKind::Compute),
    (lighting::FULLSCREEN_VS, ShaderStageKind::Vertex),
    (lighting::LIGHTING_FS, ShaderStageKind::Fragment),
    (lighting::LIGHTING_TILED_FS, ShaderStageKind::Fragment),
    (lighting::OUTLINE_VS, ShaderStageKind::Vertex),
    (lighting::OUTLINE_FS, ShaderStageKind::Fragment),
    (post::BLOOM_DOWNSAMPLE_FS, ShaderStageKind::Fragment),
    (post::BLOOM_BLUR_FS, ShaderStageKind::Fragment),
    (post::COMPOSITE_FS, ShaderStageKind::Fragment),
    (post::GIZMO_VS, ShaderStageKind::Vertex),
    (post::GIZMO_FS, ShaderStageKind::Fragment),
];

/// Stages from [`REQUIRED_STAGES`] the shader manager cannot load
pub fn missing_stages(shaders: &ShaderManager) -> Vec<&'static str> {
    REQUIRED_STAGES
        .iter()
        .filter(|(name, kind)| shaders.try_load_stage(*kind, name).is_err())
        .map(|(name, _)| *name)
        .collect()
}

/// Build the deferred render graph
pub fn build_deferred_graph(config: &RendererConfig) -> RenderGraph {
    let mut graph = RenderGraph::new();

    graph.add_pass(DepthPass::new());
    graph.add_pass(GBufferPass::new());
    graph.add_pass(ShadowPass::new(config));
    graph.add_pass(LightCullingPass::new(config.tile_size));
    if config.skip_lighting {
        log::warn!("Renderer: lighting pass disabled by configuration");
    } else {
        graph.add_pass(LightingPass::new(config));
    }
    graph.add_pass(PostPass::new());

    graph
}

/// GPU resources owned by one pass, destroyed together
#[derive(Debug, Default)]
pub struct OwnedResources {
    buffers: Vec<BufferHandle>,
    textures: Vec<TextureHandle>,
    views: Vec<TextureViewHandle>,
    samplers: Vec<SamplerHandle>,
    layouts: Vec<BindGroupLayoutHandle>,
    bind_groups: Vec<BindGroupHandle>,
    render_pipelines: Vec<RenderPipelineHandle>,
    compute_pipelines: Vec<ComputePipelineHandle>,
}

impl OwnedResources {
    pub fn buffer(&mut self, handle: BufferHandle) -> BufferHandle {
        self.buffers.push(handle);
        handle
    }

    pub fn texture(&mut self, handle: TextureHandle) -> TextureHandle {
        self.textures.push(handle);
        handle
    }

    pub fn view(&mut self, handle: TextureViewHandle) -> TextureViewHandle {
        self.views.push(handle);
        handle
    }

    pub fn sampler(&mut self, handle: SamplerHandle) -> SamplerHandle {
        self.samplers.push(handle);
        handle
    }

    pub fn layout(&mut self, handle: BindGroupLayoutHandle) -> BindGroupLayoutHandle {
        self.layouts.push(handle);
        handle
    }

    pub fn bind_group(&mut self, handle: BindGroupHandle) -> BindGroupHandle {
        self.bind_groups.push(handle);
        handle
    }

    pub fn render_pipeline(&mut self, handle: RenderPipelineHandle) -> RenderPipelineHandle {
        self.render_pipelines.push(handle);
        handle
    }

    pub fn compute_pipeline(&mut self, handle: ComputePipelineHandle) -> ComputePipelineHandle {
        self.compute_pipelines.push(handle);
        handle
    }

    /// Destroy a bind group early and stop tracking it
    pub fn destroy_bind_group(&mut self, backend: &mut dyn GraphicsBackend, handle: BindGroupHandle) {
        if let Some(index) = self.bind_groups.iter().position(|&g| g == handle) {
            self.bind_groups.swap_remove(index);
            backend.destroy_bind_group(handle);
        }
    }

    /// Destroy everything, dependents first
    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        for group in self.bind_groups.drain(..) {
            backend.destroy_bind_group(group);
        }
        for pipeline in self.render_pipelines.drain(..) {
            backend.destroy_render_pipeline(pipeline);
        }
        for pipeline in self.compute_pipelines.drain(..) {
            backend.destroy_compute_pipeline(pipeline);
        }
        for layout in self.layouts.drain(..) {
            backend.destroy_bind_group_layout(layout);
        }
        for view in self.views.drain(..) {
            backend.destroy_texture_view(view);
        }
        for texture in self.textures.drain(..) {
            backend.destroy_texture(texture);
        }
        for sampler in self.samplers.drain(..) {
            backend.destroy_sampler(sampler);
        }
        for buffer in self.buffers.drain(..) {
            backend.destroy_buffer(buffer);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
            && self.textures.is_empty()
            && self.views.is_empty()
            && self.samplers.is_empty()
            && self.layouts.is_empty()
            && self.bind_groups.is_empty()
            && self.render_pipelines.is_empty()
            && self.compute_pipelines.is_empty()
    }
}

/// Load a vertex/fragment pair, `None` when either stage is unusable
pub(crate) fn load_stages(
    shaders: &ShaderManager,
    vertex: &str,
    fragment: &str,
) -> Option<(ShaderStage, ShaderStage)> {
    let vs = shaders.load_stage(ShaderStageKind::Vertex, vertex);
    let fs = shaders.load_stage(ShaderStageKind::Fragment, fragment);
    (vs.is_valid() && fs.is_valid()).then_some((vs, fs))
}

/// Pipeline for a full-screen triangle drawn without vertex buffers
pub(crate) fn fullscreen_pipeline_descriptor(
    label: &str,
    vs: ShaderStage,
    fs: ShaderStage,
    bind_group_layouts: Vec<BindGroupLayoutHandle>,
    target: ColorTargetState,
) -> RenderPipelineDescriptor {
    RenderPipelineDescriptor {
        label: Some(label.to_string()),
        vertex: vs,
        fragment: Some(fs),
        vertex_layouts: Vec::new(),
        bind_group_layouts,
        primitive_topology: PrimitiveTopology::TriangleList,
        front_face: FrontFace::Ccw,
        cull_mode: CullMode::None,
        depth_stencil: None,
        color_targets: vec![target],
        sample_count: 1,
    }
}

/// Create a uniform buffer sized for `T`
pub(crate) fn create_uniform<T: bytemuck::Pod>(
    backend: &mut dyn GraphicsBackend,
    owned: &mut OwnedResources,
    label: &str,
) -> BackendResult<BufferHandle> {
    let buffer = backend.create_buffer(&BufferDescriptor::uniform(
        label,
        std::mem::size_of::<T>() as u64,
    ))?;
    Ok(owned.buffer(buffer))
}

/// `(flip sample Y, flip NDC Y, 0, 0)`. Shaders assume a Y-up framebuffer
/// and Y-up NDC.
pub(crate) fn flip_params(capabilities: &BackendCapabilities) -> glam::Vec4 {
    glam::Vec4::new(
        if capabilities.y_up_in_framebuffer { 0.0 } else { 1.0 },
        if capabilities.y_up_in_ndc { 0.0 } else { 1.0 },
        0.0,
        0.0,
    )
}

/// Upload geometry and uniforms of every mesh
pub(crate) fn sync_meshes(backend: &mut dyn GraphicsBackend, scene: &mut Scene) {
    for mesh in scene.meshes_mut() {
        mesh.sync_gpu(backend);
    }
}

/// Record an indexed draw of a mesh with its bind group at `group_index`
pub(crate) fn draw_mesh(
    backend: &mut dyn GraphicsBackend,
    gpu: &crate::scene::MeshGpu,
    group_index: u32,
    group: BindGroupHandle,
) {
    let (Some(vertex_buffer), Some(index_buffer)) = (gpu.vertex_buffer(), gpu.index_buffer()) else {
        return;
    };
    backend.set_bind_group(group_index, group);
    backend.set_vertex_buffer(0, vertex_buffer, 0);
    backend.set_index_buffer(index_buffer, 0, IndexFormat::Uint32);
    backend.draw_indexed(0..gpu.index_count(), 0, 0..1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_resources_release_everything() {
        let mut backend = RecordingBackend::new();
        let mut owned = OwnedResources::default();

        let buffer = owned.buffer(backend.create_buffer(&BufferDescriptor::uniform("u", 16)).unwrap());
        let texture = owned.texture(
            backend
                .create_texture(&TextureDescriptor {
                    width: 4,
                    height: 4,
                    ..Default::default()
                })
                .unwrap(),
        );
        owned.view(backend.create_texture_view(texture, TextureViewDimension::D2).unwrap());
        let layout = owned.layout(
            backend
                .create_bind_group_layout(
                    "l",
                    &[BindGroupLayoutEntry::new(0, ShaderStageFlags::FRAGMENT, BindingType::UniformBuffer)],
                )
                .unwrap(),
        );
        owned.bind_group(
            backend
                .create_bind_group(layout, &[(0, BindGroupEntry::buffer(buffer))])
                .unwrap(),
        );
        assert!(!owned.is_empty());

        owned.release(&mut backend);
        assert!(owned.is_empty());
        assert_eq!(backend.live_resource_count(), 0);
    }

    #[test]
    fn test_flip_params() {
        let caps = BackendCapabilities {
            y_up_in_framebuffer: true,
            y_up_in_ndc: false,
            ..Default::default()
        };
        assert_eq!(flip_params(&caps), glam::Vec4::new(0.0, 1.0, 0.0, 0.0));
        assert_eq!(
            flip_params(&BackendCapabilities::default()),
            glam::Vec4::new(1.0, 0.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_graph_order() {
        let graph = build_deferred_graph(&RendererConfig::default());
        assert_eq!(
            graph.pass_names(),
            vec!["Depth Pass", "G-Buffer Pass", "Shadow Pass", "Light Culling Pass", "Lighting Pass", "Post Pass"]
        );

        let graph = build_deferred_graph(&RendererConfig {
            skip_lighting: true,
            ..Default::default()
        });
        assert!(!graph.pass_names().contains(&"Lighting Pass"));
    }
}
