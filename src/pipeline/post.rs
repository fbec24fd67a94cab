//! Bloom, composite to the swapchain and the gizmo overlay
//!
//! The composite source is the lit image when lighting ran, otherwise the
//! G-buffer base colour. Bloom always downsamples the G-buffer emissive
//! target to half resolution, blurs it back at full resolution, and the
//! composite adds it on top.
//! Gizmos are drawn last, without depth, so they stay visible through
//! scene geometry.

use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use std::any::Any;

use crate::backend::*;
use crate::cache::{BloomTargets, ShaderManager};
use crate::pipeline::{create_uniform, draw_mesh, flip_params, fullscreen_pipeline_descriptor, load_stages, OwnedResources};
use crate::render_graph::{FrameContext, RenderPass};
use crate::scene::{Mesh, MeshBindingSlot, Scene, ViewUniformData};

pub const BLOOM_DOWNSAMPLE_FS: &str = "bloom_downsample_fs";
pub const BLOOM_BLUR_FS: &str = "bloom_blur_fs";
pub const COMPOSITE_FS: &str = "composite_fs";
pub const GIZMO_VS: &str = "gizmo_vs";
pub const GIZMO_FS: &str = "gizmo_fs";

/// Uniform block of the two bloom stages
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BloomUniform {
    /// 1 / source width, 1 / source height, radius, intensity
    pub params: Vec4,
    pub flip: Vec4,
}

/// Uniform block of the composite
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CompositeUniform {
    pub flip: Vec4,
    /// intensity, radius, 1 when the source is lit, 0
    pub bloom: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PipelineKey {
    output_format: TextureFormat,
    bloom_format: TextureFormat,
}

#[derive(Debug, Clone, Copy)]
struct GizmoPipeline {
    pipeline: RenderPipelineHandle,
    camera_buffer: BufferHandle,
    camera_group: BindGroupHandle,
    mesh_layout: BindGroupLayoutHandle,
}

#[derive(Debug, Clone, Copy)]
struct PostPipelines {
    downsample: RenderPipelineHandle,
    blur: RenderPipelineHandle,
    composite: RenderPipelineHandle,
    sample_layout: BindGroupLayoutHandle,
    composite_layout: BindGroupLayoutHandle,
    sampler: SamplerHandle,
    downsample_uniform: BufferHandle,
    blur_uniform: BufferHandle,
    composite_uniform: BufferHandle,
    gizmo: Option<GizmoPipeline>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BindingKey {
    source: TextureViewHandle,
    emissive: TextureViewHandle,
    bloom_generation: u64,
    sample_layout: BindGroupLayoutHandle,
}

#[derive(Debug, Clone, Copy)]
struct PostBindings {
    downsample: BindGroupHandle,
    blur: BindGroupHandle,
    composite: BindGroupHandle,
}

#[derive(Debug, Clone, Copy)]
struct PostFrame {
    output: SwapchainFrame,
    bloom: BloomTargets,
    emissive: TextureViewHandle,
    lit: bool,
}

#[derive(Debug, Default)]
pub struct PostPass {
    owned: OwnedResources,
    pipelines: Option<PostPipelines>,
    key: Option<PipelineKey>,
    failed: Option<PipelineKey>,
    binding_owned: OwnedResources,
    bindings: Option<(BindingKey, PostBindings)>,
    /// Target size and lighting flag the bloom chain was built for
    chain_state: Option<((u32, u32), bool)>,
    frame: Option<PostFrame>,
    gizmo_count: usize,
}

impl PostPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.frame.is_some() && self.pipelines.is_some() && self.bindings.is_some()
    }

    /// Gizmo meshes drawn by the last `execute`
    pub fn gizmo_count(&self) -> usize {
        self.gizmo_count
    }

    /// Whether the last `prepare` chose the lit image as composite source
    pub fn composites_lit_image(&self) -> Option<bool> {
        self.frame.map(|frame| frame.lit)
    }

    /// View the last `prepare` bound as the bloom downsample input
    pub fn bloom_source(&self) -> Option<TextureViewHandle> {
        self.frame.map(|frame| frame.emissive)
    }

    fn draws_gizmo(mesh: &Mesh) -> bool {
        mesh.visible && mesh.is_gizmo() && mesh.gpu.has_geometry()
    }

    fn release_pipelines(&mut self, backend: &mut dyn GraphicsBackend, scene: Option<&mut Scene>) {
        if let Some(scene) = scene {
            if self.pipelines.is_some() {
                for mesh in scene.meshes_mut() {
                    mesh.gpu.release_bindings(backend, MeshBindingSlot::Gizmo);
                }
            }
        }
        self.binding_owned.release(backend);
        self.bindings = None;
        self.owned.release(backend);
        self.pipelines = None;
        self.key = None;
    }

    fn ensure_pipelines(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        shaders: &ShaderManager,
        scene: Option<&mut Scene>,
        key: PipelineKey,
    ) {
        if self.pipelines.is_some() && self.key == Some(key) {
            return;
        }
        if self.failed == Some(key) {
            return;
        }

        self.release_pipelines(backend, scene);

        log::debug!("Post pass: building pipelines for {:?}", key);
        match self.create_pipelines(backend, shaders, key) {
            Ok(Some(pipelines)) => {
                self.pipelines = Some(pipelines);
                self.key = Some(key);
                self.failed = None;
            }
            Ok(None) => {
                log::warn!("Post pass: shader stages unavailable, pass disabled");
                self.owned.release(backend);
                self.failed = Some(key);
            }
            Err(e) => {
                log::warn!("Post pass: failed to create pipeline: {}", e);
                self.owned.release(backend);
                self.failed = Some(key);
            }
        }
    }

    fn create_pipelines(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        shaders: &ShaderManager,
        key: PipelineKey,
    ) -> BackendResult<Option<PostPipelines>> {
        let Some((vs, downsample_fs)) = load_stages(shaders, super::lighting::FULLSCREEN_VS, BLOOM_DOWNSAMPLE_FS) else {
            return Ok(None);
        };
        let Some((_, blur_fs)) = load_stages(shaders, super::lighting::FULLSCREEN_VS, BLOOM_BLUR_FS) else {
            return Ok(None);
        };
        let Some((_, composite_fs)) = load_stages(shaders, super::lighting::FULLSCREEN_VS, COMPOSITE_FS) else {
            return Ok(None);
        };

        let fragment = ShaderStageFlags::FRAGMENT;
        let sample_layout = self.owned.layout(backend.create_bind_group_layout(
            "post sample",
            &[
                BindGroupLayoutEntry::new(0, fragment, BindingType::float_texture()),
                BindGroupLayoutEntry::new(1, fragment, BindingType::filtering_sampler()),
                BindGroupLayoutEntry::new(2, ShaderStageFlags::VERTEX_FRAGMENT, BindingType::UniformBuffer),
            ],
        )?);
        let composite_layout = self.owned.layout(backend.create_bind_group_layout(
            "post composite",
            &[
                BindGroupLayoutEntry::new(0, fragment, BindingType::float_texture()),
                BindGroupLayoutEntry::new(1, fragment, BindingType::float_texture()),
                BindGroupLayoutEntry::new(2, fragment, BindingType::filtering_sampler()),
                BindGroupLayoutEntry::new(3, ShaderStageFlags::VERTEX_FRAGMENT, BindingType::UniformBuffer),
            ],
        )?);
        let sampler = self
            .owned
            .sampler(backend.create_sampler(&SamplerDescriptor::linear_clamp("post linear"))?);
        let downsample_uniform = create_uniform::<BloomUniform>(backend, &mut self.owned, "bloom downsample")?;
        let blur_uniform = create_uniform::<BloomUniform>(backend, &mut self.owned, "bloom blur")?;
        let composite_uniform = create_uniform::<CompositeUniform>(backend, &mut self.owned, "composite")?;

        let downsample = self.owned.render_pipeline(backend.create_render_pipeline(
            &fullscreen_pipeline_descriptor(
                "bloom downsample",
                vs.clone(),
                downsample_fs,
                vec![sample_layout],
                ColorTargetState::opaque(key.bloom_format),
            ),
        )?);
        let blur = self.owned.render_pipeline(backend.create_render_pipeline(&fullscreen_pipeline_descriptor(
            "bloom blur",
            vs.clone(),
            blur_fs,
            vec![sample_layout],
            ColorTargetState::opaque(key.bloom_format),
        ))?);
        let composite = self.owned.render_pipeline(backend.create_render_pipeline(
            &fullscreen_pipeline_descriptor(
                "composite",
                vs,
                composite_fs,
                vec![composite_layout],
                ColorTargetState::opaque(key.output_format),
            ),
        )?);

        let gizmo = match load_stages(shaders, GIZMO_VS, GIZMO_FS) {
            Some((vs, fs)) => Some(self.create_gizmo(backend, vs, fs, key.output_format)?),
            None => {
                log::warn!("Post pass: gizmo stages unavailable, gizmos hidden");
                None
            }
        };

        Ok(Some(PostPipelines {
            downsample,
            blur,
            composite,
            sample_layout,
            composite_layout,
            sampler,
            downsample_uniform,
            blur_uniform,
            composite_uniform,
            gizmo,
        }))
    }

    fn create_gizmo(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        vs: ShaderStage,
        fs: ShaderStage,
        format: TextureFormat,
    ) -> BackendResult<GizmoPipeline> {
        let uniform_entry = [BindGroupLayoutEntry::new(
            0,
            ShaderStageFlags::VERTEX_FRAGMENT,
            BindingType::UniformBuffer,
        )];
        let camera_layout = self
            .owned
            .layout(backend.create_bind_group_layout("gizmo camera", &uniform_entry)?);
        let mesh_layout = self
            .owned
            .layout(backend.create_bind_group_layout("gizmo mesh", &uniform_entry)?);
        let camera_buffer = create_uniform::<ViewUniformData>(backend, &mut self.owned, "gizmo camera")?;
        let camera_group = self.owned.bind_group(
            backend.create_bind_group(camera_layout, &[(0, BindGroupEntry::buffer(camera_buffer))])?,
        );
        let pipeline = self.owned.render_pipeline(backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("gizmo".into()),
            vertex: vs,
            fragment: Some(fs),
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: vec![camera_layout, mesh_layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::None,
            depth_stencil: None,
            color_targets: vec![ColorTargetState {
                format,
                blend: Some(BlendState::alpha_blending()),
            }],
            sample_count: 1,
        })?);
        Ok(GizmoPipeline {
            pipeline,
            camera_buffer,
            camera_group,
            mesh_layout,
        })
    }

    fn ensure_bindings(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        pipelines: &PostPipelines,
        source: TextureViewHandle,
        emissive: TextureViewHandle,
        bloom: &BloomTargets,
    ) {
        let key = BindingKey {
            source,
            emissive,
            bloom_generation: bloom.generation,
            sample_layout: pipelines.sample_layout,
        };
        if self.bindings.map(|(existing, _)| existing) == Some(key) {
            return;
        }
        self.binding_owned.release(backend);
        self.bindings = None;

        match self.create_bindings(backend, pipelines, source, emissive, bloom) {
            Ok(bindings) => self.bindings = Some((key, bindings)),
            Err(e) => {
                log::warn!("Post pass: failed to create bind groups: {}", e);
                self.binding_owned.release(backend);
            }
        }
    }

    fn create_bindings(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        pipelines: &PostPipelines,
        source: TextureViewHandle,
        emissive: TextureViewHandle,
        bloom: &BloomTargets,
    ) -> BackendResult<PostBindings> {
        let owned = &mut self.binding_owned;
        let downsample = owned.bind_group(backend.create_bind_group(
            pipelines.sample_layout,
            &[
                (0, BindGroupEntry::Texture(emissive)),
                (1, BindGroupEntry::Sampler(pipelines.sampler)),
                (2, BindGroupEntry::buffer(pipelines.downsample_uniform)),
            ],
        )?);
        let blur = owned.bind_group(backend.create_bind_group(
            pipelines.sample_layout,
            &[
                (0, BindGroupEntry::Texture(bloom.downsample.view)),
                (1, BindGroupEntry::Sampler(pipelines.sampler)),
                (2, BindGroupEntry::buffer(pipelines.blur_uniform)),
            ],
        )?);
        let composite = owned.bind_group(backend.create_bind_group(
            pipelines.composite_layout,
            &[
                (0, BindGroupEntry::Texture(source)),
                (1, BindGroupEntry::Texture(bloom.blur.view)),
                (2, BindGroupEntry::Sampler(pipelines.sampler)),
                (3, BindGroupEntry::buffer(pipelines.composite_uniform)),
            ],
        )?);
        Ok(PostBindings {
            downsample,
            blur,
            composite,
        })
    }

    fn upload_uniforms(backend: &mut dyn GraphicsBackend, pipelines: &PostPipelines, frame: &PostFrame, scene: &Scene) {
        let flip = flip_params(&backend.capabilities());
        let (full_w, full_h) = (frame.bloom.size.0.max(1) as f32, frame.bloom.size.1.max(1) as f32);
        let (half_w, half_h) = (
            frame.bloom.half_size.0.max(1) as f32,
            frame.bloom.half_size.1.max(1) as f32,
        );

        let downsample = BloomUniform {
            params: Vec4::new(1.0 / full_w, 1.0 / full_h, scene.bloom_radius, scene.bloom_intensity),
            flip,
        };
        backend.write_buffer(pipelines.downsample_uniform, 0, bytemuck::bytes_of(&downsample));
        let blur = BloomUniform {
            params: Vec4::new(1.0 / half_w, 1.0 / half_h, scene.bloom_radius, scene.bloom_intensity),
            flip,
        };
        backend.write_buffer(pipelines.blur_uniform, 0, bytemuck::bytes_of(&blur));
        let composite = CompositeUniform {
            flip,
            bloom: Vec4::new(
                scene.bloom_intensity,
                scene.bloom_radius,
                if frame.lit { 1.0 } else { 0.0 },
                0.0,
            ),
        };
        backend.write_buffer(pipelines.composite_uniform, 0, bytemuck::bytes_of(&composite));
    }

    fn fullscreen(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        target: TextureViewHandle,
        size: (u32, u32),
        pipeline: RenderPipelineHandle,
        group: BindGroupHandle,
    ) {
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(label.into()),
            color_attachments: vec![ColorAttachment::clear(target, [0.0, 0.0, 0.0, 1.0])],
            depth_stencil_attachment: None,
        });
        backend.set_viewport(0.0, 0.0, size.0 as f32, size.1 as f32, 0.0, 1.0);
        backend.set_render_pipeline(pipeline);
        backend.set_bind_group(0, group);
        backend.draw(0..3, 0..1);
    }

    fn draw_gizmos(&mut self, backend: &mut dyn GraphicsBackend, gizmo: &GizmoPipeline, scene: &mut Scene) {
        let clip = backend.clip_space();
        let camera = ViewUniformData::new(&scene.camera, &clip);
        backend.write_buffer(gizmo.camera_buffer, 0, bytemuck::bytes_of(&camera));

        let mut bound = false;
        for mesh in scene.meshes_mut() {
            if !Self::draws_gizmo(mesh) {
                continue;
            }
            let Some(group) = mesh.gpu.bind_group(backend, MeshBindingSlot::Gizmo, gizmo.mesh_layout) else {
                continue;
            };
            if !bound {
                backend.set_render_pipeline(gizmo.pipeline);
                backend.set_bind_group(0, gizmo.camera_group);
                bound = true;
            }
            draw_mesh(backend, &mesh.gpu, 1, group);
            self.gizmo_count += 1;
        }
    }
}

impl RenderPass for PostPass {
    fn name(&self) -> &str {
        "Post Pass"
    }

    fn prepare(&mut self, ctx: &mut FrameContext) {
        self.frame = None;
        let Some(size) = ctx.target_size() else {
            return;
        };
        let Some(backend) = ctx.backend.as_deref_mut() else {
            return;
        };
        let Some(output) = backend.current_frame() else {
            return;
        };

        let Some((base, emissive)) = ctx.targets.gbuffer().map(|g| (g.color[0].view, g.color[2].view)) else {
            log::debug!("Post pass: nothing to composite");
            return;
        };
        let lit_source = if ctx.lighting_enabled {
            ctx.targets.lighting_target().map(|lighting| lighting.target.view)
        } else {
            None
        };
        let (source, lit) = match lit_source {
            Some(view) => (view, true),
            None => (base, false),
        };

        let state = (size, ctx.lighting_enabled);
        if self.chain_state.is_some_and(|previous| previous != state) {
            self.binding_owned.release(backend);
            self.bindings = None;
            ctx.targets.release_bloom(backend);
        }
        self.chain_state = Some(state);

        let Some(bloom) = ctx.targets.get_or_create_bloom_targets(backend, size) else {
            log::debug!("Post pass: no bloom targets");
            return;
        };

        self.ensure_pipelines(
            backend,
            ctx.shaders,
            ctx.scene.as_deref_mut(),
            PipelineKey {
                output_format: output.format,
                bloom_format: bloom.format,
            },
        );
        let Some(pipelines) = self.pipelines else {
            return;
        };
        self.ensure_bindings(backend, &pipelines, source, emissive, &bloom);

        if let (Some(gizmo), Some(scene)) = (pipelines.gizmo, ctx.scene.as_deref_mut()) {
            for mesh in scene.meshes_mut() {
                if Self::draws_gizmo(mesh) {
                    mesh.gpu.bind_group(backend, MeshBindingSlot::Gizmo, gizmo.mesh_layout);
                }
            }
        }

        self.frame = Some(PostFrame {
            output,
            bloom,
            emissive,
            lit,
        });
    }

    fn execute(&mut self, ctx: &mut FrameContext) {
        self.gizmo_count = 0;
        let (Some(frame), Some(pipelines), Some((_, bindings))) = (self.frame, self.pipelines, self.bindings) else {
            return;
        };
        let (Some(backend), Some(scene)) = (ctx.backend.as_deref_mut(), ctx.scene.as_deref_mut()) else {
            return;
        };

        Self::upload_uniforms(backend, &pipelines, &frame, scene);

        Self::fullscreen(
            backend,
            "Bloom Downsample",
            frame.bloom.downsample.view,
            frame.bloom.half_size,
            pipelines.downsample,
            bindings.downsample,
        );
        backend.end_render_pass();
        Self::fullscreen(
            backend,
            "Bloom Blur",
            frame.bloom.blur.view,
            frame.bloom.size,
            pipelines.blur,
            bindings.blur,
        );
        backend.end_render_pass();

        Self::fullscreen(
            backend,
            "Post Pass",
            frame.output.view,
            (frame.output.width, frame.output.height),
            pipelines.composite,
            bindings.composite,
        );
        if let Some(gizmo) = pipelines.gizmo {
            self.draw_gizmos(backend, &gizmo, scene);
        }
        backend.end_render_pass();
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.binding_owned.release(backend);
        self.bindings = None;
        self.owned.release(backend);
        self.pipelines = None;
        self.key = None;
        self.failed = None;
        self.chain_state = None;
        self.frame = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
