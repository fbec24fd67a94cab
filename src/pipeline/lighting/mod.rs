//! Deferred lighting resolve
//!
//! Draws one full-screen triangle that reads the G-buffer, the shadow maps
//! and, when light culling ran, the per-tile light lists, then overlays the
//! selection outline. Output goes to the lighting target, composited later
//! by the post pass.
//!
//! Group 0 layout:
//!
//! | binding | resource                          |
//! |---------|-----------------------------------|
//! | 0-2     | G-buffer colour targets           |
//! | 3       | G-buffer depth                    |
//! | 4       | linear sampler                    |
//! | 5       | lights                            |
//! | 6       | camera                            |
//! | 7       | shadow matrices and parameters    |
//! | 8       | flip parameters                   |
//! | 9-11    | cascade maps                      |
//! | 12      | spot shadow maps (array)          |
//! | 13      | nearest sampler                   |
//! | 14      | gobo array                        |
//! | 15      | gobo sampler                      |
//! | 16      | tile parameters (tiled only)      |
//! | 17      | tile light indices (tiled only)   |

pub mod gobo;
pub mod outline;

pub use gobo::{GoboLayers, GoboSearch};
pub use outline::*;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use std::any::Any;

use crate::backend::*;
use crate::cache::{GBufferTargets, LightingTarget, RenderTarget, ShaderManager};
use crate::config::RendererConfig;
use crate::pipeline::{create_uniform, flip_params, fullscreen_pipeline_descriptor, load_stages, OwnedResources};
use crate::render_graph::{FrameContext, LightCullingData, RenderPass, ShadowData, CASCADE_COUNT};
use crate::scene::{LightsUniform, Scene, MAX_LIGHTS};

pub const FULLSCREEN_VS: &str = "fullscreen_vs";
pub const LIGHTING_FS: &str = "lighting_fs";
pub const LIGHTING_TILED_FS: &str = "lighting_tiled_fs";
pub const OUTLINE_VS: &str = "outline_vs";
pub const OUTLINE_FS: &str = "outline_fs";

/// Shadow block of the lighting resolve
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShadowUniform {
    pub light_view_proj: [Mat4; CASCADE_COUNT],
    pub splits: Vec4,
    pub dir_light_dir: Vec4,
    pub dir_light_color_intensity: Vec4,
    pub spot_light_view_proj: [Mat4; MAX_LIGHTS],
    pub spot_shadow_params: [Vec4; MAX_LIGHTS],
    /// depth scale, depth bias, reverse-Z, 1 when the G-buffer is float
    pub depth_params: Vec4,
    /// cascade count, spot shadow count
    pub counts: Vec4,
}

impl ShadowUniform {
    pub fn new(shadows: &ShadowData, float_gbuffer: bool) -> Self {
        let mut data = Self::zeroed();
        data.light_view_proj = shadows.light_view_proj;
        data.splits = Vec4::from_array(shadows.splits);
        data.dir_light_dir = shadows.dir_light_dir;
        data.dir_light_color_intensity = shadows.dir_light_color_intensity;
        for (dst, src) in data.spot_light_view_proj.iter_mut().zip(&shadows.spot_light_view_proj) {
            *dst = *src;
        }
        for (dst, src) in data.spot_shadow_params.iter_mut().zip(&shadows.spot_shadow_params) {
            *dst = *src;
        }
        data.depth_params = shadows.depth_params;
        data.depth_params.w = if float_gbuffer { 1.0 } else { 0.0 };
        data.counts = Vec4::new(shadows.cascade_count as f32, shadows.spot_shadow_count as f32, 0.0, 0.0);
        data
    }
}

/// Tile block read by the tiled resolve
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TileUniform {
    /// width, height, 1 / width, 1 / height
    pub screen: Vec4,
    /// tile count x, tile count y, tile size, enabled
    pub tile: Vec4,
}

impl TileUniform {
    pub fn new(size: (u32, u32), culling: &LightCullingData) -> Self {
        let (w, h) = (size.0.max(1) as f32, size.1.max(1) as f32);
        Self {
            screen: Vec4::new(w, h, 1.0 / w, 1.0 / h),
            tile: Vec4::new(
                culling.tile_count_x as f32,
                culling.tile_count_y as f32,
                culling.tile_size as f32,
                if culling.enabled { 1.0 } else { 0.0 },
            ),
        }
    }
}

/// Which fragment stage resolves the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightingMode {
    /// Every light evaluated for every pixel
    Lit,
    /// Lights read from the per-tile lists
    Tiled,
    /// Nothing drawn; Post shows the G-buffer base colour unlit
    Passthrough,
}

impl LightingMode {
    fn fragment_stage(&self) -> Option<&'static str> {
        match self {
            LightingMode::Lit => Some(LIGHTING_FS),
            LightingMode::Tiled => Some(LIGHTING_TILED_FS),
            LightingMode::Passthrough => None,
        }
    }

    fn select(lighting_enabled: bool, culling: &LightCullingData) -> Self {
        if !lighting_enabled {
            LightingMode::Passthrough
        } else if culling.enabled && culling.light_index_buffer.is_some() {
            LightingMode::Tiled
        } else {
            LightingMode::Lit
        }
    }
}

/// Buffers, samplers and textures that outlive pipeline rebuilds
#[derive(Debug, Clone, Copy)]
struct SharedResources {
    lights: BufferHandle,
    camera: BufferHandle,
    shadow: BufferHandle,
    flip: BufferHandle,
    tiles: BufferHandle,
    linear_sampler: SamplerHandle,
    nearest_sampler: SamplerHandle,
    gobo_texture: TextureHandle,
    gobo_view: TextureViewHandle,
    /// White stand-in for missing cascade maps
    fallback_cascade: RenderTarget,
    /// White single layer stand-in for missing spot maps
    fallback_spot: TextureViewHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PipelineKey {
    format: TextureFormat,
    mode: LightingMode,
}

#[derive(Debug, Clone, Copy)]
struct OutlinePipeline {
    pipeline: RenderPipelineHandle,
    layout: BindGroupLayoutHandle,
    uniform: BufferHandle,
    vertices: BufferHandle,
}

#[derive(Debug, Clone, Copy)]
struct PipelineSet {
    pipeline: RenderPipelineHandle,
    layout: BindGroupLayoutHandle,
    outline: Option<OutlinePipeline>,
}

/// Everything the resolve bind group references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BindingKey {
    layout: BindGroupLayoutHandle,
    gbuffer_generation: u64,
    cascades: [Option<TextureViewHandle>; CASCADE_COUNT],
    spot_maps: Option<TextureViewHandle>,
    index_buffer: Option<BufferHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutlineBindingKey {
    layout: BindGroupLayoutHandle,
    gbuffer_generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct LightingFrame {
    target: LightingTarget,
    gbuffer: GBufferTargets,
    mode: LightingMode,
}

#[derive(Debug)]
pub struct LightingPass {
    shared_owned: OwnedResources,
    shared: Option<SharedResources>,
    shared_failed: bool,
    gobos: GoboLayers,
    pipeline_owned: OwnedResources,
    pipelines: Option<PipelineSet>,
    key: Option<PipelineKey>,
    failed: Option<PipelineKey>,
    binding: Option<(BindingKey, BindGroupHandle)>,
    outline_binding: Option<(OutlineBindingKey, BindGroupHandle)>,
    frame: Option<LightingFrame>,
    mode: Option<LightingMode>,
    outline_vertex_count: u32,
}

impl LightingPass {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            shared_owned: OwnedResources::default(),
            shared: None,
            shared_failed: false,
            gobos: GoboLayers::new(config.gobo_size, GoboSearch::from_process()),
            pipeline_owned: OwnedResources::default(),
            pipelines: None,
            key: None,
            failed: None,
            binding: None,
            outline_binding: None,
            frame: None,
            mode: None,
            outline_vertex_count: 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.frame.is_some() && self.pipelines.is_some() && self.binding.is_some()
    }

    /// Mode chosen during the last `prepare`
    pub fn mode(&self) -> Option<LightingMode> {
        self.mode
    }

    /// Outline vertices drawn by the last `execute`
    pub fn outline_vertex_count(&self) -> u32 {
        self.outline_vertex_count
    }

    fn ensure_shared(&mut self, backend: &mut dyn GraphicsBackend) -> Option<SharedResources> {
        if self.shared.is_none() && !self.shared_failed {
            match self.create_shared(backend) {
                Ok(shared) => {
                    self.shared = Some(shared);
                    self.gobos.invalidate();
                }
                Err(e) => {
                    log::warn!("Lighting pass: failed to create shared resources: {}", e);
                    self.shared_owned.release(backend);
                    self.shared_failed = true;
                }
            }
        }
        self.shared
    }

    fn create_white_texture(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        label: &str,
        dimension: TextureViewDimension,
    ) -> BackendResult<RenderTarget> {
        let texture = self.shared_owned.texture(backend.create_texture(&TextureDescriptor {
            label: Some(label.to_string()),
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        })?);
        backend.write_texture(texture, 0, &[255; 4], 1, 1);
        let view = self.shared_owned.view(backend.create_texture_view(texture, dimension)?);
        Ok(RenderTarget { texture, view })
    }

    fn create_shared(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<SharedResources> {
        let owned = &mut self.shared_owned;
        let lights = create_uniform::<LightsUniform>(backend, owned, "lighting lights")?;
        let camera = create_uniform::<crate::scene::CameraUniformData>(backend, owned, "lighting camera")?;
        let shadow = create_uniform::<ShadowUniform>(backend, owned, "lighting shadows")?;
        let flip = create_uniform::<Vec4>(backend, owned, "lighting flip")?;
        let tiles = create_uniform::<TileUniform>(backend, owned, "lighting tiles")?;
        let linear_sampler = owned.sampler(backend.create_sampler(&SamplerDescriptor::linear_clamp("lighting linear"))?);
        let nearest_sampler =
            owned.sampler(backend.create_sampler(&SamplerDescriptor::nearest_clamp("lighting nearest"))?);

        let gobo_size = self.gobos.size();
        let gobo_texture = owned.texture(backend.create_texture(&TextureDescriptor {
            label: Some("gobo array".into()),
            width: gobo_size,
            height: gobo_size,
            array_layers: MAX_LIGHTS as u32,
            sample_count: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        })?);
        let gobo_view = owned.view(backend.create_texture_view(gobo_texture, TextureViewDimension::D2Array)?);

        let fallback_cascade = self.create_white_texture(backend, "fallback cascade", TextureViewDimension::D2)?;
        let fallback_spot = self
            .create_white_texture(backend, "fallback spot shadow", TextureViewDimension::D2Array)?
            .view;

        Ok(SharedResources {
            lights,
            camera,
            shadow,
            flip,
            tiles,
            linear_sampler,
            nearest_sampler,
            gobo_texture,
            gobo_view,
            fallback_cascade,
            fallback_spot,
        })
    }

    fn release_bindings(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some((_, group)) = self.binding.take() {
            backend.destroy_bind_group(group);
        }
        if let Some((_, group)) = self.outline_binding.take() {
            backend.destroy_bind_group(group);
        }
    }

    fn ensure_pipelines(&mut self, backend: &mut dyn GraphicsBackend, shaders: &ShaderManager, key: PipelineKey) {
        if self.pipelines.is_some() && self.key == Some(key) {
            return;
        }
        if self.failed == Some(key) {
            return;
        }

        self.release_bindings(backend);
        self.pipeline_owned.release(backend);
        self.pipelines = None;
        self.key = None;

        log::debug!("Lighting pass: building pipelines for {:?}", key);
        match self.create_pipelines(backend, shaders, key) {
            Ok(Some(pipelines)) => {
                self.pipelines = Some(pipelines);
                self.key = Some(key);
                self.failed = None;
            }
            Ok(None) => {
                log::warn!("Lighting pass: shader stages unavailable for {:?}", key.mode);
                self.pipeline_owned.release(backend);
                self.failed = Some(key);
            }
            Err(e) => {
                log::warn!("Lighting pass: failed to create pipeline: {}", e);
                self.pipeline_owned.release(backend);
                self.failed = Some(key);
            }
        }
    }

    fn layout_entries(mode: LightingMode) -> Vec<BindGroupLayoutEntry> {
        let fragment = ShaderStageFlags::FRAGMENT;
        let mut entries = vec![
            BindGroupLayoutEntry::new(0, fragment, BindingType::float_texture()),
            BindGroupLayoutEntry::new(1, fragment, BindingType::float_texture()),
            BindGroupLayoutEntry::new(2, fragment, BindingType::float_texture()),
            BindGroupLayoutEntry::new(3, fragment, BindingType::depth_texture()),
            BindGroupLayoutEntry::new(4, fragment, BindingType::filtering_sampler()),
            BindGroupLayoutEntry::new(5, fragment, BindingType::UniformBuffer),
            BindGroupLayoutEntry::new(6, fragment, BindingType::UniformBuffer),
            BindGroupLayoutEntry::new(7, fragment, BindingType::UniformBuffer),
            BindGroupLayoutEntry::new(8, ShaderStageFlags::VERTEX_FRAGMENT, BindingType::UniformBuffer),
            BindGroupLayoutEntry::new(9, fragment, BindingType::float_texture()),
            BindGroupLayoutEntry::new(10, fragment, BindingType::float_texture()),
            BindGroupLayoutEntry::new(11, fragment, BindingType::float_texture()),
            BindGroupLayoutEntry::new(
                12,
                fragment,
                BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    array: true,
                },
            ),
            BindGroupLayoutEntry::new(13, fragment, BindingType::non_filtering_sampler()),
            BindGroupLayoutEntry::new(14, fragment, BindingType::float_texture_array()),
            BindGroupLayoutEntry::new(15, fragment, BindingType::filtering_sampler()),
        ];
        if mode == LightingMode::Tiled {
            entries.push(BindGroupLayoutEntry::new(16, fragment, BindingType::UniformBuffer));
            entries.push(BindGroupLayoutEntry::new(
                17,
                fragment,
                BindingType::StorageBuffer { read_only: true },
            ));
        }
        entries
    }

    fn create_pipelines(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        shaders: &ShaderManager,
        key: PipelineKey,
    ) -> BackendResult<Option<PipelineSet>> {
        let Some(fragment_stage) = key.mode.fragment_stage() else {
            return Ok(None);
        };
        let Some((vs, fs)) = load_stages(shaders, FULLSCREEN_VS, fragment_stage) else {
            return Ok(None);
        };

        let layout = self
            .pipeline_owned
            .layout(backend.create_bind_group_layout("lighting", &Self::layout_entries(key.mode))?);
        let pipeline = self.pipeline_owned.render_pipeline(backend.create_render_pipeline(
            &fullscreen_pipeline_descriptor("lighting", vs, fs, vec![layout], ColorTargetState::opaque(key.format)),
        )?);

        let outline = match load_stages(shaders, OUTLINE_VS, OUTLINE_FS) {
            Some((vs, fs)) => Some(self.create_outline(backend, vs, fs, key.format)?),
            None => {
                log::warn!("Lighting pass: outline stages unavailable, selection outline disabled");
                None
            }
        };

        Ok(Some(PipelineSet {
            pipeline,
            layout,
            outline,
        }))
    }

    fn create_outline(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        vs: ShaderStage,
        fs: ShaderStage,
        format: TextureFormat,
    ) -> BackendResult<OutlinePipeline> {
        let owned = &mut self.pipeline_owned;
        let layout = owned.layout(backend.create_bind_group_layout(
            "selection outline",
            &[
                BindGroupLayoutEntry::new(0, ShaderStageFlags::VERTEX_FRAGMENT, BindingType::UniformBuffer),
                BindGroupLayoutEntry::new(1, ShaderStageFlags::FRAGMENT, BindingType::depth_texture()),
            ],
        )?);
        let uniform = create_uniform::<OutlineUniform>(backend, owned, "selection outline")?;
        let vertices = owned.buffer(backend.create_buffer(&BufferDescriptor {
            label: Some("selection outline vertices".into()),
            size: (MAX_OUTLINE_VERTICES * std::mem::size_of::<glam::Vec3>()) as u64,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
        })?);
        let pipeline = owned.render_pipeline(backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("selection outline".into()),
            vertex: vs,
            fragment: Some(fs),
            vertex_layouts: vec![outline_vertex_layout()],
            bind_group_layouts: vec![layout],
            primitive_topology: PrimitiveTopology::LineList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::None,
            depth_stencil: None,
            color_targets: vec![ColorTargetState {
                format,
                blend: Some(BlendState::alpha_blending()),
            }],
            sample_count: 1,
        })?);
        Ok(OutlinePipeline {
            pipeline,
            layout,
            uniform,
            vertices,
        })
    }

    fn ensure_binding(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        shared: &SharedResources,
        layout: BindGroupLayoutHandle,
        gbuffer: &GBufferTargets,
        ctx_shadows: &ShadowData,
        culling: &LightCullingData,
        mode: LightingMode,
    ) {
        let index_buffer = if mode == LightingMode::Tiled {
            culling.light_index_buffer
        } else {
            None
        };
        let key = BindingKey {
            layout,
            gbuffer_generation: gbuffer.generation,
            cascades: ctx_shadows.cascade_maps,
            spot_maps: ctx_shadows.spot_shadow_maps,
            index_buffer,
        };
        if self.binding.map(|(existing, _)| existing) == Some(key) {
            return;
        }
        if let Some((_, group)) = self.binding.take() {
            backend.destroy_bind_group(group);
        }

        let cascade = |i: usize| {
            BindGroupEntry::Texture(ctx_shadows.cascade_maps[i].unwrap_or(shared.fallback_cascade.view))
        };
        let mut entries = vec![
            (0, BindGroupEntry::Texture(gbuffer.color[0].view)),
            (1, BindGroupEntry::Texture(gbuffer.color[1].view)),
            (2, BindGroupEntry::Texture(gbuffer.color[2].view)),
            (3, BindGroupEntry::Texture(gbuffer.depth_sampled)),
            (4, BindGroupEntry::Sampler(shared.linear_sampler)),
            (5, BindGroupEntry::buffer(shared.lights)),
            (6, BindGroupEntry::buffer(shared.camera)),
            (7, BindGroupEntry::buffer(shared.shadow)),
            (8, BindGroupEntry::buffer(shared.flip)),
            (9, cascade(0)),
            (10, cascade(1)),
            (11, cascade(2)),
            (
                12,
                BindGroupEntry::Texture(ctx_shadows.spot_shadow_maps.unwrap_or(shared.fallback_spot)),
            ),
            (13, BindGroupEntry::Sampler(shared.nearest_sampler)),
            (14, BindGroupEntry::Texture(shared.gobo_view)),
            (15, BindGroupEntry::Sampler(shared.linear_sampler)),
        ];
        if let Some(index_buffer) = index_buffer {
            entries.push((16, BindGroupEntry::buffer(shared.tiles)));
            entries.push((17, BindGroupEntry::buffer(index_buffer)));
        }

        match backend.create_bind_group(layout, &entries) {
            Ok(group) => self.binding = Some((key, group)),
            Err(e) => log::warn!("Lighting pass: failed to create bind group: {}", e),
        }
    }

    fn ensure_outline_binding(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        outline: &OutlinePipeline,
        gbuffer: &GBufferTargets,
    ) {
        let key = OutlineBindingKey {
            layout: outline.layout,
            gbuffer_generation: gbuffer.generation,
        };
        if self.outline_binding.map(|(existing, _)| existing) == Some(key) {
            return;
        }
        if let Some((_, group)) = self.outline_binding.take() {
            backend.destroy_bind_group(group);
        }
        match backend.create_bind_group(
            outline.layout,
            &[
                (0, BindGroupEntry::buffer(outline.uniform)),
                (1, BindGroupEntry::Texture(gbuffer.depth_sampled)),
            ],
        ) {
            Ok(group) => self.outline_binding = Some((key, group)),
            Err(e) => log::warn!("Lighting pass: failed to create outline bind group: {}", e),
        }
    }

    fn upload_frame_data(
        backend: &mut dyn GraphicsBackend,
        shared: &SharedResources,
        scene: &Scene,
        frame: &LightingFrame,
        shadows: &ShadowData,
        culling: &LightCullingData,
    ) {
        let clip = backend.clip_space();
        let lights = LightsUniform::from_scene(scene);
        backend.write_buffer(shared.lights, 0, bytemuck::bytes_of(&lights));
        let camera = scene.camera.uniform_data(&clip, scene.time_seconds);
        backend.write_buffer(shared.camera, 0, bytemuck::bytes_of(&camera));
        let shadow = ShadowUniform::new(shadows, frame.gbuffer.color_format.is_float());
        backend.write_buffer(shared.shadow, 0, bytemuck::bytes_of(&shadow));
        let flip = flip_params(&backend.capabilities());
        backend.write_buffer(shared.flip, 0, bytemuck::bytes_of(&flip));
        let tiles = TileUniform::new((frame.target.width, frame.target.height), culling);
        backend.write_buffer(shared.tiles, 0, bytemuck::bytes_of(&tiles));
    }

    fn draw_outline(&mut self, backend: &mut dyn GraphicsBackend, scene: &Scene, frame: &LightingFrame, shadows: &ShadowData) {
        let (Some(outline), Some((_, group))) = (self.pipelines.and_then(|p| p.outline), self.outline_binding) else {
            return;
        };
        let vertices = selection_outline_vertices(scene.meshes());
        if vertices.is_empty() {
            return;
        }

        let clip = backend.clip_space();
        let (w, h) = (frame.target.width as f32, frame.target.height as f32);
        let mut depth_params = shadows.depth_params;
        depth_params.w = flip_params(&backend.capabilities()).x;
        let uniform = OutlineUniform {
            view_proj: scene.camera.clip_view_projection(&clip),
            depth_params,
            screen_params: Vec4::new(w, h, 1.0 / w, 1.0 / h),
        };
        backend.write_buffer(outline.uniform, 0, bytemuck::bytes_of(&uniform));
        backend.write_buffer(outline.vertices, 0, bytemuck::cast_slice(&vertices));

        backend.set_render_pipeline(outline.pipeline);
        backend.set_bind_group(0, group);
        backend.set_vertex_buffer(0, outline.vertices, 0);
        backend.draw(0..vertices.len() as u32, 0..1);
        self.outline_vertex_count = vertices.len() as u32;
    }
}

impl RenderPass for LightingPass {
    fn name(&self) -> &str {
        "Lighting Pass"
    }

    fn prepare(&mut self, ctx: &mut FrameContext) {
        self.frame = None;
        self.mode = None;
        let Some(size) = ctx.target_size() else {
            return;
        };
        let Some(backend) = ctx.backend.as_deref_mut() else {
            return;
        };

        let mode = LightingMode::select(ctx.lighting_enabled, &ctx.light_culling);
        self.mode = Some(mode);
        if mode == LightingMode::Passthrough {
            log::trace!("Lighting pass: passthrough, Post composites the G-buffer");
            return;
        }

        let Some(gbuffer) = ctx.targets.get_or_create_gbuffer(backend, size, 1) else {
            return;
        };
        let Some(target) = ctx.targets.get_or_create_lighting_target(backend, size, 1) else {
            log::debug!("Lighting pass: no lighting target");
            return;
        };
        let Some(shared) = self.ensure_shared(backend) else {
            return;
        };

        self.ensure_pipelines(
            backend,
            ctx.shaders,
            PipelineKey {
                format: target.format,
                mode,
            },
        );
        let Some(pipelines) = self.pipelines else {
            return;
        };

        self.ensure_binding(
            backend,
            &shared,
            pipelines.layout,
            &gbuffer,
            &ctx.shadows,
            &ctx.light_culling,
            mode,
        );
        if let Some(outline) = pipelines.outline {
            self.ensure_outline_binding(backend, &outline, &gbuffer);
        }

        self.frame = Some(LightingFrame { target, gbuffer, mode });
    }

    fn execute(&mut self, ctx: &mut FrameContext) {
        self.outline_vertex_count = 0;
        let (Some(frame), Some(pipelines), Some(shared), Some((_, group))) =
            (self.frame, self.pipelines, self.shared, self.binding)
        else {
            return;
        };
        let (Some(backend), Some(scene)) = (ctx.backend.as_deref_mut(), ctx.scene.as_deref()) else {
            return;
        };

        Self::upload_frame_data(backend, &shared, scene, &frame, &ctx.shadows, &ctx.light_culling);
        self.gobos.update(backend, shared.gobo_texture, scene.lights());

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Lighting Pass".into()),
            color_attachments: vec![ColorAttachment::clear(frame.target.target.view, [0.0, 0.0, 0.0, 1.0])],
            depth_stencil_attachment: None,
        });
        backend.set_viewport(0.0, 0.0, frame.target.width as f32, frame.target.height as f32, 0.0, 1.0);
        backend.set_render_pipeline(pipelines.pipeline);
        backend.set_bind_group(0, group);
        backend.draw(0..3, 0..1);

        self.draw_outline(backend, scene, &frame, &ctx.shadows);

        backend.end_render_pass();
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.release_bindings(backend);
        self.pipeline_owned.release(backend);
        self.shared_owned.release(backend);
        self.pipelines = None;
        self.shared = None;
        self.shared_failed = false;
        self.key = None;
        self.failed = None;
        self.frame = None;
        self.mode = None;
        self.gobos.invalidate();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RenderTargetCache;
    use crate::pipeline::test_util::{cube_scene, run_passes, stub_shaders};
    use crate::pipeline::{GBufferPass, LightCullingPass, ShadowPass};

    fn small_gobos() -> RendererConfig {
        RendererConfig {
            gobo_size: 8,
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_and_outline() {
        let mut backend = RecordingBackend::new().with_surface_size(64, 64);
        let shaders = stub_shaders();
        let mut targets = RenderTargetCache::new();
        let config = small_gobos();
        let mut scene = cube_scene();
        let mut gbuffer = GBufferPass::new();
        let mut shadow = ShadowPass::new(&config);
        let mut lighting = LightingPass::new(&config);

        run_passes(
            &mut backend,
            &mut scene,
            &shaders,
            &mut targets,
            &config,
            &mut [&mut gbuffer, &mut shadow, &mut lighting],
        );

        assert!(lighting.is_ready());
        assert_eq!(lighting.mode(), Some(LightingMode::Lit));
        assert_eq!(lighting.outline_vertex_count(), 24);
        assert_eq!(backend.draw_count_in_pass("Lighting Pass"), 2);
    }

    #[test]
    fn test_tiled_when_culling_ran() {
        let mut backend = RecordingBackend::new().with_surface_size(64, 64);
        let shaders = stub_shaders();
        let mut targets = RenderTargetCache::new();
        let config = small_gobos();
        let mut scene = cube_scene();
        let mut culling = LightCullingPass::new(config.tile_size);
        let mut lighting = LightingPass::new(&config);

        run_passes(
            &mut backend,
            &mut scene,
            &shaders,
            &mut targets,
            &config,
            &mut [&mut culling, &mut lighting],
        );
        assert_eq!(lighting.mode(), Some(LightingMode::Tiled));
        assert!(lighting.is_ready());
    }

    #[test]
    fn test_passthrough_when_lighting_disabled() {
        let mut backend = RecordingBackend::new().with_surface_size(64, 64);
        let shaders = stub_shaders();
        let mut targets = RenderTargetCache::new();
        let config = RendererConfig {
            debug_gbuffer_passthrough: true,
            ..small_gobos()
        };
        let mut scene = cube_scene();
        let mut lighting = LightingPass::new(&config);

        run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut lighting]);
        assert_eq!(lighting.mode(), Some(LightingMode::Passthrough));
        assert!(!lighting.is_ready());
        assert!(backend.render_pass_labels().iter().all(|label| label != "Lighting Pass"));
        assert!(targets.lighting_target().is_none());
    }

    #[test]
    fn test_missing_shadow_maps_use_fallbacks() {
        let mut backend = RecordingBackend::new().with_surface_size(32, 32);
        let shaders = stub_shaders();
        let mut targets = RenderTargetCache::new();
        let config = small_gobos();
        let mut scene = cube_scene();
        let mut lighting = LightingPass::new(&config);

        run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut lighting]);
        assert!(lighting.is_ready());
        assert_eq!(backend.draw_count_in_pass("Lighting Pass"), 2);
    }

    #[test]
    fn test_missing_stage_disables_pass() {
        let mut backend = RecordingBackend::new().with_surface_size(32, 32);
        let shaders = ShaderManager::new("missing-shader-dir");
        let mut targets = RenderTargetCache::new();
        let config = small_gobos();
        let mut scene = cube_scene();
        let mut lighting = LightingPass::new(&config);

        run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut lighting]);
        assert!(!lighting.is_ready());
        assert!(backend.render_pass_labels().iter().all(|label| label != "Lighting Pass"));
    }

    #[test]
    fn test_release_frees_everything() {
        let mut backend = RecordingBackend::new().with_surface_size(32, 32);
        let shaders = stub_shaders();
        let mut targets = RenderTargetCache::new();
        let config = small_gobos();
        let mut scene = cube_scene();
        let mut lighting = LightingPass::new(&config);

        run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut lighting]);
        lighting.release(&mut backend);
        targets.release_all(&mut backend);
        assert_eq!(backend.live_resource_count(), 0);
    }

    #[test]
    fn test_shadow_uniform_flags_float_gbuffer() {
        let shadows = ShadowData {
            cascade_count: 3,
            spot_shadow_count: 2,
            ..Default::default()
        };
        let float = ShadowUniform::new(&shadows, true);
        assert_eq!(float.depth_params.w, 1.0);
        assert_eq!(float.counts.x, 3.0);
        assert_eq!(float.counts.y, 2.0);
        assert_eq!(ShadowUniform::new(&shadows, false).depth_params.w, 0.0);
        assert_eq!(float.spot_shadow_params[0], ShadowData::NO_SPOT_SHADOW);
    }
}
