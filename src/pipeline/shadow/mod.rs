//! Shadow pass
//!
//! Renders three directional cascades for the first shadow casting sun and
//! one perspective map per shadowed spot light. Maps store a colour encoding
//! of depth: cascades clear to white and accumulate with a min blend, spot
//! maps store linear distance normalised by the light's far plane.
//!
//! Shadow maps are sized by configuration, never by the swapchain, so they
//! survive resizes. They are created even when shadows are switched off so
//! the lighting bindings stay stable.

pub mod cascade;

pub use cascade::*;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use std::any::Any;

use crate::backend::*;
use crate::cache::{RenderTarget, ShaderManager};
use crate::config::RendererConfig;
use crate::pipeline::{create_uniform, draw_mesh, load_stages, sync_meshes, OwnedResources};
use crate::render_graph::{FrameContext, RenderPass, ShadowData, CASCADE_COUNT};
use crate::scene::{Mesh, MeshBindingSlot, Scene};

pub const SHADOW_VS: &str = "shadow_vs";
pub const SHADOW_FS: &str = "shadow_fs";
pub const SHADOW_SPOT_FS: &str = "shadow_spot_fs";

/// Per-light block bound at group 0 while rendering one shadow map
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShadowPassUniform {
    pub light_view_proj: Mat4,
    pub depth_params: Vec4,
    /// xyz = light position (spots), w = near plane
    pub light_pos_near: Vec4,
    /// x = far plane, y = 1 for spot lights
    pub light_params: Vec4,
}

fn shadow_usage() -> TextureUsage {
    TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING
}

/// RGBA16F for cascades when renderable, RGBA8 otherwise
pub fn choose_cascade_format(backend: &dyn GraphicsBackend) -> TextureFormat {
    if backend.is_texture_format_supported(TextureFormat::Rgba16Float, shadow_usage()) {
        TextureFormat::Rgba16Float
    } else {
        log::warn!("Shadow pass: RGBA16F not supported, cascades fall back to RGBA8");
        TextureFormat::Rgba8Unorm
    }
}

/// R32F, then R16F, then the cascade format
pub fn choose_spot_format(backend: &dyn GraphicsBackend, cascade_format: TextureFormat) -> TextureFormat {
    [TextureFormat::R32Float, TextureFormat::R16Float]
        .into_iter()
        .find(|&format| backend.is_texture_format_supported(format, shadow_usage()))
        .unwrap_or_else(|| {
            log::warn!("Shadow pass: no single channel float format, spot maps use {:?}", cascade_format);
            cascade_format
        })
}

fn shadow_depth_format(backend: &dyn GraphicsBackend) -> TextureFormat {
    if backend.is_texture_format_supported(TextureFormat::Depth32Float, shadow_usage()) {
        TextureFormat::Depth32Float
    } else {
        TextureFormat::Depth24PlusStencil8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ShadowKey {
    reverse_z: bool,
    cascade_size: u32,
    spot_size: u32,
    spot_slots: usize,
}

/// Light uniform and its group 0 bind group
#[derive(Debug, Clone, Copy)]
struct LightBinding {
    buffer: BufferHandle,
    group: BindGroupHandle,
}

#[derive(Debug)]
struct ShadowResources {
    cascade_format: TextureFormat,
    cascades: [RenderTarget; CASCADE_COUNT],
    cascade_depth: RenderTarget,
    cascade_lights: [LightBinding; CASCADE_COUNT],
    /// Render view of each spot slot layer
    spot_layers: Vec<TextureViewHandle>,
    spot_array: Option<TextureViewHandle>,
    spot_depth: Option<RenderTarget>,
    spot_lights: Vec<LightBinding>,
    mesh_layout: BindGroupLayoutHandle,
    cascade_pipeline: RenderPipelineHandle,
    spot_pipeline: Option<RenderPipelineHandle>,
}

/// What `execute` renders this frame
#[derive(Debug, Default)]
struct ShadowPlan {
    cascades: usize,
    spot_slots: usize,
}

#[derive(Debug)]
pub struct ShadowPass {
    cascade_size: u32,
    spot_size: u32,
    spot_slots: usize,
    owned: OwnedResources,
    resources: Option<ShadowResources>,
    key: Option<ShadowKey>,
    failed: Option<ShadowKey>,
    plan: ShadowPlan,
}

impl ShadowPass {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            cascade_size: config.shadow_map_size.max(1),
            spot_size: config.spot_shadow_map_size.max(1),
            spot_slots: config.spot_shadow_slots(),
            owned: OwnedResources::default(),
            resources: None,
            key: None,
            failed: None,
            plan: ShadowPlan::default(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.resources.is_some()
    }

    /// Views of the cascade maps, stable until the pass is rebuilt
    pub fn cascade_views(&self) -> Option<[TextureViewHandle; CASCADE_COUNT]> {
        let resources = self.resources.as_ref()?;
        Some(resources.cascades.map(|target| target.view))
    }

    pub fn spot_shadow_view(&self) -> Option<TextureViewHandle> {
        self.resources.as_ref()?.spot_array
    }

    fn ensure_resources(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        shaders: &ShaderManager,
        scene: &mut Scene,
        key: ShadowKey,
    ) {
        if self.resources.is_some() && self.key == Some(key) {
            return;
        }
        if self.failed == Some(key) {
            return;
        }

        self.release_resources(backend, scene);
        log::debug!("Shadow pass: building resources for {:?}", key);
        match self.create_resources(backend, shaders, key) {
            Ok(Some(resources)) => {
                self.resources = Some(resources);
                self.key = Some(key);
                self.failed = None;
            }
            Ok(None) => {
                log::warn!("Shadow pass: shader stages unavailable, shadows disabled");
                self.owned.release(backend);
                self.failed = Some(key);
            }
            Err(e) => {
                log::warn!("Shadow pass: failed to create resources: {}", e);
                self.owned.release(backend);
                self.failed = Some(key);
            }
        }
    }

    fn create_target(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        label: &str,
        size: u32,
        format: TextureFormat,
    ) -> BackendResult<RenderTarget> {
        let texture = self.owned.texture(backend.create_texture(&TextureDescriptor {
            label: Some(label.to_string()),
            width: size,
            height: size,
            array_layers: 1,
            sample_count: 1,
            format,
            usage: shadow_usage(),
        })?);
        let view = self
            .owned
            .view(backend.create_texture_view(texture, TextureViewDimension::D2)?);
        Ok(RenderTarget { texture, view })
    }

    fn create_light_binding(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        layout: BindGroupLayoutHandle,
        label: &str,
    ) -> BackendResult<LightBinding> {
        let buffer = create_uniform::<ShadowPassUniform>(backend, &mut self.owned, label)?;
        let group = self
            .owned
            .bind_group(backend.create_bind_group(layout, &[(0, BindGroupEntry::buffer(buffer))])?);
        Ok(LightBinding { buffer, group })
    }

    fn create_resources(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        shaders: &ShaderManager,
        key: ShadowKey,
    ) -> BackendResult<Option<ShadowResources>> {
        let Some((vs, cascade_fs)) = load_stages(shaders, SHADOW_VS, SHADOW_FS) else {
            return Ok(None);
        };

        let cascade_format = choose_cascade_format(backend);
        let depth_format = shadow_depth_format(backend);

        let mut cascades = Vec::with_capacity(CASCADE_COUNT);
        for i in 0..CASCADE_COUNT {
            cascades.push(self.create_target(
                backend,
                &format!("shadow cascade {}", i),
                key.cascade_size,
                cascade_format,
            )?);
        }
        let cascades: [RenderTarget; CASCADE_COUNT] = [cascades[0], cascades[1], cascades[2]];
        let cascade_depth = self.create_target(backend, "shadow cascade depth", key.cascade_size, depth_format)?;

        let light_layout = self.owned.layout(backend.create_bind_group_layout(
            "shadow light",
            &[BindGroupLayoutEntry::new(
                0,
                ShaderStageFlags::VERTEX_FRAGMENT,
                BindingType::UniformBuffer,
            )],
        )?);
        let mesh_layout = self.owned.layout(backend.create_bind_group_layout(
            "shadow mesh",
            &[BindGroupLayoutEntry::new(
                0,
                ShaderStageFlags::VERTEX_FRAGMENT,
                BindingType::UniformBuffer,
            )],
        )?);

        let mut cascade_lights = Vec::with_capacity(CASCADE_COUNT);
        for i in 0..CASCADE_COUNT {
            cascade_lights.push(self.create_light_binding(
                backend,
                light_layout,
                &format!("shadow cascade {} light", i),
            )?);
        }
        let cascade_lights = [cascade_lights[0], cascade_lights[1], cascade_lights[2]];

        let depth_compare = if key.reverse_z {
            CompareFunction::GreaterEqual
        } else {
            CompareFunction::LessEqual
        };
        let descriptor = |label: &str, fs: ShaderStage, target: ColorTargetState| RenderPipelineDescriptor {
            label: Some(label.to_string()),
            vertex: vs.clone(),
            fragment: Some(fs),
            vertex_layouts: vec![Vertex::position_only_layout()],
            bind_group_layouts: vec![light_layout, mesh_layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::None,
            depth_stencil: Some(DepthStencilState {
                format: depth_format,
                depth_write_enabled: true,
                depth_compare,
            }),
            color_targets: vec![target],
            sample_count: 1,
        };

        let cascade_pipeline = self.owned.render_pipeline(backend.create_render_pipeline(&descriptor(
            "shadow cascade",
            cascade_fs,
            ColorTargetState {
                format: cascade_format,
                blend: Some(BlendState::min()),
            },
        ))?);

        let mut spot_layers = Vec::new();
        let mut spot_array = None;
        let mut spot_depth = None;
        let mut spot_lights = Vec::new();
        let mut spot_pipeline = None;

        let spot_fs = shaders.load_stage(ShaderStageKind::Fragment, SHADOW_SPOT_FS);
        if key.spot_slots == 0 {
            log::debug!("Shadow pass: spot shadows disabled by configuration");
        } else if !spot_fs.is_valid() {
            log::warn!("Shadow pass: spot shadow stage unavailable, spot shadows disabled");
        } else {
            let spot_format = choose_spot_format(backend, cascade_format);
            let texture = self.owned.texture(backend.create_texture(&TextureDescriptor {
                label: Some("spot shadow maps".into()),
                width: key.spot_size,
                height: key.spot_size,
                array_layers: key.spot_slots as u32,
                sample_count: 1,
                format: spot_format,
                usage: shadow_usage(),
            })?);
            for slot in 0..key.spot_slots {
                spot_layers.push(
                    self.owned
                        .view(backend.create_texture_view(texture, TextureViewDimension::Layer(slot as u32))?),
                );
                spot_lights.push(self.create_light_binding(
                    backend,
                    light_layout,
                    &format!("spot shadow {} light", slot),
                )?);
            }
            spot_array = Some(
                self.owned
                    .view(backend.create_texture_view(texture, TextureViewDimension::D2Array)?),
            );
            spot_depth = Some(self.create_target(backend, "spot shadow depth", key.spot_size, depth_format)?);
            spot_pipeline = Some(self.owned.render_pipeline(backend.create_render_pipeline(&descriptor(
                "shadow spot",
                spot_fs,
                ColorTargetState::opaque(spot_format),
            ))?));
        }

        Ok(Some(ShadowResources {
            cascade_format,
            cascades,
            cascade_depth,
            cascade_lights,
            spot_layers,
            spot_array,
            spot_depth,
            spot_lights,
            mesh_layout,
            cascade_pipeline,
            spot_pipeline,
        }))
    }

    fn release_resources(&mut self, backend: &mut dyn GraphicsBackend, scene: &mut Scene) {
        if self.resources.take().is_some() {
            for mesh in scene.meshes_mut() {
                mesh.gpu.release_bindings(backend, MeshBindingSlot::Shadow);
            }
        }
        self.owned.release(backend);
        self.key = None;
        self.plan = ShadowPlan::default();
    }

    /// Fill `shadows` and upload the light blocks for everything rendered
    /// this frame
    fn plan_frame(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        scene: &Scene,
        shadows: &mut ShadowData,
    ) {
        self.plan = ShadowPlan::default();
        let Some(resources) = &self.resources else {
            return;
        };
        if !scene.shadows_enabled {
            return;
        }

        let depth_params = shadows.depth_params;

        if let Some((_, sun)) = scene.shadow_casting_sun() {
            let camera = &scene.camera;
            let splits = cascade_splits(camera.near(), camera.far());
            let direction = sun.direction();
            let correction = backend.clip_space_correction();

            let mut matrices = [Mat4::IDENTITY; CASCADE_COUNT];
            let mut complete = true;
            for (i, matrix) in matrices.iter_mut().enumerate() {
                match cascade_view_proj(camera, direction, splits[i], splits[i + 1]) {
                    Some(view_proj) => *matrix = correction * view_proj,
                    None => complete = false,
                }
            }

            if complete {
                for (matrix, binding) in matrices.iter().zip(&resources.cascade_lights) {
                    let uniform = ShadowPassUniform {
                        light_view_proj: *matrix,
                        depth_params,
                        light_pos_near: Vec4::ZERO,
                        light_params: Vec4::ZERO,
                    };
                    backend.write_buffer(binding.buffer, 0, bytemuck::bytes_of(&uniform));
                }
                shadows.cascade_count = CASCADE_COUNT;
                shadows.light_view_proj = matrices;
                shadows.splits = splits;
                shadows.dir_light_dir = direction.normalize_or_zero().extend(1.0);
                shadows.dir_light_color_intensity = sun.color.extend(sun.intensity);
                self.plan.cascades = CASCADE_COUNT;
            } else {
                log::debug!("Shadow pass: degenerate sun direction, cascades skipped");
            }
        }

        if resources.spot_pipeline.is_none() {
            return;
        }
        let correction = backend.clip_space_correction();
        let candidates = rank_spot_candidates(scene.lights(), scene.camera.position());
        let mut slot = 0;
        for candidate in candidates {
            if slot >= resources.spot_lights.len() {
                break;
            }
            let Some(spot) = scene.lights()[candidate.light_index].as_spot() else {
                continue;
            };
            let far = spot_far(spot.range);
            let Some(view_proj) = spot_view_proj(spot, SPOT_NEAR, far) else {
                continue;
            };
            let light_view_proj = correction * view_proj;
            let uniform = ShadowPassUniform {
                light_view_proj,
                depth_params,
                light_pos_near: spot.position.extend(SPOT_NEAR),
                light_params: Vec4::new(far, 1.0, 0.0, 0.0),
            };
            backend.write_buffer(resources.spot_lights[slot].buffer, 0, bytemuck::bytes_of(&uniform));

            shadows.spot_light_view_proj[candidate.light_index] = light_view_proj;
            shadows.spot_shadow_params[candidate.light_index] = Vec4::new(slot as f32, 1.0, SPOT_NEAR, far);
            slot += 1;
        }
        shadows.spot_shadow_count = slot;
        self.plan.spot_slots = slot;
    }

    fn draw_casters(backend: &mut dyn GraphicsBackend, scene: &mut Scene, mesh_layout: BindGroupLayoutHandle) {
        for mesh in scene.meshes_mut() {
            if !Self::casts(mesh) {
                continue;
            }
            if let Some(group) = mesh.gpu.bind_group(backend, MeshBindingSlot::Shadow, mesh_layout) {
                draw_mesh(backend, &mesh.gpu, 1, group);
            }
        }
    }

    fn casts(mesh: &Mesh) -> bool {
        mesh.casts_shadow() && mesh.gpu.has_geometry()
    }
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &str {
        "Shadow Pass"
    }

    fn prepare(&mut self, ctx: &mut FrameContext) {
        ctx.shadows.reset();
        self.plan = ShadowPlan::default();
        let (Some(backend), Some(scene)) = (ctx.backend.as_deref_mut(), ctx.scene.as_deref_mut()) else {
            return;
        };

        let clip = backend.clip_space();
        ctx.shadows.depth_params = clip.depth_params();

        let key = ShadowKey {
            reverse_z: clip.reverse_z(),
            cascade_size: self.cascade_size,
            spot_size: self.spot_size,
            spot_slots: self.spot_slots,
        };
        self.ensure_resources(backend, ctx.shaders, scene, key);

        let Some(resources) = &self.resources else {
            return;
        };
        ctx.shadows.cascade_maps = resources.cascades.map(|target| Some(target.view));
        ctx.shadows.cascade_format = Some(resources.cascade_format);
        ctx.shadows.spot_shadow_maps = resources.spot_array;
        let mesh_layout = resources.mesh_layout;

        sync_meshes(backend, scene);
        for mesh in scene.meshes_mut() {
            if Self::casts(mesh) {
                mesh.gpu.bind_group(backend, MeshBindingSlot::Shadow, mesh_layout);
            }
        }

        self.plan_frame(backend, scene, &mut ctx.shadows);
    }

    fn execute(&mut self, ctx: &mut FrameContext) {
        let Some(resources) = &self.resources else {
            return;
        };
        let (Some(backend), Some(scene)) = (ctx.backend.as_deref_mut(), ctx.scene.as_deref_mut()) else {
            return;
        };
        let far_depth = backend.clip_space().far_depth();

        for i in 0..self.plan.cascades {
            backend.begin_render_pass(&RenderPassDescriptor {
                label: Some(format!("Shadow Cascade {}", i)),
                color_attachments: vec![ColorAttachment::clear(resources.cascades[i].view, [1.0; 4])],
                depth_stencil_attachment: Some(DepthStencilAttachment::clear(
                    resources.cascade_depth.view,
                    far_depth,
                )),
            });
            backend.set_viewport(0.0, 0.0, self.cascade_size as f32, self.cascade_size as f32, 0.0, 1.0);
            backend.set_render_pipeline(resources.cascade_pipeline);
            backend.set_bind_group(0, resources.cascade_lights[i].group);
            Self::draw_casters(backend, scene, resources.mesh_layout);
            backend.end_render_pass();
        }

        let (Some(pipeline), Some(depth)) = (resources.spot_pipeline, resources.spot_depth) else {
            return;
        };
        for slot in 0..self.plan.spot_slots {
            backend.begin_render_pass(&RenderPassDescriptor {
                label: Some(format!("Shadow Spot {}", slot)),
                color_attachments: vec![ColorAttachment::clear(resources.spot_layers[slot], [1.0; 4])],
                depth_stencil_attachment: Some(DepthStencilAttachment::clear(depth.view, far_depth)),
            });
            backend.set_viewport(0.0, 0.0, self.spot_size as f32, self.spot_size as f32, 0.0, 1.0);
            backend.set_render_pipeline(pipeline);
            backend.set_bind_group(0, resources.spot_lights[slot].group);
            Self::draw_casters(backend, scene, resources.mesh_layout);
            backend.end_render_pass();
        }
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.owned.release(backend);
        self.resources = None;
        self.key = None;
        self.failed = None;
        self.plan = ShadowPlan::default();
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
    use crate::scene::Light;
    use glam::Vec3;

    fn small_config() -> RendererConfig {
        RendererConfig {
            shadow_map_size: 64,
            spot_shadow_map_size: 32,
            max_spot_shadows: 2,
            ..Default::default()
        }
    }

    fn spot(z: f32) -> Light {
        Light::spot_fixture(Vec3::new(0.0, 4.0, z), Vec3::NEG_Y, 30.0).with_shadows(true)
    }

    #[test]
    fn test_sun_renders_three_cascades() {
        let mut backend = RecordingBackend::new();
        let shaders = stub_shaders();
        let mut targets = RenderTargetCache::new();
        let config = small_config();
        let mut scene = cube_scene();
        let mut pass = ShadowPass::new(&config);

        let (shadows, _) = run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut pass]);

        assert_eq!(shadows.cascade_count, CASCADE_COUNT);
        assert_eq!(shadows.splits[0], scene.camera.near());
        assert_eq!(shadows.splits[CASCADE_COUNT], scene.camera.far());
        assert!(shadows.sun_direction().is_some());
        assert!(shadows.cascade_maps.iter().all(Option::is_some));
        for i in 0..CASCADE_COUNT {
            assert_eq!(backend.draw_count_in_pass(&format!("Shadow Cascade {}", i)), 1);
        }
    }

    #[test]
    fn test_non_casting_sun_and_disabled_shadows() {
        let mut backend = RecordingBackend::new();
        let shaders = stub_shaders();
        let mut targets = RenderTargetCache::new();
        let config = small_config();
        let mut pass = ShadowPass::new(&config);

        let mut scene = cube_scene();
        scene.set_lights(vec![Light::directional(Vec3::NEG_Y).with_shadows(false)]);
        let (shadows, _) = run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut pass]);
        assert_eq!(shadows.cascade_count, 0);

        let mut scene = cube_scene();
        scene.set_lights(vec![Light::directional(Vec3::NEG_Y), spot(-5.0)]);
        scene.shadows_enabled = false;
        backend.clear_calls();
        let (shadows, _) = run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut pass]);
        assert_eq!(shadows.cascade_count, 0);
        assert_eq!(shadows.spot_shadow_count, 0);
        assert!(backend.render_pass_labels().is_empty());
        assert!(shadows.cascade_maps[0].is_some());
        assert!(shadows.spot_shadow_maps.is_some());
    }

    #[test]
    fn test_spot_slots_are_dense_and_bounded() {
        let mut backend = RecordingBackend::new();
        let shaders = stub_shaders();
        let mut targets = RenderTargetCache::new();
        let config = small_config();
        let mut pass = ShadowPass::new(&config);

        let mut scene = cube_scene();
        scene.set_lights(vec![
            Light::point(Vec3::ZERO, 5.0),
            spot(-30.0),
            Light::point(Vec3::ONE, 5.0),
            spot(-2.0),
            spot(-10.0),
        ]);
        let (shadows, _) = run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut pass]);

        assert_eq!(shadows.spot_shadow_count, 2);
        assert_eq!(shadows.spot_slot(3), Some(0));
        assert_eq!(shadows.spot_slot(4), Some(1));
        assert_eq!(shadows.spot_slot(1), None);
        assert_eq!(shadows.spot_slot(0), None);
        assert_eq!(backend.draw_count_in_pass("Shadow Spot"), 2);
    }

    #[test]
    fn test_frames_are_idempotent_and_resources_stable() {
        let mut backend = RecordingBackend::new();
        let shaders = stub_shaders();
        let mut targets = RenderTargetCache::new();
        let config = small_config();
        let mut pass = ShadowPass::new(&config);
        let mut scene = cube_scene();

        let (first, _) = run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut pass]);
        let views = pass.cascade_views();
        backend.resize(640, 480);
        let (second, _) = run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut pass]);

        assert_eq!(first, second);
        assert_eq!(views, pass.cascade_views());
    }

    #[test]
    fn test_missing_spot_format_falls_back() {
        let backend = RecordingBackend::new()
            .without_format(TextureFormat::R32Float)
            .without_format(TextureFormat::R16Float)
            .without_format(TextureFormat::Rgba16Float);
        let cascade = choose_cascade_format(&backend);
        assert_eq!(cascade, TextureFormat::Rgba8Unorm);
        assert_eq!(choose_spot_format(&backend, cascade), TextureFormat::Rgba8Unorm);
    }

    #[test]
    fn test_release_frees_everything() {
        let mut backend = RecordingBackend::new();
        let shaders = stub_shaders();
        let mut targets = RenderTargetCache::new();
        let config = small_config();
        let mut pass = ShadowPass::new(&config);
        let mut scene = cube_scene();

        run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut pass]);
        assert!(pass.is_ready());

        pass.release(&mut backend);
        for mesh in scene.meshes_mut() {
            mesh.gpu.release(&mut backend);
        }
        assert_eq!(backend.live_resource_count(), 0);
    }
}
