//! Light culling compute pass
//!
//! Splits the screen into square tiles and builds, per tile, the list of
//! lights whose volume touches it. The list layout in the index buffer is
//! `MAX_LIGHTS + 1` words per tile: a count followed by light indices.
//!
//! Culling is optional. On backends without compute or without validated
//! storage buffer culling, or for a degenerate target, the pass publishes
//! `enabled = false` and the lighting pass evaluates every light.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use std::any::Any;

use crate::backend::*;
use crate::cache::ShaderManager;
use crate::pipeline::OwnedResources;
use crate::render_graph::{FrameContext, LightCullingData, RenderPass};
use crate::scene::{LightsUniform, Scene, MAX_LIGHTS};

pub const LIGHT_CULL_CS: &str = "light_cull_cs";

/// Words per tile in the index buffer
pub const TILE_STRIDE: usize = MAX_LIGHTS + 1;

/// Uniform block of the culling dispatch
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CullParams {
    pub view: Mat4,
    pub proj: Mat4,
    /// width, height, 1 / width, 1 / height
    pub screen: Vec4,
    /// tile count x, tile count y, tile size, max lights per tile
    pub tile: Vec4,
    /// near, far, 0, 0
    pub depth: Vec4,
}

/// Tile grid covering `size` with tiles of `tile_size` pixels
pub fn tile_grid(size: (u32, u32), tile_size: u32) -> (u32, u32) {
    let tile_size = tile_size.max(1);
    (size.0.div_ceil(tile_size), size.1.div_ceil(tile_size))
}

/// Reasons light culling is unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullingUnavailable {
    NoCompute,
    StorageCullingUnsupported,
    DisabledByConfig,
    DegenerateTarget,
}

#[derive(Debug, Clone, Copy)]
struct CullingResources {
    pipeline: ComputePipelineHandle,
    light_buffer: BufferHandle,
    params_buffer: BufferHandle,
    index_buffer: BufferHandle,
    bind_group: BindGroupHandle,
    grid: (u32, u32),
    size: (u32, u32),
}

#[derive(Debug)]
pub struct LightCullingPass {
    tile_size: u32,
    owned: OwnedResources,
    resources: Option<CullingResources>,
    failed_grid: Option<(u32, u32)>,
    /// Last reason logged, so a persistent condition is reported once
    unavailable: Option<CullingUnavailable>,
    active: bool,
}

impl LightCullingPass {
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size: tile_size.max(1),
            owned: OwnedResources::default(),
            resources: None,
            failed_grid: None,
            unavailable: None,
            active: false,
        }
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Index buffer currently in use
    pub fn light_index_buffer(&self) -> Option<BufferHandle> {
        self.resources.map(|r| r.index_buffer)
    }

    fn availability(
        &self,
        capabilities: &BackendCapabilities,
        enabled_by_config: bool,
        size: Option<(u32, u32)>,
    ) -> Result<(u32, u32), CullingUnavailable> {
        if !capabilities.compute {
            return Err(CullingUnavailable::NoCompute);
        }
        if !capabilities.storage_buffer_light_culling {
            return Err(CullingUnavailable::StorageCullingUnsupported);
        }
        if !enabled_by_config {
            return Err(CullingUnavailable::DisabledByConfig);
        }
        size.ok_or(CullingUnavailable::DegenerateTarget)
    }

    fn report(&mut self, reason: Option<CullingUnavailable>) {
        if self.unavailable == reason {
            return;
        }
        match reason {
            Some(reason) => log::info!("Light culling: disabled ({:?}), lighting evaluates every light", reason),
            None => log::info!("Light culling: enabled with {}px tiles", self.tile_size),
        }
        self.unavailable = reason;
    }

    fn release_resources(&mut self, backend: &mut dyn GraphicsBackend) {
        self.owned.release(backend);
        self.resources = None;
    }

    fn ensure_resources(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        shaders: &ShaderManager,
        size: (u32, u32),
    ) {
        let grid = tile_grid(size, self.tile_size);
        if let Some(resources) = &mut self.resources {
            if resources.grid == grid {
                resources.size = size;
                return;
            }
        }
        if self.failed_grid == Some(grid) {
            return;
        }

        self.release_resources(backend);
        log::debug!("Light culling: allocating {}x{} tile grid", grid.0, grid.1);
        match self.create_resources(backend, shaders, grid, size) {
            Ok(Some(resources)) => {
                self.resources = Some(resources);
                self.failed_grid = None;
            }
            Ok(None) => {
                log::warn!("Light culling: compute stage unavailable");
                self.owned.release(backend);
                self.failed_grid = Some(grid);
            }
            Err(e) => {
                log::warn!("Light culling: failed to create resources: {}", e);
                self.owned.release(backend);
                self.failed_grid = Some(grid);
            }
        }
    }

    fn create_resources(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        shaders: &ShaderManager,
        grid: (u32, u32),
        size: (u32, u32),
    ) -> BackendResult<Option<CullingResources>> {
        let shader = shaders.load_stage(ShaderStageKind::Compute, LIGHT_CULL_CS);
        if !shader.is_valid() {
            return Ok(None);
        }

        let light_buffer = self.owned.buffer(backend.create_buffer(&BufferDescriptor::storage(
            "culling lights",
            std::mem::size_of::<LightsUniform>() as u64,
        ))?);
        let params_buffer = self.owned.buffer(backend.create_buffer(&BufferDescriptor::uniform(
            "culling params",
            std::mem::size_of::<CullParams>() as u64,
        ))?);
        let tiles = grid.0 as u64 * grid.1 as u64;
        let index_buffer = self.owned.buffer(backend.create_buffer(&BufferDescriptor::storage(
            "tile light indices",
            tiles * TILE_STRIDE as u64 * std::mem::size_of::<u32>() as u64,
        ))?);

        let layout = self.owned.layout(backend.create_bind_group_layout(
            "light culling",
            &[
                BindGroupLayoutEntry::new(
                    0,
                    ShaderStageFlags::COMPUTE,
                    BindingType::StorageBuffer { read_only: true },
                ),
                BindGroupLayoutEntry::new(1, ShaderStageFlags::COMPUTE, BindingType::UniformBuffer),
                BindGroupLayoutEntry::new(
                    2,
                    ShaderStageFlags::COMPUTE,
                    BindingType::StorageBuffer { read_only: false },
                ),
            ],
        )?);
        let bind_group = self.owned.bind_group(backend.create_bind_group(
            layout,
            &[
                (0, BindGroupEntry::buffer(light_buffer)),
                (1, BindGroupEntry::buffer(params_buffer)),
                (2, BindGroupEntry::buffer(index_buffer)),
            ],
        )?);

        let pipeline = self
            .owned
            .compute_pipeline(backend.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some("light culling".into()),
                shader,
                bind_group_layouts: vec![layout],
            })?);

        Ok(Some(CullingResources {
            pipeline,
            light_buffer,
            params_buffer,
            index_buffer,
            bind_group,
            grid,
            size,
        }))
    }

    fn cull_params(scene: &Scene, clip: &ClipSpace, resources: &CullingResources, tile_size: u32) -> CullParams {
        let camera = &scene.camera;
        let (width, height) = resources.size;
        let near = camera.near().max(0.001);
        let far = camera.far().max(near + 0.001);
        CullParams {
            view: camera.view_matrix(),
            proj: clip.correction * camera.projection_matrix(),
            screen: Vec4::new(width as f32, height as f32, 1.0 / width as f32, 1.0 / height as f32),
            tile: Vec4::new(
                resources.grid.0 as f32,
                resources.grid.1 as f32,
                tile_size as f32,
                MAX_LIGHTS as f32,
            ),
            depth: Vec4::new(near, far, 0.0, 0.0),
        }
    }
}

impl RenderPass for LightCullingPass {
    fn name(&self) -> &str {
        "Light Culling Pass"
    }

    fn prepare(&mut self, ctx: &mut FrameContext) {
        self.active = false;
        ctx.light_culling = LightCullingData {
            tile_size: self.tile_size,
            max_lights_per_tile: MAX_LIGHTS as u32,
            ..Default::default()
        };
        let size = ctx.target_size();
        let Some(backend) = ctx.backend.as_deref_mut() else {
            return;
        };

        let size = match self.availability(&backend.capabilities(), ctx.config.light_culling, size) {
            Ok(size) => size,
            Err(reason) => {
                self.report(Some(reason));
                if reason != CullingUnavailable::DegenerateTarget {
                    self.release_resources(backend);
                }
                return;
            }
        };

        self.ensure_resources(backend, ctx.shaders, size);
        let Some(resources) = self.resources else {
            return;
        };
        self.report(None);

        let (near, far) = match ctx.scene.as_deref() {
            Some(scene) => (scene.camera.near(), scene.camera.far()),
            None => (0.0, 0.0),
        };
        ctx.light_culling = LightCullingData {
            enabled: true,
            tile_size: self.tile_size,
            tile_count_x: resources.grid.0,
            tile_count_y: resources.grid.1,
            light_index_buffer: Some(resources.index_buffer),
            near,
            far,
            max_lights_per_tile: MAX_LIGHTS as u32,
        };
        self.active = true;
    }

    fn execute(&mut self, ctx: &mut FrameContext) {
        if !self.active || !ctx.light_culling.enabled {
            return;
        }
        let Some(resources) = self.resources else {
            return;
        };
        let (Some(backend), Some(scene)) = (ctx.backend.as_deref_mut(), ctx.scene.as_deref()) else {
            return;
        };

        let lights = LightsUniform::from_scene(scene);
        backend.write_buffer(resources.light_buffer, 0, bytemuck::bytes_of(&lights));
        let params = Self::cull_params(scene, &backend.clip_space(), &resources, self.tile_size);
        backend.write_buffer(resources.params_buffer, 0, bytemuck::bytes_of(&params));

        backend.begin_compute_pass(Some("Light Culling Pass"));
        backend.set_compute_pipeline(resources.pipeline);
        backend.set_bind_group(0, resources.bind_group);
        backend.dispatch_compute(resources.grid.0, resources.grid.1, 1);
        backend.end_compute_pass();
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.release_resources(backend);
        self.failed_grid = None;
        self.active = false;
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
    use crate::config::RendererConfig;
    use crate::pipeline::test_util::{cube_scene, run_passes, stub_shaders};

    #[test]
    fn test_tile_grid_rounds_up() {
        assert_eq!(tile_grid((1280, 720), 16), (80, 45));
        assert_eq!(tile_grid((1281, 721), 16), (81, 46));
        assert_eq!(tile_grid((1, 1), 16), (1, 1));
        assert_eq!(tile_grid((10, 10), 0), (10, 10));
    }

    #[test]
    fn test_dispatches_one_group_per_tile() {
        let mut backend = RecordingBackend::new().with_surface_size(64, 32);
        let shaders = stub_shaders();
        let mut targets = RenderTargetCache::new();
        let config = RendererConfig::default();
        let mut scene = cube_scene();
        let mut pass = LightCullingPass::new(16);

        let (_, culling) = run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut pass]);

        assert!(culling.enabled);
        assert_eq!((culling.tile_count_x, culling.tile_count_y), (4, 2));
        let buffer = culling.light_index_buffer.unwrap();
        assert_eq!(
            backend.buffer_descriptor(buffer).unwrap().size,
            8 * TILE_STRIDE as u64 * 4
        );
        assert!(backend
            .calls()
            .iter()
            .any(|call| matches!(call, RecordedCall::Dispatch { x: 4, y: 2, z: 1 })));
    }

    #[test]
    fn test_buffers_reallocate_only_on_grid_change() {
        let mut backend = RecordingBackend::new().with_surface_size(64, 32);
        let shaders = stub_shaders();
        let mut targets = RenderTargetCache::new();
        let config = RendererConfig::default();
        let mut scene = cube_scene();
        let mut pass = LightCullingPass::new(16);

        run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut pass]);
        let first = pass.light_index_buffer();

        backend.end_frame().unwrap();
        backend.resize(60, 30);
        run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut pass]);
        assert_eq!(pass.light_index_buffer(), first);

        backend.end_frame().unwrap();
        backend.resize(128, 32);
        run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut pass]);
        assert_ne!(pass.light_index_buffer(), first);
        assert!(!backend.is_buffer_alive(first.unwrap()));
    }

    #[test]
    fn test_disabled_without_compute_or_config() {
        let shaders = stub_shaders();
        let mut targets = RenderTargetCache::new();
        let mut scene = cube_scene();

        let mut backend = RecordingBackend::new().with_capabilities(BackendCapabilities {
            compute: false,
            ..Default::default()
        });
        let mut pass = LightCullingPass::new(16);
        let config = RendererConfig::default();
        let (_, culling) = run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut pass]);
        assert!(!culling.enabled);
        assert_eq!(culling.light_index_buffer, None);
        assert_eq!(backend.dispatch_count(), 0);

        let mut backend = RecordingBackend::new().with_capabilities(BackendCapabilities {
            storage_buffer_light_culling: false,
            ..Default::default()
        });
        let (_, culling) = run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut pass]);
        assert!(!culling.enabled);

        let mut backend = RecordingBackend::new();
        let config = RendererConfig {
            light_culling: false,
            ..Default::default()
        };
        let (_, culling) = run_passes(&mut backend, &mut scene, &shaders, &mut targets, &config, &mut [&mut pass]);
        assert!(!culling.enabled);
        assert_eq!(backend.dispatch_count(), 0);
    }
}
