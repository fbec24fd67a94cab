//! Per-frame state threaded through every pass

use glam::{Mat4, Vec3, Vec4};

use crate::backend::{BufferHandle, ClipSpace, GraphicsBackend, TextureFormat, TextureViewHandle};
use crate::cache::{RenderTargetCache, ShaderManager};
use crate::config::RendererConfig;
use crate::scene::{Scene, MAX_LIGHTS};

/// Number of directional shadow cascades
pub const CASCADE_COUNT: usize = 3;

/// Shadow pass output consumed by the lighting pass
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowData {
    /// Cascades rendered this frame, 0 when directional shadows are off
    pub cascade_count: usize,
    pub light_view_proj: [Mat4; CASCADE_COUNT],
    /// Near plane, the two inner split distances, far plane
    pub splits: [f32; CASCADE_COUNT + 1],
    pub cascade_maps: [Option<TextureViewHandle>; CASCADE_COUNT],
    pub cascade_format: Option<TextureFormat>,
    /// Direction of the shadow casting sun, `w` = 1 when one exists
    pub dir_light_dir: Vec4,
    pub dir_light_color_intensity: Vec4,
    /// Indexed by light index
    pub spot_light_view_proj: Vec<Mat4>,
    /// `(slot, 1, near, far)` for shadowed spots, `(-1, 0, 0, 0)` otherwise
    pub spot_shadow_params: Vec<Vec4>,
    /// Every spot shadow slot, one array layer each
    pub spot_shadow_maps: Option<TextureViewHandle>,
    pub spot_shadow_count: usize,
    /// `(depth scale, depth bias, reverse-Z, 0)`
    pub depth_params: Vec4,
}

impl Default for ShadowData {
    fn default() -> Self {
        Self {
            cascade_count: 0,
            light_view_proj: [Mat4::IDENTITY; CASCADE_COUNT],
            splits: [0.0; CASCADE_COUNT + 1],
            cascade_maps: [None; CASCADE_COUNT],
            cascade_format: None,
            dir_light_dir: Vec4::ZERO,
            dir_light_color_intensity: Vec4::ZERO,
            spot_light_view_proj: vec![Mat4::IDENTITY; MAX_LIGHTS],
            spot_shadow_params: vec![Self::NO_SPOT_SHADOW; MAX_LIGHTS],
            spot_shadow_maps: None,
            spot_shadow_count: 0,
            depth_params: ClipSpace::default().depth_params(),
        }
    }
}

impl ShadowData {
    pub const NO_SPOT_SHADOW: Vec4 = Vec4::new(-1.0, 0.0, 0.0, 0.0);

    /// Forget everything computed for the previous frame
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Slot and planes of the spot shadow for `light_index`
    pub fn spot_slot(&self, light_index: usize) -> Option<usize> {
        let params = self.spot_shadow_params.get(light_index)?;
        (params.y > 0.0 && params.x >= 0.0).then_some(params.x as usize)
    }

    pub fn sun_direction(&self) -> Option<Vec3> {
        (self.dir_light_dir.w > 0.0).then(|| self.dir_light_dir.truncate())
    }
}

/// Light culling output consumed by the lighting pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightCullingData {
    pub enabled: bool,
    pub tile_size: u32,
    pub tile_count_x: u32,
    pub tile_count_y: u32,
    /// Per tile: light count followed by up to `max_lights_per_tile` indices
    pub light_index_buffer: Option<BufferHandle>,
    pub near: f32,
    pub far: f32,
    pub max_lights_per_tile: u32,
}

impl LightCullingData {
    pub fn tile_count(&self) -> u32 {
        self.tile_count_x * self.tile_count_y
    }
}

/// Everything a pass can see during one frame
pub struct FrameContext<'a> {
    pub backend: Option<&'a mut dyn GraphicsBackend>,
    pub targets: &'a mut RenderTargetCache,
    pub shaders: &'a ShaderManager,
    pub scene: Option<&'a mut Scene>,
    pub config: &'a RendererConfig,
    pub shadows: ShadowData,
    pub light_culling: LightCullingData,
    /// `false` shows the G-buffer base colour instead of lit output
    pub lighting_enabled: bool,
}

impl<'a> FrameContext<'a> {
    pub fn new(
        backend: &'a mut dyn GraphicsBackend,
        targets: &'a mut RenderTargetCache,
        shaders: &'a ShaderManager,
        scene: &'a mut Scene,
        config: &'a RendererConfig,
    ) -> Self {
        Self {
            backend: Some(backend),
            targets,
            shaders,
            scene: Some(scene),
            config,
            shadows: ShadowData::default(),
            light_culling: LightCullingData::default(),
            lighting_enabled: !config.debug_gbuffer_passthrough,
        }
    }

    /// Size of the image being rendered: the swapchain image when a frame is
    /// open, the surface size otherwise
    pub fn target_size(&self) -> Option<(u32, u32)> {
        let backend = self.backend.as_deref()?;
        let (width, height) = backend
            .current_frame()
            .map(|frame| (frame.width, frame.height))
            .unwrap_or_else(|| backend.surface_size());
        (width > 0 && height > 0).then_some((width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_spot_slots() {
        let mut data = ShadowData::default();
        data.cascade_count = 3;
        data.spot_shadow_params[4] = Vec4::new(0.0, 1.0, 1.0, 10.0);
        assert_eq!(data.spot_slot(4), Some(0));

        data.reset();
        assert_eq!(data.cascade_count, 0);
        assert_eq!(data.spot_slot(4), None);
        assert_eq!(data.spot_shadow_params.len(), MAX_LIGHTS);
    }

    #[test]
    fn test_target_size_requires_backend() {
        let mut targets = RenderTargetCache::new();
        let shaders = ShaderManager::new("shaders");
        let config = RendererConfig::default();
        let ctx = FrameContext {
            backend: None,
            targets: &mut targets,
            shaders: &shaders,
            scene: None,
            config: &config,
            shadows: ShadowData::default(),
            light_culling: LightCullingData::default(),
            lighting_enabled: true,
        };
        assert_eq!(ctx.target_size(), None);
    }
}
