//! Size-dependent render targets shared between passes
//!
//! Each target set is created on first request and reused until the requested
//! size or sample count changes. Handles stay identical between requests, and
//! every set carries a `generation` that changes exactly when it is recreated,
//! so passes can tell when their bind groups went stale. A set that failed to
//! build is not retried until its size, sample count or formats change.

use crate::backend::{
    BackendResult, GraphicsBackend, TextureDescriptor, TextureFormat, TextureHandle,
    TextureUsage, TextureViewDimension, TextureViewHandle,
};

/// A texture and its default view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
}

/// Three colour attachments plus depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBufferTargets {
    /// base colour + metalness, normal + roughness, emissive + occlusion
    pub color: [RenderTarget; 3],
    pub depth: RenderTarget,
    /// Depth aspect view for sampling in later passes
    pub depth_sampled: TextureViewHandle,
    pub color_format: TextureFormat,
    pub depth_format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
    pub generation: u64,
}

/// Output of the lighting resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightingTarget {
    pub target: RenderTarget,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub generation: u64,
}

/// Half-resolution downsample and full-resolution blur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomTargets {
    pub downsample: RenderTarget,
    pub blur: RenderTarget,
    pub format: TextureFormat,
    pub half_size: (u32, u32),
    pub size: (u32, u32),
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TargetKey {
    width: u32,
    height: u32,
    samples: u32,
}

/// Request that failed, with the formats it would have used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FailedKey {
    target: TargetKey,
    formats: [TextureFormat; 2],
}

/// Lazily created render targets keyed by size and sample count
#[derive(Debug, Default)]
pub struct RenderTargetCache {
    gbuffer: Option<GBufferTargets>,
    gbuffer_key: Option<TargetKey>,
    gbuffer_failed: Option<FailedKey>,
    lighting: Option<LightingTarget>,
    lighting_key: Option<TargetKey>,
    lighting_failed: Option<FailedKey>,
    bloom: Option<BloomTargets>,
    bloom_key: Option<TargetKey>,
    bloom_failed: Option<FailedKey>,
    next_generation: u64,
}

fn attachment_usage() -> TextureUsage {
    TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING
}

fn color_format(backend: &dyn GraphicsBackend) -> TextureFormat {
    if backend.is_texture_format_supported(TextureFormat::Rgba16Float, attachment_usage()) {
        TextureFormat::Rgba16Float
    } else {
        TextureFormat::Rgba8Unorm
    }
}

fn depth_format(backend: &dyn GraphicsBackend) -> TextureFormat {
    if backend.is_texture_format_supported(TextureFormat::Depth24PlusStencil8, attachment_usage()) {
        TextureFormat::Depth24PlusStencil8
    } else {
        TextureFormat::Depth32Float
    }
}

/// RGBA16F when it can be rendered to, RGBA8 otherwise
pub fn choose_color_format(backend: &dyn GraphicsBackend) -> TextureFormat {
    let format = color_format(backend);
    if format != TextureFormat::Rgba16Float {
        log::warn!("RenderTargetCache: RGBA16F not supported, falling back to RGBA8");
    }
    format
}

/// Depth24PlusStencil8 when supported, Depth32Float otherwise
pub fn choose_depth_format(backend: &dyn GraphicsBackend) -> TextureFormat {
    let format = depth_format(backend);
    if format != TextureFormat::Depth24PlusStencil8 {
        log::warn!("RenderTargetCache: D24S8 not supported, falling back to D32F");
    }
    format
}

fn create_target(
    backend: &mut dyn GraphicsBackend,
    label: &str,
    width: u32,
    height: u32,
    sample_count: u32,
    format: TextureFormat,
) -> BackendResult<RenderTarget> {
    let texture = backend.create_texture(&TextureDescriptor {
        label: Some(label.to_string()),
        width,
        height,
        array_layers: 1,
        sample_count,
        format,
        usage: attachment_usage(),
    })?;
    match backend.create_texture_view(texture, TextureViewDimension::D2) {
        Ok(view) => Ok(RenderTarget { texture, view }),
        Err(e) => {
            backend.destroy_texture(texture);
            Err(e)
        }
    }
}

fn destroy_target(backend: &mut dyn GraphicsBackend, target: RenderTarget) {
    backend.destroy_texture_view(target.view);
    backend.destroy_texture(target.texture);
}

/// Tracks targets created so far so a failure can unwind them
struct Created<'a> {
    backend: &'a mut dyn GraphicsBackend,
    targets: Vec<RenderTarget>,
}

impl<'a> Created<'a> {
    fn new(backend: &'a mut dyn GraphicsBackend) -> Self {
        Self {
            backend,
            targets: Vec::new(),
        }
    }

    fn target(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        samples: u32,
        format: TextureFormat,
    ) -> BackendResult<RenderTarget> {
        let target = create_target(self.backend, label, width, height, samples, format)?;
        self.targets.push(target);
        Ok(target)
    }

    fn unwind(self) {
        for target in self.targets {
            destroy_target(self.backend, target);
        }
    }
}

impl RenderTargetCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// G-buffer for `size`, recreated when size or sample count changed.
    ///
    /// Zero-sized requests return `None` and leave the cache untouched.
    pub fn get_or_create_gbuffer(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        size: (u32, u32),
        sample_count: u32,
    ) -> Option<GBufferTargets> {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return None;
        }
        let key = TargetKey {
            width,
            height,
            samples: sample_count.max(1),
        };
        if self.gbuffer_key == Some(key) {
            if let Some(gbuffer) = self.gbuffer {
                return Some(gbuffer);
            }
        }
        let failed = FailedKey {
            target: key,
            formats: [color_format(backend), depth_format(backend)],
        };
        if self.gbuffer_failed == Some(failed) {
            return None;
        }

        self.release_gbuffer(backend);
        self.gbuffer_key = Some(key);

        let color_format = choose_color_format(backend);
        let depth_format = choose_depth_format(backend);
        log::debug!(
            "RenderTargetCache: creating G-buffer {}x{} ({:?}, {:?})",
            width,
            height,
            color_format,
            depth_format
        );

        let mut created = Created::new(backend);
        let result = (|| -> BackendResult<([RenderTarget; 3], RenderTarget)> {
            let color = [
                created.target("gbuffer0", width, height, key.samples, color_format)?,
                created.target("gbuffer1", width, height, key.samples, color_format)?,
                created.target("gbuffer2", width, height, key.samples, color_format)?,
            ];
            let depth = created.target("gbuffer depth", width, height, key.samples, depth_format)?;
            Ok((color, depth))
        })();

        let (color, depth) = match result {
            Ok(targets) => targets,
            Err(e) => {
                log::warn!("RenderTargetCache: failed to create G-buffer textures: {}", e);
                created.unwind();
                self.gbuffer_failed = Some(failed);
                return None;
            }
        };
        let depth_sampled = match created
            .backend
            .create_texture_view(depth.texture, TextureViewDimension::DepthSampled)
        {
            Ok(view) => view,
            Err(e) => {
                log::warn!("RenderTargetCache: failed to create G-buffer depth view: {}", e);
                created.unwind();
                self.gbuffer_failed = Some(failed);
                return None;
            }
        };

        let gbuffer = GBufferTargets {
            color,
            depth,
            depth_sampled,
            color_format,
            depth_format,
            width,
            height,
            sample_count: key.samples,
            generation: self.bump_generation(),
        };
        self.gbuffer = Some(gbuffer);
        self.gbuffer_failed = None;
        Some(gbuffer)
    }

    /// Colour target the lighting resolve writes into
    pub fn get_or_create_lighting_target(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        size: (u32, u32),
        sample_count: u32,
    ) -> Option<LightingTarget> {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return None;
        }
        let key = TargetKey {
            width,
            height,
            samples: sample_count.max(1),
        };
        if self.lighting_key == Some(key) {
            if let Some(lighting) = self.lighting {
                return Some(lighting);
            }
        }
        let format = color_format(backend);
        let failed = FailedKey {
            target: key,
            formats: [format, format],
        };
        if self.lighting_failed == Some(failed) {
            return None;
        }

        self.release_lighting(backend);
        self.lighting_key = Some(key);

        let format = choose_color_format(backend);
        log::debug!("RenderTargetCache: creating lighting target {}x{}", width, height);
        let target = match create_target(backend, "lighting", width, height, key.samples, format) {
            Ok(target) => target,
            Err(e) => {
                log::warn!("RenderTargetCache: failed to create lighting target: {}", e);
                self.lighting_failed = Some(failed);
                return None;
            }
        };
        let lighting = LightingTarget {
            target,
            format,
            width,
            height,
            generation: self.bump_generation(),
        };
        self.lighting = Some(lighting);
        self.lighting_failed = None;
        Some(lighting)
    }

    /// Bloom chain for a full-resolution `size`
    pub fn get_or_create_bloom_targets(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        size: (u32, u32),
    ) -> Option<BloomTargets> {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return None;
        }
        let key = TargetKey {
            width,
            height,
            samples: 1,
        };
        if self.bloom_key == Some(key) {
            if let Some(bloom) = self.bloom {
                return Some(bloom);
            }
        }
        let format = color_format(backend);
        let failed = FailedKey {
            target: key,
            formats: [format, format],
        };
        if self.bloom_failed == Some(failed) {
            return None;
        }

        self.release_bloom(backend);
        self.bloom_key = Some(key);

        let format = choose_color_format(backend);
        let half_size = ((width / 2).max(1), (height / 2).max(1));
        log::debug!("RenderTargetCache: creating bloom targets {}x{}", width, height);

        let mut created = Created::new(backend);
        let result = (|| -> BackendResult<(RenderTarget, RenderTarget)> {
            let downsample =
                created.target("bloom downsample", half_size.0, half_size.1, 1, format)?;
            let blur = created.target("bloom blur", width, height, 1, format)?;
            Ok((downsample, blur))
        })();
        let (downsample, blur) = match result {
            Ok(targets) => targets,
            Err(e) => {
                log::warn!("RenderTargetCache: failed to create bloom targets: {}", e);
                created.unwind();
                self.bloom_failed = Some(failed);
                return None;
            }
        };

        let bloom = BloomTargets {
            downsample,
            blur,
            format,
            half_size,
            size,
            generation: self.bump_generation(),
        };
        self.bloom = Some(bloom);
        self.bloom_failed = None;
        Some(bloom)
    }

    pub fn gbuffer(&self) -> Option<GBufferTargets> {
        self.gbuffer
    }

    pub fn lighting_target(&self) -> Option<LightingTarget> {
        self.lighting
    }

    pub fn bloom_targets(&self) -> Option<BloomTargets> {
        self.bloom
    }

    fn release_gbuffer(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(gbuffer) = self.gbuffer.take() {
            backend.destroy_texture_view(gbuffer.depth_sampled);
            for target in gbuffer.color {
                destroy_target(backend, target);
            }
            destroy_target(backend, gbuffer.depth);
        }
        self.gbuffer_key = None;
    }

    fn release_lighting(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(lighting) = self.lighting.take() {
            destroy_target(backend, lighting.target);
        }
        self.lighting_key = None;
    }

    /// Drop the bloom chain; it is recreated on the next request
    pub fn release_bloom(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(bloom) = self.bloom.take() {
            destroy_target(backend, bloom.downsample);
            destroy_target(backend, bloom.blur);
        }
        self.bloom_key = None;
    }

    /// Release every target and forget earlier failures
    pub fn release_all(&mut self, backend: &mut dyn GraphicsBackend) {
        self.release_gbuffer(backend);
        self.release_lighting(backend);
        self.release_bloom(backend);
        self.gbuffer_failed = None;
        self.lighting_failed = None;
        self.bloom_failed = None;
    }
}
