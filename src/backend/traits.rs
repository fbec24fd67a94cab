//! Core backend abstraction traits
//!
//! The render passes are written against [`GraphicsBackend`] only. Anything that
//! differs between GPU APIs is exposed as a capability query instead of a
//! backend name, so pass logic never branches on which backend is active.

use crate::backend::shader::ShaderStage;
use crate::backend::types::*;
use glam::Mat4;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create sampler: {0}")]
    SamplerCreationFailed(String),
    #[error("Failed to create bind group: {0}")]
    BindGroupCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Unsupported texture format {0:?}")]
    UnsupportedFormat(TextureFormat),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a texture view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewHandle(pub(crate) u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub(crate) u64);

/// Handle to a render pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPipelineHandle(pub(crate) u64);

/// Handle to a compute pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputePipelineHandle(pub(crate) u64);

/// Handle to a bind group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupHandle(pub(crate) u64);

/// Handle to a bind group layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupLayoutHandle(pub(crate) u64);

/// Bind group entry for creating bind groups
#[derive(Debug, Clone, PartialEq)]
pub enum BindGroupEntry {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: Option<u64>,
    },
    Texture(TextureViewHandle),
    Sampler(SamplerHandle),
}

impl BindGroupEntry {
    pub fn buffer(buffer: BufferHandle) -> Self {
        BindGroupEntry::Buffer {
            buffer,
            offset: 0,
            size: None,
        }
    }
}

/// Bind group layout entry
#[derive(Debug, Clone)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStageFlags,
    pub ty: BindingType,
}

impl BindGroupLayoutEntry {
    pub fn new(binding: u32, visibility: ShaderStageFlags, ty: BindingType) -> Self {
        Self {
            binding,
            visibility,
            ty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStageFlags(u32);

impl ShaderStageFlags {
    pub const VERTEX: Self = Self(1 << 0);
    pub const FRAGMENT: Self = Self(1 << 1);
    pub const COMPUTE: Self = Self(1 << 2);
    pub const VERTEX_FRAGMENT: Self = Self((1 << 0) | (1 << 1));

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for ShaderStageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Binding type
#[derive(Debug, Clone)]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer {
        read_only: bool,
    },
    Texture {
        sample_type: TextureSampleType,
        array: bool,
    },
    Sampler {
        comparison: bool,
        filtering: bool,
    },
}

impl BindingType {
    pub fn float_texture() -> Self {
        BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: true },
            array: false,
        }
    }

    pub fn float_texture_array() -> Self {
        BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: true },
            array: true,
        }
    }

    pub fn depth_texture() -> Self {
        BindingType::Texture {
            sample_type: TextureSampleType::Depth,
            array: false,
        }
    }

    pub fn filtering_sampler() -> Self {
        BindingType::Sampler {
            comparison: false,
            filtering: true,
        }
    }

    pub fn non_filtering_sampler() -> Self {
        BindingType::Sampler {
            comparison: false,
            filtering: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSampleType {
    Float { filterable: bool },
    Depth,
    Uint,
}

/// Render pipeline descriptor
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub vertex: ShaderStage,
    pub fragment: Option<ShaderStage>,
    pub vertex_layouts: Vec<VertexBufferLayout>,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
    pub primitive_topology: PrimitiveTopology,
    pub front_face: FrontFace,
    pub cull_mode: CullMode,
    pub depth_stencil: Option<DepthStencilState>,
    pub color_targets: Vec<ColorTargetState>,
    pub sample_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
}

impl ColorTargetState {
    pub fn opaque(format: TextureFormat) -> Self {
        Self {
            format,
            blend: None,
        }
    }
}

/// Compute pipeline descriptor
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    pub shader: ShaderStage,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
}

/// Color attachment for render pass
#[derive(Debug, Clone, PartialEq)]
pub struct ColorAttachment {
    pub view: TextureViewHandle,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

impl ColorAttachment {
    pub fn clear(view: TextureViewHandle, color: [f32; 4]) -> Self {
        Self {
            view,
            load_op: LoadOp::Clear(color),
            store_op: StoreOp::Store,
        }
    }

    pub fn load(view: TextureViewHandle) -> Self {
        Self {
            view,
            load_op: LoadOp::Load,
            store_op: StoreOp::Store,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    Discard,
}

/// Depth stencil attachment for render pass
#[derive(Debug, Clone, PartialEq)]
pub struct DepthStencilAttachment {
    pub view: TextureViewHandle,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub depth_clear_value: f32,
}

impl DepthStencilAttachment {
    pub fn clear(view: TextureViewHandle, depth: f32) -> Self {
        Self {
            view,
            depth_load_op: LoadOp::Clear([depth; 4]),
            depth_store_op: StoreOp::Store,
            depth_clear_value: depth,
        }
    }
}

/// Render pass descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Swapchain image acquired for the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainFrame {
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// Feature and convention flags of the active backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// General-purpose compute shaders are available
    pub compute: bool,
    /// Storage-buffer based light culling has been validated on this backend
    pub storage_buffer_light_culling: bool,
    /// Clip space depth range is [0, 1] rather than [-1, 1]
    pub clip_depth_zero_to_one: bool,
    /// Framebuffer row 0 is at the bottom
    pub y_up_in_framebuffer: bool,
    /// NDC +Y points up
    pub y_up_in_ndc: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            compute: true,
            storage_buffer_light_culling: true,
            clip_depth_zero_to_one: true,
            y_up_in_framebuffer: false,
            y_up_in_ndc: true,
        }
    }
}

/// Clip-space conventions needed to build and invert projection matrices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipSpace {
    /// Applied on the left of every projection matrix before upload
    pub correction: Mat4,
    pub depth_zero_to_one: bool,
}

impl Default for ClipSpace {
    fn default() -> Self {
        Self {
            correction: Mat4::IDENTITY,
            depth_zero_to_one: true,
        }
    }
}

impl ClipSpace {
    /// Reversed depth is signalled by a negative Z scale in the correction matrix
    pub fn reverse_z(&self) -> bool {
        self.correction.z_axis.z < 0.0
    }

    /// `(scale, bias, reverse_z, 0)` mapping clip depth to [0, 1] in shaders
    pub fn depth_params(&self) -> glam::Vec4 {
        let (scale, bias) = if self.depth_zero_to_one {
            (1.0, 0.0)
        } else {
            (0.5, 0.5)
        };
        glam::Vec4::new(scale, bias, if self.reverse_z() { 1.0 } else { 0.0 }, 0.0)
    }

    /// Depth value a depth buffer is cleared to
    pub fn far_depth(&self) -> f32 {
        if self.reverse_z() {
            0.0
        } else {
            1.0
        }
    }

    /// Depth compare that keeps the nearest fragment
    pub fn nearer_or_equal(&self) -> CompareFunction {
        if self.reverse_z() {
            CompareFunction::GreaterEqual
        } else {
            CompareFunction::LessEqual
        }
    }
}

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Human readable backend name
    fn name(&self) -> &str;

    /// Feature and convention flags
    fn capabilities(&self) -> BackendCapabilities;

    /// Whether `format` can be created with `usage`
    fn is_texture_format_supported(&self, format: TextureFormat, usage: TextureUsage) -> bool;

    /// Matrix that maps the renderer's clip space to the backend's
    fn clip_space_correction(&self) -> Mat4;

    fn clip_space(&self) -> ClipSpace {
        ClipSpace {
            correction: self.clip_space_correction(),
            depth_zero_to_one: self.capabilities().clip_depth_zero_to_one,
        }
    }

    /// Resize the swapchain
    fn resize(&mut self, width: u32, height: u32);

    /// Get the actual surface size (may be clamped by device limits)
    fn surface_size(&self) -> (u32, u32);

    /// Get the swapchain format
    fn swapchain_format(&self) -> TextureFormat;

    /// Acquire the next swapchain image and start recording
    fn begin_frame(&mut self) -> BackendResult<SwapchainFrame>;

    /// Swapchain image of the frame being recorded, if any
    fn current_frame(&self) -> Option<SwapchainFrame>;

    fn current_swapchain_view(&self) -> Option<TextureViewHandle> {
        self.current_frame().map(|frame| frame.view)
    }

    /// Submit recorded work and present
    fn end_frame(&mut self) -> BackendResult<()>;

    /// Submit work recorded outside of a frame (offscreen rendering)
    fn flush(&mut self) {}

    // Resource creation

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle>;

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        dimension: TextureViewDimension,
    ) -> BackendResult<TextureViewHandle>;

    /// Upload tightly packed pixels into one array layer of a texture
    fn write_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        data: &[u8],
        width: u32,
        height: u32,
    );

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    // Pipeline creation

    fn create_bind_group_layout(
        &mut self,
        label: &str,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle>;

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle>;

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle>;

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle>;

    // Command recording

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor);

    fn end_render_pass(&mut self);

    fn begin_compute_pass(&mut self, label: Option<&str>);

    fn end_compute_pass(&mut self);

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle);

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle);

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle);

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat);

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32);

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>);

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    );

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32);

    // Resource cleanup

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn destroy_texture_view(&mut self, view: TextureViewHandle);

    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle);

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle);

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle);

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_z_detected_from_correction() {
        let mut clip = ClipSpace::default();
        assert!(!clip.reverse_z());
        assert_eq!(clip.far_depth(), 1.0);
        assert_eq!(clip.nearer_or_equal(), CompareFunction::LessEqual);

        clip.correction = Mat4::from_cols(
            glam::Vec4::X,
            glam::Vec4::Y,
            glam::Vec4::new(0.0, 0.0, -1.0, 0.0),
            glam::Vec4::new(0.0, 0.0, 1.0, 1.0),
        );
        assert!(clip.reverse_z());
        assert_eq!(clip.far_depth(), 0.0);
        assert_eq!(clip.nearer_or_equal(), CompareFunction::GreaterEqual);
        assert_eq!(clip.depth_params().z, 1.0);
    }

    #[test]
    fn test_depth_params_for_minus_one_to_one_clip() {
        let clip = ClipSpace {
            correction: Mat4::IDENTITY,
            depth_zero_to_one: false,
        };
        let params = clip.depth_params();
        assert_eq!(params.x, 0.5);
        assert_eq!(params.y, 0.5);
    }
}
