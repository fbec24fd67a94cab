//! Recording GPU backend for testing and headless validation.
//!
//! This backend doesn't touch any GPU. It hands out handles, keeps track of
//! which resources are alive, stores the bytes written into buffers and records
//! every command into a log that tests can inspect afterwards.

use std::collections::{HashMap, HashSet};

use glam::Mat4;

use crate::backend::traits::*;
use crate::backend::types::*;

/// One command recorded by [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    BeginFrame,
    EndFrame,
    Flush,
    BeginRenderPass {
        label: Option<String>,
        color_attachments: Vec<TextureViewHandle>,
        depth_attachment: Option<TextureViewHandle>,
    },
    EndRenderPass,
    BeginComputePass {
        label: Option<String>,
    },
    EndComputePass,
    SetRenderPipeline(RenderPipelineHandle),
    SetComputePipeline(ComputePipelineHandle),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupHandle,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
        format: IndexFormat,
    },
    SetViewport {
        width: f32,
        height: f32,
    },
    Draw {
        vertices: std::ops::Range<u32>,
        instances: std::ops::Range<u32>,
    },
    DrawIndexed {
        indices: std::ops::Range<u32>,
        instances: std::ops::Range<u32>,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        size: usize,
    },
    WriteTexture {
        texture: TextureHandle,
        layer: u32,
    },
}

#[derive(Debug, Clone)]
struct RecordedBuffer {
    descriptor: BufferDescriptor,
    contents: Vec<u8>,
}

#[derive(Debug, Clone)]
struct RecordedView {
    texture: TextureHandle,
    dimension: TextureViewDimension,
}

/// Headless backend that records instead of rendering.
#[derive(Debug)]
pub struct RecordingBackend {
    capabilities: BackendCapabilities,
    clip_correction: Mat4,
    unsupported_formats: HashSet<TextureFormat>,
    fail_pipelines: bool,
    surface_size: (u32, u32),
    swapchain_format: TextureFormat,
    current_frame: Option<SwapchainFrame>,
    frame_index: u64,

    next_id: u64,
    buffers: HashMap<u64, RecordedBuffer>,
    textures: HashMap<u64, TextureDescriptor>,
    texture_requests: usize,
    views: HashMap<u64, RecordedView>,
    samplers: HashSet<u64>,
    layouts: HashSet<u64>,
    bind_groups: HashMap<u64, Vec<(u32, BindGroupEntry)>>,
    render_pipelines: HashMap<u64, Option<String>>,
    compute_pipelines: HashMap<u64, Option<String>>,

    in_render_pass: bool,
    in_compute_pass: bool,
    calls: Vec<RecordedCall>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    /// Create a recording backend with a 1280x720 surface and full capabilities.
    pub fn new() -> Self {
        Self {
            capabilities: BackendCapabilities::default(),
            clip_correction: Mat4::IDENTITY,
            unsupported_formats: HashSet::new(),
            fail_pipelines: false,
            surface_size: (1280, 720),
            swapchain_format: TextureFormat::Bgra8UnormSrgb,
            current_frame: None,
            frame_index: 0,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_requests: 0,
            views: HashMap::new(),
            samplers: HashSet::new(),
            layouts: HashSet::new(),
            bind_groups: HashMap::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            in_render_pass: false,
            in_compute_pass: false,
            calls: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_clip_correction(mut self, correction: Mat4) -> Self {
        self.clip_correction = correction;
        self
    }

    pub fn with_surface_size(mut self, width: u32, height: u32) -> Self {
        self.surface_size = (width, height);
        self
    }

    /// Mark a texture format as unsupported for every usage
    pub fn without_format(mut self, format: TextureFormat) -> Self {
        self.unsupported_formats.insert(format);
        self
    }

    /// Make every pipeline creation fail
    pub fn set_fail_pipelines(&mut self, fail: bool) {
        self.fail_pipelines = fail;
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, call: RecordedCall) {
        self.calls.push(call);
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Every command recorded since the last [`clear_calls`](Self::clear_calls)
    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }

    /// Number of `create_texture` calls, failed ones included
    pub fn texture_request_count(&self) -> usize {
        self.texture_requests
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Labels of all render passes recorded, in order
    pub fn render_pass_labels(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                RecordedCall::BeginRenderPass { label, .. } => {
                    Some(label.clone().unwrap_or_default())
                }
                _ => None,
            })
            .collect()
    }

    /// Commands recorded inside every render pass whose label starts with `prefix`
    pub fn calls_in_pass(&self, prefix: &str) -> Vec<RecordedCall> {
        let mut inside = false;
        let mut result = Vec::new();
        for call in &self.calls {
            match call {
                RecordedCall::BeginRenderPass { label, .. } => {
                    inside = label.as_deref().is_some_and(|l| l.starts_with(prefix));
                }
                RecordedCall::BeginComputePass { label } => {
                    inside = label.as_deref().is_some_and(|l| l.starts_with(prefix));
                }
                RecordedCall::EndRenderPass | RecordedCall::EndComputePass => inside = false,
                other if inside => result.push(other.clone()),
                _ => {}
            }
        }
        result
    }

    /// Number of draw calls recorded inside passes whose label starts with `prefix`
    pub fn draw_count_in_pass(&self, prefix: &str) -> usize {
        self.calls_in_pass(prefix)
            .iter()
            .filter(|call| matches!(call, RecordedCall::Draw { .. } | RecordedCall::DrawIndexed { .. }))
            .count()
    }

    pub fn dispatch_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, RecordedCall::Dispatch { .. }))
            .count()
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.contents.as_slice())
    }

    pub fn buffer_descriptor(&self, buffer: BufferHandle) -> Option<&BufferDescriptor> {
        self.buffers.get(&buffer.0).map(|b| &b.descriptor)
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    /// Texture a view was created from, if the view is still alive
    pub fn view_texture(&self, view: TextureViewHandle) -> Option<TextureHandle> {
        self.views.get(&view.0).map(|v| v.texture)
    }

    pub fn view_dimension(&self, view: TextureViewHandle) -> Option<TextureViewDimension> {
        self.views.get(&view.0).map(|v| v.dimension)
    }

    pub fn is_buffer_alive(&self, buffer: BufferHandle) -> bool {
        self.buffers.contains_key(&buffer.0)
    }

    pub fn is_texture_alive(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture.0)
    }

    pub fn is_render_pipeline_alive(&self, pipeline: RenderPipelineHandle) -> bool {
        self.render_pipelines.contains_key(&pipeline.0)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_render_pipeline_count(&self) -> usize {
        self.render_pipelines.len()
    }

    pub fn live_compute_pipeline_count(&self) -> usize {
        self.compute_pipelines.len()
    }

    pub fn live_bind_group_count(&self) -> usize {
        self.bind_groups.len()
    }

    /// Total number of live resources of every kind
    pub fn live_resource_count(&self) -> usize {
        self.buffers.len()
            + self.textures.len()
            + self.views.len()
            + self.samplers.len()
            + self.layouts.len()
            + self.bind_groups.len()
            + self.render_pipelines.len()
            + self.compute_pipelines.len()
    }

    /// Labels of all live render pipelines
    pub fn render_pipeline_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .render_pipelines
            .values()
            .map(|l| l.clone().unwrap_or_default())
            .collect();
        labels.sort();
        labels
    }

    fn check_view(&self, view: TextureViewHandle) -> bool {
        self.views.contains_key(&view.0)
            || self.current_frame.is_some_and(|frame| frame.view == view)
    }
}

impl GraphicsBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn is_texture_format_supported(&self, format: TextureFormat, _usage: TextureUsage) -> bool {
        !self.unsupported_formats.contains(&format)
    }

    fn clip_space_correction(&self) -> Mat4 {
        self.clip_correction
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.surface_size = (width, height);
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.swapchain_format
    }

    fn begin_frame(&mut self) -> BackendResult<SwapchainFrame> {
        let id = self.allocate_id();
        let frame = SwapchainFrame {
            view: TextureViewHandle(id),
            width: self.surface_size.0,
            height: self.surface_size.1,
            format: self.swapchain_format,
        };
        self.current_frame = Some(frame);
        self.record(RecordedCall::BeginFrame);
        Ok(frame)
    }

    fn current_frame(&self) -> Option<SwapchainFrame> {
        self.current_frame
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.current_frame = None;
        self.frame_index += 1;
        self.record(RecordedCall::EndFrame);
        Ok(())
    }

    fn flush(&mut self) {
        self.record(RecordedCall::Flush);
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: zero-sized buffer",
                desc.label
            )));
        }
        log::trace!("RecordingBackend: creating buffer {:?} (size: {})", desc.label, desc.size);
        let id = self.allocate_id();
        self.buffers.insert(
            id,
            RecordedBuffer {
                descriptor: desc.clone(),
                contents: vec![0; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let handle = self.create_buffer(&BufferDescriptor {
            size: desc.size.max(data.len() as u64),
            ..desc.clone()
        })?;
        if let Some(buffer) = self.buffers.get_mut(&handle.0) {
            buffer.contents[..data.len()].copy_from_slice(data);
        }
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(target) = self.buffers.get_mut(&buffer.0) else {
            log::warn!("RecordingBackend: write to dead buffer {:?}", buffer);
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > target.contents.len() {
            log::warn!(
                "RecordingBackend: write of {} bytes at {} overflows buffer {:?}",
                data.len(),
                offset,
                target.descriptor.label
            );
            return;
        }
        target.contents[start..end].copy_from_slice(data);
        self.record(RecordedCall::WriteBuffer {
            buffer,
            offset,
            size: data.len(),
        });
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        self.texture_requests += 1;
        if self.unsupported_formats.contains(&desc.format) {
            return Err(BackendError::UnsupportedFormat(desc.format));
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: zero-sized texture",
                desc.label
            )));
        }
        log::trace!(
            "RecordingBackend: creating texture {:?} ({}x{}x{})",
            desc.label,
            desc.width,
            desc.height,
            desc.array_layers
        );
        let id = self.allocate_id();
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        dimension: TextureViewDimension,
    ) -> BackendResult<TextureViewHandle> {
        let Some(desc) = self.textures.get(&texture.0) else {
            return Err(BackendError::TextureCreationFailed("Texture not found".into()));
        };
        if let TextureViewDimension::Layer(layer) = dimension {
            if layer >= desc.array_layers {
                return Err(BackendError::TextureCreationFailed(format!(
                    "Layer {} out of range ({} layers)",
                    layer, desc.array_layers
                )));
            }
        }
        let id = self.allocate_id();
        self.views.insert(id, RecordedView { texture, dimension });
        Ok(TextureViewHandle(id))
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        _data: &[u8],
        _width: u32,
        _height: u32,
    ) {
        if self.textures.contains_key(&texture.0) {
            self.record(RecordedCall::WriteTexture { texture, layer });
        }
    }

    fn create_sampler(&mut self, _desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let id = self.allocate_id();
        self.samplers.insert(id);
        Ok(SamplerHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        _label: &str,
        _entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let id = self.allocate_id();
        self.layouts.insert(id);
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        if !self.layouts.contains(&layout.0) {
            return Err(BackendError::BindGroupCreationFailed("Layout not found".into()));
        }
        for (binding, entry) in entries {
            let alive = match entry {
                BindGroupEntry::Buffer { buffer, .. } => self.buffers.contains_key(&buffer.0),
                BindGroupEntry::Texture(view) => self.check_view(*view),
                BindGroupEntry::Sampler(sampler) => self.samplers.contains(&sampler.0),
            };
            if !alive {
                return Err(BackendError::BindGroupCreationFailed(format!(
                    "Binding {} references a destroyed resource",
                    binding
                )));
            }
        }
        let id = self.allocate_id();
        self.bind_groups.insert(id, entries.to_vec());
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        if self.fail_pipelines {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{:?}: failure injected",
                desc.label
            )));
        }
        if !desc.vertex.is_valid() || desc.fragment.as_ref().is_some_and(|f| !f.is_valid()) {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{:?}: invalid shader stage",
                desc.label
            )));
        }
        if desc.bind_group_layouts.iter().any(|l| !self.layouts.contains(&l.0)) {
            return Err(BackendError::PipelineCreationFailed(
                "Bind group layout not found".into(),
            ));
        }
        let id = self.allocate_id();
        self.render_pipelines.insert(id, desc.label.clone());
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        if self.fail_pipelines || !self.capabilities.compute {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{:?}: compute unavailable",
                desc.label
            )));
        }
        if !desc.shader.is_valid() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{:?}: invalid shader stage",
                desc.label
            )));
        }
        let id = self.allocate_id();
        self.compute_pipelines.insert(id, desc.label.clone());
        Ok(ComputePipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.in_render_pass = true;
        self.record(RecordedCall::BeginRenderPass {
            label: desc.label.clone(),
            color_attachments: desc.color_attachments.iter().map(|a| a.view).collect(),
            depth_attachment: desc.depth_stencil_attachment.as_ref().map(|a| a.view),
        });
    }

    fn end_render_pass(&mut self) {
        if self.in_render_pass {
            self.in_render_pass = false;
            self.record(RecordedCall::EndRenderPass);
        }
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.in_compute_pass = true;
        self.record(RecordedCall::BeginComputePass {
            label: label.map(str::to_string),
        });
    }

    fn end_compute_pass(&mut self) {
        if self.in_compute_pass {
            self.in_compute_pass = false;
            self.record(RecordedCall::EndComputePass);
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record(RecordedCall::SetRenderPipeline(pipeline));
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.record(RecordedCall::SetComputePipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.record(RecordedCall::SetBindGroup { index, bind_group });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, _offset: u64) {
        self.record(RecordedCall::SetVertexBuffer { slot, buffer });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, _offset: u64, format: IndexFormat) {
        self.record(RecordedCall::SetIndexBuffer { buffer, format });
    }

    fn set_viewport(&mut self, _x: f32, _y: f32, width: f32, height: f32, _min_depth: f32, _max_depth: f32) {
        self.record(RecordedCall::SetViewport { width, height });
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        self.record(RecordedCall::Draw { vertices, instances });
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        _base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        self.record(RecordedCall::DrawIndexed { indices, instances });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.record(RecordedCall::Dispatch { x, y, z });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.views.remove(&view.0);
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.layouts.remove(&layout.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.render_pipelines.remove(&pipeline.0);
    }

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.compute_pipelines.remove(&pipeline.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_never_reused() {
        let mut backend = RecordingBackend::new();
        let a = backend
            .create_buffer(&BufferDescriptor::uniform("a", 16))
            .unwrap();
        backend.destroy_buffer(a);
        let b = backend
            .create_buffer(&BufferDescriptor::uniform("b", 16))
            .unwrap();
        assert_ne!(a, b);
        assert!(!backend.is_buffer_alive(a));
        assert!(backend.is_buffer_alive(b));
    }

    #[test]
    fn test_bind_group_rejects_destroyed_buffer() {
        let mut backend = RecordingBackend::new();
        let layout = backend.create_bind_group_layout("test", &[]).unwrap();
        let buffer = backend
            .create_buffer(&BufferDescriptor::uniform("ubo", 64))
            .unwrap();
        backend.destroy_buffer(buffer);
        let result = backend.create_bind_group(layout, &[(0, BindGroupEntry::buffer(buffer))]);
        assert!(result.is_err());
    }

    #[test]
    fn test_write_buffer_stores_contents() {
        let mut backend = RecordingBackend::new();
        let buffer = backend
            .create_buffer(&BufferDescriptor::uniform("ubo", 8))
            .unwrap();
        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]);
        assert_eq!(backend.buffer_contents(buffer), Some(&[0, 0, 0, 0, 1, 2, 3, 4][..]));
    }

    #[test]
    fn test_unsupported_format_fails_texture_creation() {
        let mut backend = RecordingBackend::new().without_format(TextureFormat::Rgba16Float);
        assert!(!backend.is_texture_format_supported(
            TextureFormat::Rgba16Float,
            TextureUsage::RENDER_ATTACHMENT
        ));
        let result = backend.create_texture(&TextureDescriptor {
            format: TextureFormat::Rgba16Float,
            ..Default::default()
        });
        assert!(matches!(result, Err(BackendError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_calls_in_pass_filters_by_label() {
        let mut backend = RecordingBackend::new();
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("GBuffer Pass".into()),
            color_attachments: vec![],
            depth_stencil_attachment: None,
        });
        backend.draw(0..3, 0..1);
        backend.end_render_pass();
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Post Pass".into()),
            color_attachments: vec![],
            depth_stencil_attachment: None,
        });
        backend.draw(0..3, 0..1);
        backend.draw(0..3, 0..1);
        backend.end_render_pass();

        assert_eq!(backend.draw_count_in_pass("GBuffer"), 1);
        assert_eq!(backend.draw_count_in_pass("Post"), 2);
    }
}
