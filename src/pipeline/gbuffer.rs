//! G-Buffer generation pass for deferred rendering
//!
//! Renders opaque geometry to multiple render targets (MRT):
//! - base colour + metalness
//! - world-space normal + roughness
//! - emissive + occlusion
//! - depth
//!
//! Group 0 holds the camera uniform, group 1 the per-mesh uniform block.

use crate::backend::*;
use crate::cache::GBufferTargets;
use crate::pipeline::{create_uniform, draw_mesh, load_stages, sync_meshes, OwnedResources};
use crate::render_graph::{FrameContext, RenderPass};
use crate::scene::{Mesh, MeshBindingSlot, ViewUniformData};
use std::any::Any;

pub const GBUFFER_VS: &str = "gbuffer_vs";
pub const GBUFFER_FS: &str = "gbuffer_fs";

/// Everything the pipelines depend on besides the target size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PipelineKey {
    color_format: TextureFormat,
    depth_format: TextureFormat,
    sample_count: u32,
    reverse_z: bool,
}

#[derive(Debug, Clone, Copy)]
struct GBufferPipelines {
    culled: RenderPipelineHandle,
    double_sided: RenderPipelineHandle,
    camera_buffer: BufferHandle,
    camera_group: BindGroupHandle,
    mesh_layout: BindGroupLayoutHandle,
}

/// G-Buffer generation pass for deferred rendering
#[derive(Debug, Default)]
pub struct GBufferPass {
    owned: OwnedResources,
    pipelines: Option<GBufferPipelines>,
    key: Option<PipelineKey>,
    /// Key whose pipeline creation failed; not retried until inputs change
    failed: Option<PipelineKey>,
    targets: Option<GBufferTargets>,
}

impl GBufferPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets acquired during the last `prepare`
    pub fn targets(&self) -> Option<GBufferTargets> {
        self.targets
    }

    pub fn is_ready(&self) -> bool {
        self.pipelines.is_some() && self.targets.is_some()
    }

    /// Meshes drawn into the G-buffer
    pub fn draws_mesh(mesh: &Mesh) -> bool {
        mesh.visible && !mesh.is_gizmo() && mesh.material.is_opaque() && mesh.gpu.has_geometry()
    }

    fn ensure_pipelines(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        shaders: &crate::cache::ShaderManager,
        key: PipelineKey,
    ) {
        if self.pipelines.is_some() && self.key == Some(key) {
            return;
        }
        if self.failed == Some(key) {
            return;
        }

        self.owned.release(backend);
        self.pipelines = None;
        self.key = None;

        log::debug!("G-Buffer pass: building pipelines for {:?}", key);
        match self.create_pipelines(backend, shaders, key) {
            Ok(Some(pipelines)) => {
                self.pipelines = Some(pipelines);
                self.key = Some(key);
                self.failed = None;
            }
            Ok(None) => {
                log::warn!("G-Buffer pass: shader stages unavailable, pass disabled");
                self.owned.release(backend);
                self.failed = Some(key);
            }
            Err(e) => {
                log::warn!("G-Buffer pass: failed to create pipeline: {}", e);
                self.owned.release(backend);
                self.failed = Some(key);
            }
        }
    }

    fn create_pipelines(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        shaders: &crate::cache::ShaderManager,
        key: PipelineKey,
    ) -> BackendResult<Option<GBufferPipelines>> {
        let Some((vs, fs)) = load_stages(shaders, GBUFFER_VS, GBUFFER_FS) else {
            return Ok(None);
        };

        let camera_layout = self.owned.layout(backend.create_bind_group_layout(
            "gbuffer camera",
            &[BindGroupLayoutEntry::new(
                0,
                ShaderStageFlags::VERTEX_FRAGMENT,
                BindingType::UniformBuffer,
            )],
        )?);
        let mesh_layout = self.owned.layout(backend.create_bind_group_layout(
            "gbuffer mesh",
            &[BindGroupLayoutEntry::new(
                0,
                ShaderStageFlags::VERTEX_FRAGMENT,
                BindingType::UniformBuffer,
            )],
        )?);

        let camera_buffer = create_uniform::<ViewUniformData>(backend, &mut self.owned, "gbuffer camera")?;
        let camera_group = self.owned.bind_group(
            backend.create_bind_group(camera_layout, &[(0, BindGroupEntry::buffer(camera_buffer))])?,
        );

        let reverse_z = key.reverse_z;
        let descriptor = |label: &str, cull_mode: CullMode| RenderPipelineDescriptor {
            label: Some(label.to_string()),
            vertex: vs.clone(),
            fragment: Some(fs.clone()),
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: vec![camera_layout, mesh_layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode,
            depth_stencil: Some(DepthStencilState {
                format: key.depth_format,
                depth_write_enabled: true,
                depth_compare: if reverse_z {
                    CompareFunction::GreaterEqual
                } else {
                    CompareFunction::LessEqual
                },
            }),
            color_targets: vec![ColorTargetState::opaque(key.color_format); 3],
            sample_count: key.sample_count,
        };

        let culled = self
            .owned
            .render_pipeline(backend.create_render_pipeline(&descriptor("gbuffer", CullMode::Back))?);
        let double_sided = self.owned.render_pipeline(
            backend.create_render_pipeline(&descriptor("gbuffer double-sided", CullMode::None))?,
        );

        Ok(Some(GBufferPipelines {
            culled,
            double_sided,
            camera_buffer,
            camera_group,
            mesh_layout,
        }))
    }
}

impl RenderPass for GBufferPass {
    fn name(&self) -> &str {
        "G-Buffer Pass"
    }

    fn prepare(&mut self, ctx: &mut FrameContext) {
        self.targets = None;
        let Some(size) = ctx.target_size() else {
            return;
        };
        let Some(backend) = ctx.backend.as_deref_mut() else {
            return;
        };

        self.targets = ctx.targets.get_or_create_gbuffer(backend, size, 1);
        let Some(targets) = self.targets else {
            log::debug!("G-Buffer pass: no G-buffer targets");
            return;
        };

        let key = PipelineKey {
            color_format: targets.color_format,
            depth_format: targets.depth_format,
            sample_count: targets.sample_count,
            reverse_z: backend.clip_space().reverse_z(),
        };
        self.ensure_pipelines(backend, ctx.shaders, key);

        let (Some(pipelines), Some(scene)) = (self.pipelines, ctx.scene.as_deref_mut()) else {
            return;
        };
        sync_meshes(backend, scene);
        for mesh in scene.meshes_mut() {
            if Self::draws_mesh(mesh) {
                mesh.gpu
                    .bind_group(backend, MeshBindingSlot::GBuffer, pipelines.mesh_layout);
            }
        }
    }

    fn execute(&mut self, ctx: &mut FrameContext) {
        let (Some(pipelines), Some(targets)) = (self.pipelines, self.targets) else {
            return;
        };
        let (Some(backend), Some(scene)) = (ctx.backend.as_deref_mut(), ctx.scene.as_deref_mut())
        else {
            return;
        };

        let clip = backend.clip_space();
        let camera = ViewUniformData::new(&scene.camera, &clip);
        backend.write_buffer(pipelines.camera_buffer, 0, bytemuck::bytes_of(&camera));

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("G-Buffer Pass".into()),
            color_attachments: targets
                .color
                .iter()
                .map(|target| ColorAttachment::clear(target.view, [0.0; 4]))
                .collect(),
            depth_stencil_attachment: Some(DepthStencilAttachment::clear(
                targets.depth.view,
                clip.far_depth(),
            )),
        });
        backend.set_viewport(0.0, 0.0, targets.width as f32, targets.height as f32, 0.0, 1.0);

        let mut current = None;
        for mesh in scene.meshes_mut() {
            if !Self::draws_mesh(mesh) {
                continue;
            }
            let Some(group) = mesh
                .gpu
                .bind_group(backend, MeshBindingSlot::GBuffer, pipelines.mesh_layout)
            else {
                continue;
            };
            let pipeline = if mesh.material.double_sided {
                pipelines.double_sided
            } else {
                pipelines.culled
            };
            if current != Some(pipeline) {
                backend.set_render_pipeline(pipeline);
                backend.set_bind_group(0, pipelines.camera_group);
                current = Some(pipeline);
            }
            draw_mesh(backend, &mesh.gpu, 1, group);
        }

        backend.end_render_pass();
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.owned.release(backend);
        self.pipelines = None;
        self.key = None;
        self.failed = None;
        self.targets = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
