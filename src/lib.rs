//! Stage Renderer - a render graph-based deferred renderer for stage lighting
//!
//! The renderer draws a [`Scene`] of meshes and fixture lights through a fixed
//! pass list: G-buffer, cascaded and spot light shadows, optional tiled light
//! culling, deferred lighting with gobos and haze, then bloom and composite.
//!
//! # Features
//! - Two-phase render graph (`prepare` every pass, then `execute` every pass)
//! - Backend capability queries instead of backend-specific branches
//! - Render target and shader caches keyed by size, format and generation
//! - Ray picking against mesh triangles and gizmo handles
//! - glTF model import
//!
//! GPU access goes through [`backend::GraphicsBackend`]. [`WgpuBackend`] drives
//! real hardware; [`backend::RecordingBackend`] records commands for tests and
//! headless validation.

pub mod backend;
pub mod cache;
pub mod config;
pub mod import;
pub mod picking;
pub mod pipeline;
pub mod render_graph;
pub mod renderer;
pub mod scene;

pub use backend::wgpu_backend::{SurfaceWindow, WgpuBackend};
pub use config::RendererConfig;
pub use import::{load_model, GltfImporter, ImportError, ModelImporter};
pub use picking::{pick, PickFilter, PickHit, Ray};
pub use renderer::{DeferredRenderer, FrameReport};
pub use scene::{Camera, Light, Material, Mesh, Scene};
