//! Render pass definitions for the render graph

use crate::backend::GraphicsBackend;
use crate::render_graph::frame::FrameContext;
use std::any::Any;

/// Trait for render passes
///
/// Passes never return errors. A pass that cannot run (missing scene, failed
/// pipeline, unsupported feature) logs and leaves its `execute` as a no-op.
pub trait RenderPass {
    /// Get the pass name for debugging
    fn name(&self) -> &str;

    /// Create or validate GPU resources. Runs for every pass before any
    /// pass executes.
    fn prepare(&mut self, ctx: &mut FrameContext);

    /// Record GPU commands
    fn execute(&mut self, ctx: &mut FrameContext);

    /// Destroy every GPU resource owned by this pass
    fn release(&mut self, backend: &mut dyn GraphicsBackend);

    /// Allow downcasting
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
