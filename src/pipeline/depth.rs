//! Depth pass
//!
//! Holds the early-z slot at the front of the graph. The G-buffer pass clears
//! and writes depth itself, so this pass records nothing.

use crate::backend::GraphicsBackend;
use crate::render_graph::{FrameContext, RenderPass};
use std::any::Any;

#[derive(Debug, Default)]
pub struct DepthPass;

impl DepthPass {
    pub fn new() -> Self {
        Self
    }
}

impl RenderPass for DepthPass {
    fn name(&self) -> &str {
        "Depth Pass"
    }

    fn prepare(&mut self, _ctx: &mut FrameContext) {}

    fn execute(&mut self, _ctx: &mut FrameContext) {}

    fn release(&mut self, _backend: &mut dyn GraphicsBackend) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
