//! Render graph definition and execution

use crate::backend::GraphicsBackend;
use crate::render_graph::frame::FrameContext;
use crate::render_graph::pass::RenderPass;

/// Ordered list of passes run with a two-phase protocol
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderPass>>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Append a pass. Passes run in insertion order.
    pub fn add_pass<P: RenderPass + 'static>(&mut self, pass: P) {
        log::debug!("RenderGraph: added {}", pass.name());
        self.passes.push(Box::new(pass));
    }

    /// Run one frame: `prepare` on every pass, then `execute` on every pass.
    ///
    /// Returns `false` without touching any pass when the context has no
    /// backend.
    pub fn run(&mut self, ctx: &mut FrameContext) -> bool {
        if ctx.backend.is_none() {
            log::warn!("RenderGraph: frame context has no GPU backend, skipping frame");
            return false;
        }

        for pass in self.passes.iter_mut() {
            log::trace!("RenderGraph: prepare {}", pass.name());
            pass.prepare(ctx);
        }
        for pass in self.passes.iter_mut() {
            log::trace!("RenderGraph: execute {}", pass.name());
            pass.execute(ctx);
        }
        true
    }

    /// Release the GPU resources of every pass
    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        for pass in self.passes.iter_mut() {
            pass.release(backend);
        }
    }

    /// Release every pass and empty the graph
    pub fn clear(&mut self, backend: &mut dyn GraphicsBackend) {
        self.release(backend);
        self.passes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Get all passes
    pub fn passes(&self) -> &[Box<dyn RenderPass>] {
        &self.passes
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// First pass of concrete type `P`
    pub fn find_pass<P: RenderPass + 'static>(&self) -> Option<&P> {
        self.passes.iter().find_map(|p| p.as_any().downcast_ref::<P>())
    }

    pub fn find_pass_mut<P: RenderPass + 'static>(&mut self) -> Option<&mut P> {
        self.passes
            .iter_mut()
            .find_map(|p| p.as_any_mut().downcast_mut::<P>())
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::cache::{RenderTargetCache, ShaderManager};
    use crate::config::RendererConfig;
    use crate::render_graph::{LightCullingData, ShadowData};
    use crate::scene::Scene;
    use std::any::Any;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct TracePass {
        name: String,
        trace: Rc<RefCell<Vec<String>>>,
    }

    impl RenderPass for TracePass {
        fn name(&self) -> &str {
            &self.name
        }

        fn prepare(&mut self, _ctx: &mut FrameContext) {
            self.trace.borrow_mut().push(format!("prepare {}", self.name));
        }

        fn execute(&mut self, _ctx: &mut FrameContext) {
            self.trace.borrow_mut().push(format!("execute {}", self.name));
        }

        fn release(&mut self, _backend: &mut dyn GraphicsBackend) {
            self.trace.borrow_mut().push(format!("release {}", self.name));
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn graph_with(trace: &Rc<RefCell<Vec<String>>>) -> RenderGraph {
        let mut graph = RenderGraph::new();
        for name in ["a", "b"] {
            graph.add_pass(TracePass {
                name: name.to_string(),
                trace: trace.clone(),
            });
        }
        graph
    }

    #[test]
    fn test_prepare_all_then_execute_all() {
        let trace = Rc::new(RefCell::new(Vec::new()));
        let mut graph = graph_with(&trace);

        let mut backend = RecordingBackend::new();
        let mut targets = RenderTargetCache::new();
        let shaders = ShaderManager::new("shaders");
        let mut scene = Scene::new();
        let config = RendererConfig::default();
        let mut ctx = FrameContext::new(&mut backend, &mut targets, &shaders, &mut scene, &config);

        assert!(graph.run(&mut ctx));
        assert_eq!(
            *trace.borrow(),
            vec!["prepare a", "prepare b", "execute a", "execute b"]
        );
        assert_eq!(graph.pass_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_missing_backend_aborts_frame() {
        let trace = Rc::new(RefCell::new(Vec::new()));
        let mut graph = graph_with(&trace);

        let mut targets = RenderTargetCache::new();
        let shaders = ShaderManager::new("shaders");
        let config = RendererConfig::default();
        let mut ctx = FrameContext {
            backend: None,
            targets: &mut targets,
            shaders: &shaders,
            scene: None,
            config: &config,
            shadows: ShadowData::default(),
            light_culling: LightCullingData::default(),
            lighting_enabled: true,
        };

        assert!(!graph.run(&mut ctx));
        assert!(trace.borrow().is_empty());
    }

    #[test]
    fn test_find_pass_and_clear() {
        let trace = Rc::new(RefCell::new(Vec::new()));
        let mut graph = graph_with(&trace);
        assert_eq!(graph.find_pass::<TracePass>().map(|p| p.name()), Some("a"));

        let mut backend = RecordingBackend::new();
        graph.clear(&mut backend);
        assert!(graph.is_empty());
        assert_eq!(*trace.borrow(), vec!["release a", "release b"]);
    }
}
