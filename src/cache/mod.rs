//! GPU resource caches shared by the render passes

mod render_targets;
mod shader_manager;

pub use render_targets::*;
pub use shader_manager::*;
