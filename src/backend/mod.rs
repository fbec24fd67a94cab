//! Backend abstraction layer
//!
//! Render passes talk to the GPU only through [`GraphicsBackend`]. The wgpu
//! backend drives real hardware; the recording backend captures calls for tests
//! and headless runs.

pub mod recording;
pub mod shader;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use recording::{RecordedCall, RecordingBackend};
pub use shader::{ShaderCode, ShaderStage, SHADER_ENTRY_POINT};
pub use traits::*;
pub use types::*;
