//! Shader stage payloads handed to the backend

use crate::backend::types::ShaderStageKind;
use std::sync::Arc;

/// Entry point every stage must expose
pub const SHADER_ENTRY_POINT: &str = "main";

/// Shader payload in one of the formats a backend can consume
#[derive(Debug, Clone, PartialEq)]
pub enum ShaderCode {
    Wgsl(String),
    SpirV(Vec<u32>),
}

/// A loaded shader stage
///
/// An invalid stage has no code; pipelines must not be built from it.
#[derive(Debug, Clone)]
pub struct ShaderStage {
    kind: ShaderStageKind,
    name: String,
    code: Option<Arc<ShaderCode>>,
}

impl ShaderStage {
    pub fn new(kind: ShaderStageKind, name: impl Into<String>, code: ShaderCode) -> Self {
        Self {
            kind,
            name: name.into(),
            code: Some(Arc::new(code)),
        }
    }

    pub fn invalid(kind: ShaderStageKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            code: None,
        }
    }

    pub fn kind(&self) -> ShaderStageKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_valid(&self) -> bool {
        self.code.is_some()
    }

    pub fn code(&self) -> Option<&ShaderCode> {
        self.code.as_deref()
    }

    pub fn entry_point(&self) -> &str {
        SHADER_ENTRY_POINT
    }
}
