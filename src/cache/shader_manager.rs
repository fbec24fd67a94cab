//! Shader stage loading and validation
//!
//! Stages are looked up by name: first among sources registered in memory,
//! then as `<shader_dir>/<name>.wgsl` and `<shader_dir>/<name>.spv`. A name
//! that already carries a `.wgsl` or `.spv` extension is used as a path.
//!
//! Every stage is validated with naga and must expose a `main` entry point
//! for the requested stage. Valid stages are cached by name; failures are not,
//! so a fixed file is picked up on the next request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;

use crate::backend::{ShaderCode, ShaderStage, ShaderStageKind, SHADER_ENTRY_POINT};

const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("Failed to read shader {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unknown shader format for '{0}', expected .wgsl or .spv")]
    UnknownFormat(String),
    #[error("Invalid shader payload in '{name}': {reason}")]
    InvalidPayload { name: String, reason: String },
    #[error("Shader '{name}' has no '{entry_point}' entry point for {stage:?}")]
    MissingEntryPoint {
        name: String,
        entry_point: &'static str,
        stage: ShaderStageKind,
    },
    #[error("Shader '{name}' was registered as {registered:?} but requested as {requested:?}")]
    StageMismatch {
        name: String,
        registered: ShaderStageKind,
        requested: ShaderStageKind,
    },
}

#[derive(Debug, Clone)]
struct RegisteredStage {
    kind: ShaderStageKind,
    code: ShaderCode,
}

/// Loads, validates and caches shader stages
#[derive(Debug)]
pub struct ShaderManager {
    shader_dir: PathBuf,
    registered: RwLock<HashMap<String, RegisteredStage>>,
    cache: RwLock<HashMap<(String, ShaderStageKind), ShaderStage>>,
}

impl ShaderManager {
    pub fn new(shader_dir: impl Into<PathBuf>) -> Self {
        Self {
            shader_dir: shader_dir.into(),
            registered: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn shader_dir(&self) -> &Path {
        &self.shader_dir
    }

    /// Register an in-memory WGSL stage, replacing any earlier one of that name
    pub fn register_source(&self, name: &str, kind: ShaderStageKind, wgsl: &str) {
        self.register(name, kind, ShaderCode::Wgsl(wgsl.to_string()));
    }

    /// Register an in-memory SPIR-V stage
    pub fn register_spirv(&self, name: &str, kind: ShaderStageKind, words: Vec<u32>) {
        self.register(name, kind, ShaderCode::SpirV(words));
    }

    fn register(&self, name: &str, kind: ShaderStageKind, code: ShaderCode) {
        self.registered
            .write()
            .insert(name.to_string(), RegisteredStage { kind, code });
        self.cache.write().retain(|(cached, _), _| cached != name);
    }

    /// Load a stage, logging failures and returning an invalid stage for them
    pub fn load_stage(&self, kind: ShaderStageKind, name: &str) -> ShaderStage {
        match self.try_load_stage(kind, name) {
            Ok(stage) => stage,
            Err(e) => {
                log::warn!("ShaderManager: {}", e);
                ShaderStage::invalid(kind, name)
            }
        }
    }

    pub fn try_load_stage(&self, kind: ShaderStageKind, name: &str) -> Result<ShaderStage, ShaderError> {
        let key = (name.to_string(), kind);
        if let Some(stage) = self.cache.read().get(&key) {
            return Ok(stage.clone());
        }

        let code = self.read_code(kind, name)?;
        validate(name, kind, &code)?;
        log::debug!("ShaderManager: loaded {:?} stage '{}'", kind, name);

        let stage = ShaderStage::new(kind, name, code);
        self.cache.write().insert(key, stage.clone());
        Ok(stage)
    }

    /// Forget cached stages so the next request reads them again
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    fn read_code(&self, kind: ShaderStageKind, name: &str) -> Result<ShaderCode, ShaderError> {
        if let Some(registered) = self.registered.read().get(name) {
            if registered.kind != kind {
                return Err(ShaderError::StageMismatch {
                    name: name.to_string(),
                    registered: registered.kind,
                    requested: kind,
                });
            }
            return Ok(registered.code.clone());
        }

        let explicit = Path::new(name);
        match explicit.extension().and_then(|e| e.to_str()) {
            Some("wgsl") => return read_wgsl(&self.resolve(explicit)),
            Some("spv") => return read_spirv(name, &self.resolve(explicit)),
            Some(_) => return Err(ShaderError::UnknownFormat(name.to_string())),
            None => {}
        }

        let wgsl = self.shader_dir.join(format!("{}.wgsl", name));
        if wgsl.is_file() {
            return read_wgsl(&wgsl);
        }
        let spirv = self.shader_dir.join(format!("{}.spv", name));
        if spirv.is_file() {
            return read_spirv(name, &spirv);
        }
        Err(ShaderError::Io {
            path: wgsl,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no .wgsl or .spv stage"),
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.shader_dir.join(path)
        }
    }
}

fn read_wgsl(path: &Path) -> Result<ShaderCode, ShaderError> {
    let source = std::fs::read_to_string(path).map_err(|source| ShaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(ShaderCode::Wgsl(source))
}

fn read_spirv(name: &str, path: &Path) -> Result<ShaderCode, ShaderError> {
    let bytes = std::fs::read(path).map_err(|source| ShaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(ShaderError::InvalidPayload {
            name: name.to_string(),
            reason: format!("{} bytes is not a whole number of SPIR-V words", bytes.len()),
        });
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    Ok(ShaderCode::SpirV(words))
}

fn naga_stage(kind: ShaderStageKind) -> naga::ShaderStage {
    match kind {
        ShaderStageKind::Vertex => naga::ShaderStage::Vertex,
        ShaderStageKind::Fragment => naga::ShaderStage::Fragment,
        ShaderStageKind::Compute => naga::ShaderStage::Compute,
    }
}

/// Parse and validate `code`, then check for the entry point
pub fn validate(name: &str, kind: ShaderStageKind, code: &ShaderCode) -> Result<(), ShaderError> {
    let invalid = |reason: String| ShaderError::InvalidPayload {
        name: name.to_string(),
        reason,
    };

    let module = match code {
        ShaderCode::Wgsl(source) => naga::front::wgsl::parse_str(source)
            .map_err(|e| invalid(format!("WGSL parse error: {}", e.emit_to_string(source))))?,
        ShaderCode::SpirV(words) => {
            if words.first() != Some(&SPIRV_MAGIC) {
                return Err(invalid("missing SPIR-V magic number".into()));
            }
            naga::front::spv::parse_u8_slice(
                bytemuck::cast_slice(words),
                &naga::front::spv::Options::default(),
            )
            .map_err(|e| invalid(format!("SPIR-V parse error: {}", e)))?
        }
    };

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|e| invalid(format!("Validation error: {}", e)))?;

    let stage = naga_stage(kind);
    if !module
        .entry_points
        .iter()
        .any(|ep| ep.name == SHADER_ENTRY_POINT && ep.stage == stage)
    {
        return Err(ShaderError::MissingEntryPoint {
            name: name.to_string(),
            entry_point: SHADER_ENTRY_POINT,
            stage: kind,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = "@vertex fn main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }";
    const FRAGMENT: &str = "@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("stage-renderer-shaders-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_registered_stage_loads_and_caches() {
        let shaders = ShaderManager::new("missing");
        shaders.register_source("fullscreen_vs", ShaderStageKind::Vertex, VERTEX);
        let stage = shaders.load_stage(ShaderStageKind::Vertex, "fullscreen_vs");
        assert!(stage.is_valid());
        assert_eq!(shaders.cached_count(), 1);
    }

    #[test]
    fn test_wrong_stage_kind() {
        let shaders = ShaderManager::new("missing");
        shaders.register_source("lighting_fs", ShaderStageKind::Fragment, FRAGMENT);
        assert!(matches!(
            shaders.try_load_stage(ShaderStageKind::Vertex, "lighting_fs"),
            Err(ShaderError::StageMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_entry_point() {
        let shaders = ShaderManager::new("missing");
        let source = "@fragment fn shade() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";
        shaders.register_source("odd_fs", ShaderStageKind::Fragment, source);
        assert!(matches!(
            shaders.try_load_stage(ShaderStageKind::Fragment, "odd_fs"),
            Err(ShaderError::MissingEntryPoint { .. })
        ));
    }

    #[test]
    fn test_invalid_wgsl_returns_invalid_stage() {
        let shaders = ShaderManager::new("missing");
        shaders.register_source("broken_fs", ShaderStageKind::Fragment, "fn main( {");
        let stage = shaders.load_stage(ShaderStageKind::Fragment, "broken_fs");
        assert!(!stage.is_valid());
        assert_eq!(shaders.cached_count(), 0);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let shaders = ShaderManager::new("definitely/not/here");
        assert!(matches!(
            shaders.try_load_stage(ShaderStageKind::Vertex, "gbuffer_vs"),
            Err(ShaderError::Io { .. })
        ));
        assert!(matches!(
            shaders.try_load_stage(ShaderStageKind::Vertex, "gbuffer.glsl"),
            Err(ShaderError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_file_fixed_after_failure_is_picked_up() {
        let dir = temp_dir("fixup");
        let path = dir.join("post_fs.wgsl");
        std::fs::write(&path, "not wgsl").unwrap();
        let shaders = ShaderManager::new(&dir);
        assert!(!shaders.load_stage(ShaderStageKind::Fragment, "post_fs").is_valid());

        std::fs::write(&path, FRAGMENT).unwrap();
        assert!(shaders.load_stage(ShaderStageKind::Fragment, "post_fs").is_valid());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_spirv_without_magic_is_rejected() {
        let dir = temp_dir("spirv");
        std::fs::write(dir.join("bad.spv"), [1u8, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        std::fs::write(dir.join("odd.spv"), [1u8, 2, 3]).unwrap();
        let shaders = ShaderManager::new(&dir);
        assert!(matches!(
            shaders.try_load_stage(ShaderStageKind::Vertex, "bad"),
            Err(ShaderError::InvalidPayload { .. })
        ));
        assert!(matches!(
            shaders.try_load_stage(ShaderStageKind::Vertex, "odd.spv"),
            Err(ShaderError::InvalidPayload { .. })
        ));
        std::fs::remove_dir_all(&dir).ok();
    }
}
