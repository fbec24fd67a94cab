//! Renderer configuration
//!
//! Values start from [`RendererConfig::default`] and can be overridden by
//! `STAGE_RENDERER_*` environment variables, read once when the renderer is
//! initialized.

use std::path::PathBuf;
use thiserror::Error;

/// Upper bound on spot lights that can own a shadow slot
pub const MAX_SPOT_SHADOWS: usize = 32;

pub const ENV_SHADER_DIR: &str = "STAGE_RENDERER_SHADER_DIR";
pub const ENV_SKIP_LIGHTING: &str = "STAGE_RENDERER_SKIP_LIGHTING";
pub const ENV_DEBUG_GBUFFER: &str = "STAGE_RENDERER_DEBUG_GBUFFER";
pub const ENV_DISABLE_LIGHT_CULLING: &str = "STAGE_RENDERER_DISABLE_LIGHT_CULLING";
pub const ENV_SHADOW_MAP_SIZE: &str = "STAGE_RENDERER_SHADOW_MAP_SIZE";
pub const ENV_BACKEND: &str = "STAGE_RENDERER_BACKEND";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Failed to parse {variable}: '{value}' is not a number")]
    InvalidNumber { variable: String, value: String },
    #[error("{variable} must be greater than zero")]
    Zero { variable: String },
}

/// Configuration for the deferred renderer
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Directory containing shader stages (`<name>.wgsl` or `<name>.spv`)
    pub shader_dir: PathBuf,
    /// Resolution of each directional shadow cascade
    pub shadow_map_size: u32,
    /// Resolution of each spot light shadow map
    pub spot_shadow_map_size: u32,
    /// Spot shadow slots to allocate (at most [`MAX_SPOT_SHADOWS`])
    pub max_spot_shadows: usize,
    /// Light culling tile size in pixels
    pub tile_size: u32,
    /// Gobo texture resolution
    pub gobo_size: u32,
    /// Leave the lighting pass out of the graph
    pub skip_lighting: bool,
    /// Show the G-buffer base colour instead of lit output
    pub debug_gbuffer_passthrough: bool,
    /// Allow tiled light culling where the backend supports it
    pub light_culling: bool,
    /// Preferred GPU API (`vulkan`, `metal`, `dx12`, `gl`)
    pub backend: Option<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            shadow_map_size: 2048,
            spot_shadow_map_size: 512,
            max_spot_shadows: 8,
            tile_size: 16,
            gobo_size: 256,
            skip_lighting: false,
            debug_gbuffer_passthrough: false,
            light_culling: true,
            backend: None,
        }
    }
}

impl RendererConfig {
    /// Defaults overlaid with the process environment
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values from `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self::default().with_overrides(lookup)
    }

    /// Apply `STAGE_RENDERER_*` overrides. Boolean switches are enabled by presence.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(ENV_SHADER_DIR).filter(|d| !d.trim().is_empty()) {
            self.shader_dir = PathBuf::from(dir);
        }
        if lookup(ENV_SKIP_LIGHTING).is_some() {
            self.skip_lighting = true;
        }
        if lookup(ENV_DEBUG_GBUFFER).is_some() {
            self.debug_gbuffer_passthrough = true;
        }
        if lookup(ENV_DISABLE_LIGHT_CULLING).is_some() {
            self.light_culling = false;
        }
        if let Some(value) = lookup(ENV_SHADOW_MAP_SIZE) {
            match parse_size(ENV_SHADOW_MAP_SIZE, &value) {
                Ok(size) => self.shadow_map_size = size,
                Err(e) => log::warn!("Config: {}, keeping {}", e, self.shadow_map_size),
            }
        }
        if let Some(backend) = lookup(ENV_BACKEND).filter(|b| !b.trim().is_empty()) {
            self.backend = Some(backend.trim().to_ascii_lowercase());
        }
        self
    }

    /// Spot shadow slot count after clamping to [`MAX_SPOT_SHADOWS`]
    pub fn spot_shadow_slots(&self) -> usize {
        self.max_spot_shadows.min(MAX_SPOT_SHADOWS)
    }
}

fn parse_size(variable: &str, value: &str) -> Result<u32, ConfigError> {
    let size: u32 = value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        variable: variable.to_string(),
        value: value.to_string(),
    })?;
    if size == 0 {
        return Err(ConfigError::Zero {
            variable: variable.to_string(),
        });
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = RendererConfig::from_lookup(|_| None);
        assert_eq!(config, RendererConfig::default());
        assert_eq!(config.shadow_map_size, 2048);
        assert_eq!(config.spot_shadow_slots(), 8);
    }

    #[test]
    fn test_presence_enables_switches() {
        let config = RendererConfig::from_lookup(lookup_from(&[
            (ENV_SKIP_LIGHTING, ""),
            (ENV_DEBUG_GBUFFER, "0"),
            (ENV_DISABLE_LIGHT_CULLING, "1"),
        ]));
        assert!(config.skip_lighting);
        assert!(config.debug_gbuffer_passthrough);
        assert!(!config.light_culling);
    }

    #[test]
    fn test_malformed_shadow_size_is_ignored() {
        let config = RendererConfig::from_lookup(lookup_from(&[(ENV_SHADOW_MAP_SIZE, "huge")]));
        assert_eq!(config.shadow_map_size, 2048);

        let config = RendererConfig::from_lookup(lookup_from(&[(ENV_SHADOW_MAP_SIZE, "0")]));
        assert_eq!(config.shadow_map_size, 2048);

        let config = RendererConfig::from_lookup(lookup_from(&[(ENV_SHADOW_MAP_SIZE, " 1024 ")]));
        assert_eq!(config.shadow_map_size, 1024);
    }

    #[test]
    fn test_shader_dir_and_backend_overrides() {
        let config = RendererConfig::from_lookup(lookup_from(&[
            (ENV_SHADER_DIR, "/opt/shaders"),
            (ENV_BACKEND, " Vulkan "),
        ]));
        assert_eq!(config.shader_dir, PathBuf::from("/opt/shaders"));
        assert_eq!(config.backend.as_deref(), Some("vulkan"));
    }

    #[test]
    fn test_spot_shadow_slots_are_clamped() {
        let config = RendererConfig {
            max_spot_shadows: 100,
            ..Default::default()
        };
        assert_eq!(config.spot_shadow_slots(), MAX_SPOT_SHADOWS);
    }

    #[test]
    fn test_parse_size_errors() {
        assert_eq!(
            parse_size("X", "abc"),
            Err(ConfigError::InvalidNumber {
                variable: "X".into(),
                value: "abc".into()
            })
        );
        assert_eq!(parse_size("X", "0"), Err(ConfigError::Zero { variable: "X".into() }));
    }
}
