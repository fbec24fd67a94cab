//! Material definitions

use glam::Vec3;

/// How the alpha channel of a material is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    Mask,
    /// Skipped by the deferred geometry pass
    Blend,
}

/// Metal/roughness material, consumed through per-mesh uniform data
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub base_color: Vec3,
    pub alpha: f32,
    pub metalness: f32,
    pub roughness: f32,
    /// Ambient occlusion factor
    pub occlusion: f32,
    pub emissive: Vec3,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec3::ONE,
            alpha: 1.0,
            metalness: 0.0,
            roughness: 0.5,
            occlusion: 1.0,
            emissive: Vec3::ZERO,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
        }
    }
}

impl Material {
    pub fn with_base_color(mut self, color: Vec3) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_metalness(mut self, metalness: f32) -> Self {
        self.metalness = metalness.clamp(0.0, 1.0);
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness.clamp(0.0, 1.0);
        self
    }

    pub fn with_occlusion(mut self, occlusion: f32) -> Self {
        self.occlusion = occlusion.clamp(0.0, 1.0);
        self
    }

    pub fn with_emissive(mut self, emissive: Vec3) -> Self {
        self.emissive = emissive;
        self
    }

    pub fn with_alpha(mut self, alpha: f32, mode: AlphaMode) -> Self {
        self.alpha = alpha;
        self.alpha_mode = mode;
        self
    }

    /// Whether the deferred path can draw this material
    pub fn is_opaque(&self) -> bool {
        self.alpha_mode != AlphaMode::Blend
    }

    // Preset materials

    pub fn plastic(color: Vec3) -> Self {
        Self::default().with_base_color(color).with_roughness(0.4)
    }

    pub fn metal(color: Vec3, roughness: f32) -> Self {
        Self::default()
            .with_base_color(color)
            .with_metalness(1.0)
            .with_roughness(roughness)
    }

    pub fn matte(color: Vec3) -> Self {
        Self::default().with_base_color(color).with_roughness(0.9)
    }

    pub fn emissive(color: Vec3) -> Self {
        Self::default().with_base_color(Vec3::ZERO).with_emissive(color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let m = Material::default();
        assert_eq!(m.base_color, Vec3::ONE);
        assert_eq!(m.roughness, 0.5);
        assert_eq!(m.occlusion, 1.0);
        assert_eq!(m.alpha_cutoff, 0.5);
        assert!(m.is_opaque());
    }

    #[test]
    fn test_blend_is_not_opaque() {
        let m = Material::default().with_alpha(0.3, AlphaMode::Blend);
        assert!(!m.is_opaque());
        assert!(Material::default().with_alpha(0.3, AlphaMode::Mask).is_opaque());
    }

    #[test]
    fn test_builders_clamp() {
        let m = Material::metal(Vec3::ONE, 3.0);
        assert_eq!(m.metalness, 1.0);
        assert_eq!(m.roughness, 1.0);
    }
}
