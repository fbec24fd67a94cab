//! Gobo textures
//!
//! Every light index owns one layer of an RGBA8 array texture. A spot with a
//! gobo gets its image scaled into a circular aperture; every other layer is
//! black. Layers are re-uploaded only when the light's gobo path changes.

use std::path::{Path, PathBuf};

use image::{imageops, Rgba, RgbaImage};

use crate::backend::{GraphicsBackend, TextureHandle};
use crate::scene::{Light, MAX_LIGHTS};

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Directories a relative gobo path is looked up in
#[derive(Debug, Clone, Default)]
pub struct GoboSearch {
    pub current_dir: Option<PathBuf>,
    pub exe_dir: Option<PathBuf>,
}

impl GoboSearch {
    pub fn from_process() -> Self {
        Self {
            current_dir: std::env::current_dir().ok(),
            exe_dir: std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
        }
    }

    /// Local file for `path`: `file://` URLs and absolute paths as given,
    /// otherwise the first existing candidate among the working directory,
    /// the executable directory and its parent. Falls back to the working
    /// directory candidate.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        if path.is_empty() {
            return None;
        }
        if let Some(local) = path.strip_prefix("file://") {
            return Some(PathBuf::from(local));
        }
        let given = Path::new(path);
        if given.is_absolute() {
            return Some(given.to_path_buf());
        }

        let cwd_candidate = self
            .current_dir
            .as_ref()
            .map(|dir| dir.join(given))
            .unwrap_or_else(|| given.to_path_buf());
        let exe_candidates = self
            .exe_dir
            .iter()
            .flat_map(|dir| [dir.join(given), dir.join("..").join(given)]);

        std::iter::once(cwd_candidate.clone())
            .chain(exe_candidates)
            .find(|candidate| candidate.is_file())
            .or(Some(cwd_candidate))
    }
}

/// White disc on black, inset 2px from the edges
fn aperture(size: u32) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(size, size, BLACK);
    let radius = (size as f32 - 4.0).max(0.0) * 0.5;
    let center = size as f32 * 0.5;
    if radius <= 0.0 {
        return canvas;
    }
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let dx = (x as f32 + 0.5 - center) / radius;
        let dy = (y as f32 + 0.5 - center) / radius;
        if dx * dx + dy * dy <= 1.0 {
            *pixel = WHITE;
        }
    }
    canvas
}

/// Layer image for a gobo path. An empty path gives a black layer; a file
/// that cannot be decoded leaves the bare aperture.
pub fn load_gobo_image(path: &str, size: u32, search: &GoboSearch) -> RgbaImage {
    let size = size.max(1);
    let Some(resolved) = search.resolve(path) else {
        return RgbaImage::from_pixel(size, size, BLACK);
    };

    let mut canvas = aperture(size);
    let inner = size.saturating_sub(2);
    if inner == 0 {
        return canvas;
    }
    match image::open(&resolved) {
        Ok(decoded) => {
            let scaled = imageops::resize(&decoded.to_rgba8(), inner, inner, imageops::FilterType::Triangle);
            imageops::overlay(&mut canvas, &scaled, 1, 1);
        }
        Err(e) => log::warn!("Gobo: failed to load {}: {}", resolved.display(), e),
    }
    canvas
}

/// Tracks which gobo each array layer currently holds
#[derive(Debug)]
pub struct GoboLayers {
    size: u32,
    search: GoboSearch,
    /// `None` until the layer has been uploaded once
    paths: Vec<Option<String>>,
}

impl GoboLayers {
    pub fn new(size: u32, search: GoboSearch) -> Self {
        Self {
            size: size.max(1),
            search,
            paths: vec![None; MAX_LIGHTS],
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Forget uploaded content, e.g. after the texture was recreated
    pub fn invalidate(&mut self) {
        self.paths.iter_mut().for_each(|path| *path = None);
    }

    /// Upload the layers whose gobo changed. Returns the number uploaded.
    pub fn update(&mut self, backend: &mut dyn GraphicsBackend, texture: TextureHandle, lights: &[Light]) -> usize {
        let mut uploaded = 0;
        for (layer, current) in self.paths.iter_mut().enumerate() {
            let wanted = lights.get(layer).and_then(Light::gobo).unwrap_or("");
            if current.as_deref() == Some(wanted) {
                continue;
            }
            let image = load_gobo_image(wanted, self.size, &self.search);
            backend.write_texture(texture, layer as u32, image.as_raw(), self.size, self.size);
            *current = Some(wanted.to_string());
            uploaded += 1;
        }
        uploaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordingBackend, TextureDescriptor, TextureFormat, TextureUsage};
    use glam::Vec3;

    #[test]
    fn test_resolve_rules() {
        let search = GoboSearch {
            current_dir: Some(PathBuf::from("/work")),
            exe_dir: None,
        };
        assert_eq!(search.resolve(""), None);
        assert_eq!(search.resolve("file:///gobos/a.png"), Some(PathBuf::from("/gobos/a.png")));
        assert_eq!(search.resolve("/abs/b.png"), Some(PathBuf::from("/abs/b.png")));
        assert_eq!(search.resolve("rel/c.png"), Some(PathBuf::from("/work/rel/c.png")));
    }

    #[test]
    fn test_resolve_prefers_existing_exe_candidate() {
        let dir = std::env::temp_dir().join("stage_renderer_gobo_resolve");
        let exe_dir = dir.join("bin");
        std::fs::create_dir_all(&exe_dir).unwrap();
        std::fs::write(dir.join("gobo.png"), b"not really a png").unwrap();

        let search = GoboSearch {
            current_dir: Some(dir.join("nowhere")),
            exe_dir: Some(exe_dir.clone()),
        };
        assert_eq!(search.resolve("gobo.png"), Some(exe_dir.join("..").join("gobo.png")));
    }

    #[test]
    fn test_images() {
        let search = GoboSearch::default();
        let empty = load_gobo_image("", 16, &search);
        assert!(empty.pixels().all(|p| *p == BLACK));

        let missing = load_gobo_image("/definitely/missing/gobo.png", 16, &search);
        assert_eq!(*missing.get_pixel(8, 8), WHITE);
        assert_eq!(*missing.get_pixel(0, 0), BLACK);
        assert_eq!(*missing.get_pixel(1, 8), BLACK);
    }

    #[test]
    fn test_decoded_gobo_is_inset() {
        let dir = std::env::temp_dir().join("stage_renderer_gobo_decode");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("red.png");
        RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])).save(&path).unwrap();

        let image = load_gobo_image(path.to_str().unwrap(), 16, &GoboSearch::default());
        assert_eq!(*image.get_pixel(8, 8), Rgba([255, 0, 0, 255]));
        assert_eq!(*image.get_pixel(0, 0), BLACK);
    }

    #[test]
    fn test_layers_upload_only_on_change() {
        let mut backend = RecordingBackend::new();
        let texture = backend
            .create_texture(&TextureDescriptor {
                width: 8,
                height: 8,
                array_layers: MAX_LIGHTS as u32,
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
                ..Default::default()
            })
            .unwrap();
        let mut layers = GoboLayers::new(8, GoboSearch::default());
        let mut lights = vec![Light::moving_head(Vec3::ZERO, Vec3::NEG_Y, 15.0, Some("a.png".into()))];

        assert_eq!(layers.update(&mut backend, texture, &lights), MAX_LIGHTS);
        assert_eq!(layers.update(&mut backend, texture, &lights), 0);

        lights[0] = Light::moving_head(Vec3::ZERO, Vec3::NEG_Y, 15.0, Some("b.png".into()));
        lights.push(Light::point(Vec3::ZERO, 5.0));
        assert_eq!(layers.update(&mut backend, texture, &lights), 1);

        layers.invalidate();
        assert_eq!(layers.update(&mut backend, texture, &lights), MAX_LIGHTS);
    }
}
