//! Model import into a [`Scene`]
//!
//! Importers bake node transforms into vertex data, so every imported mesh
//! starts with an identity model matrix and tight local bounds.

mod gltf_loader;

pub use gltf_loader::GltfImporter;

use std::path::Path;
use thiserror::Error;

use crate::scene::Scene;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("glTF error: {0}")]
    Gltf(#[from] gltf::Error),
    #[error("{0} contains no meshes")]
    EmptyScene(String),
    #[error("Unsupported model format: {0}")]
    UnsupportedFormat(String),
}

/// Loads model files into a scene
pub trait ModelImporter {
    /// Add the meshes in `path` to `scene`, replacing the existing ones
    /// unless `append` is set. Returns the number of meshes added.
    fn load(&self, path: &Path, scene: &mut Scene, append: bool) -> Result<usize, ImportError>;

    /// Whether this importer understands `path`, judged by extension
    fn supports(&self, path: &Path) -> bool;
}

/// Importer for `path` among the built-in formats
pub fn importer_for(path: &Path) -> Result<Box<dyn ModelImporter>, ImportError> {
    let importer = GltfImporter::new();
    if importer.supports(path) {
        return Ok(Box::new(importer));
    }
    Err(ImportError::UnsupportedFormat(path.display().to_string()))
}

/// Load `path` with the matching built-in importer
pub fn load_model(path: &Path, scene: &mut Scene, append: bool) -> Result<usize, ImportError> {
    let importer = importer_for(path)?;
    let added = importer.load(path, scene, append)?;
    log::info!("Import: loaded {} meshes from {}", added, path.display());
    Ok(added)
}

/// Strip a `file://` prefix the way hosts hand paths over
pub fn local_path(path: &str) -> &Path {
    Path::new(path.strip_prefix("file://").unwrap_or(path))
}
