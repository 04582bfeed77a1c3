use std::path::{Path, PathBuf};

use crate::{error::AssetError, scene::SceneData};

pub mod gltf_parser;
pub mod image_source;

/// Resolves asset paths against a root directory and runs the importer.
#[derive(Clone, Debug)]
pub struct AssetServer {
    root: PathBuf,
}

impl Default for AssetServer {
    fn default() -> Self {
        Self::new(".")
    }
}

impl AssetServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Blocking import. Images are decoded on the rayon pool, everything
    /// else runs on the calling thread.
    pub fn load_scene(&self, path: &Path) -> Result<SceneData, AssetError> {
        let path = self.resolve(path);
        log::info!("Loading scene {}", path.display());

        let scene = gltf_parser::parse_gltf(&path)?;

        log::info!(
            "Loaded {}: {} nodes, {} meshes, {} materials, {} textures, {} vertices, {} indices",
            path.display(),
            scene.nodes.len(),
            scene.meshes.len(),
            scene.materials.len(),
            scene.textures.len(),
            scene.vertices.len(),
            scene.indices.len()
        );
        Ok(scene)
    }
}
