// SPDX-License-Identifier: CEPL-1.0
//! On-disk assets: textures, SPIR-V blobs and sprite sheets under one root.
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod image_data;
pub mod sprite;

pub use image_data::DecodedImage;
pub use sprite::{BoundingInfo, RectInfo, RectVertices, SpriteGroup, SpriteSheet};

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("{what} at offset {offset} needs {need} bytes, blob has {len}")]
    Truncated {
        what: &'static str,
        offset: usize,
        need: usize,
        len: usize,
    },
    #[error("group {group} spans frames {start}..{end} but the sheet has {frames}")]
    FrameRange {
        group: usize,
        start: usize,
        end: usize,
        frames: usize,
    },
    #[error("rect {rect} refers to group {group_index}, the sheet has {groups}")]
    GroupIndex {
        rect: usize,
        group_index: u16,
        groups: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn extension(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
        }
    }
}

/// Directory layout: `textures/`, `shaders/<name>.<stage>.spv`, `sprites/`.
#[derive(Clone, Debug)]
pub struct AssetRoot {
    dir: PathBuf,
}

impl AssetRoot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn texture_path(&self, file: &str) -> PathBuf {
        self.dir.join("textures").join(file)
    }

    pub fn shader_path(&self, name: &str, stage: ShaderStage) -> PathBuf {
        self.dir
            .join("shaders")
            .join(format!("{name}.{}.spv", stage.extension()))
    }

    pub fn sprite_path(&self, file: &str) -> PathBuf {
        self.dir.join("sprites").join(file)
    }

    /// Raw bytes, or `None` when the file does not exist.
    pub fn read_optional(&self, path: &Path) -> Result<Option<Vec<u8>>, AssetError> {
        match std::fs::read(path) {
            Ok(bytes) => {
                tracing::debug!("loaded {} ({} bytes)", path.display(), bytes.len());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(AssetError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>, AssetError> {
        std::fs::read(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_convention() {
        let root = AssetRoot::new("ass");
        assert_eq!(
            root.shader_path("sprite", ShaderStage::Fragment),
            Path::new("ass/shaders/sprite.frag.spv")
        );
        assert_eq!(
            root.texture_path("test.png"),
            Path::new("ass/textures/test.png")
        );
        assert_eq!(
            root.sprite_path("walk.sprite"),
            Path::new("ass/sprites/walk.sprite")
        );
    }

    #[test]
    fn missing_optional_file_is_none() {
        let root = AssetRoot::new(std::env::temp_dir().join("threed-assets-none"));
        let p = root.texture_path("nope.png");
        assert!(root.read_optional(&p).unwrap().is_none());
        assert!(matches!(root.read(&p), Err(AssetError::Io { .. })));
    }
}
