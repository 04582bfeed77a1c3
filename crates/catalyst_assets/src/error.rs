use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to open {path}: {source}")]
    Gltf {
        path: PathBuf,
        #[source]
        source: gltf::Error,
    },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("buffer {index} is unavailable: {reason}")]
    Buffer { index: usize, reason: String },
    #[error("unsupported data uri: {0}")]
    DataUri(String),
    #[error("image references bytes {offset}..{end} outside buffer {buffer}")]
    ViewOutOfRange {
        buffer: usize,
        offset: usize,
        end: usize,
    },
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}
