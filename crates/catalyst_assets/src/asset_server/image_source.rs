use std::path::{Path, PathBuf};

use base64::Engine;

use crate::error::AssetError;

/// Where an image's encoded bytes live. Each arm decodes to the same
/// RGBA8 buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageSource {
    File(PathBuf),
    Embedded(Vec<u8>),
    BufferView {
        buffer: usize,
        offset: usize,
        length: usize,
    },
}

impl ImageSource {
    pub fn from_gltf(source: gltf::image::Source<'_>, base: &Path) -> Result<Self, AssetError> {
        match source {
            gltf::image::Source::View { view, .. } => Ok(ImageSource::BufferView {
                buffer: view.buffer().index(),
                offset: view.offset(),
                length: view.length(),
            }),
            gltf::image::Source::Uri { uri, .. } => {
                if uri.starts_with("data:") {
                    Ok(ImageSource::Embedded(decode_data_uri(uri)?))
                } else {
                    Ok(ImageSource::File(base.join(uri)))
                }
            }
        }
    }

    pub fn decode(&self, buffers: &[Vec<u8>]) -> Result<image::RgbaImage, AssetError> {
        let image = match self {
            ImageSource::File(path) => image::open(path)?,
            ImageSource::Embedded(bytes) => image::load_from_memory(bytes)?,
            ImageSource::BufferView {
                buffer,
                offset,
                length,
            } => {
                let end = offset + length;
                let bytes = buffers
                    .get(*buffer)
                    .and_then(|data| data.get(*offset..end))
                    .ok_or(AssetError::ViewOutOfRange {
                        buffer: *buffer,
                        offset: *offset,
                        end,
                    })?;
                image::load_from_memory(bytes)?
            }
        };
        Ok(image.to_rgba8())
    }
}

/// Accepts any `data:<mime>;base64,<payload>` URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, AssetError> {
    let payload = uri
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .map(|(_, payload)| payload)
        .ok_or_else(|| AssetError::DataUri(uri.chars().take(48).collect()))?;

    Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
}
