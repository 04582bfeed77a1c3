#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8Unorm,     // Standard 32-bit color (0-255)
    Rgba8UnormSrgb, // Color data authored in sRGB (base color maps)
}

/// Decoded image, always normalized to tightly packed RGBA8.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub name: String,
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureData {
    pub fn solid(name: &str, rgba: [u8; 4]) -> Self {
        Self {
            name: name.to_string(),
            pixels: rgba.to_vec(),
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
        }
    }

    /// 16x16 magenta/black checkerboard used in place of images that fail to load.
    pub fn error_checkerboard() -> Self {
        const SIZE: u32 = 16;
        const MAGENTA: [u8; 4] = [255, 0, 255, 255];
        const BLACK: [u8; 4] = [0, 0, 0, 0];

        let mut pixels = Vec::with_capacity((SIZE * SIZE * 4) as usize);
        for y in 0..SIZE {
            for x in 0..SIZE {
                let texel = if (x % 2) ^ (y % 2) == 1 { MAGENTA } else { BLACK };
                pixels.extend_from_slice(&texel);
            }
        }

        Self {
            name: "placeholder/error".to_string(),
            pixels,
            width: SIZE,
            height: SIZE,
            format: TextureFormat::Rgba8Unorm,
        }
    }

    pub fn placeholder(kind: PlaceholderKind) -> Self {
        match kind {
            PlaceholderKind::White => Self::solid("placeholder/white", [255, 255, 255, 255]),
            PlaceholderKind::Grey => Self::solid("placeholder/grey", [168, 168, 168, 255]),
            PlaceholderKind::Black => Self::solid("placeholder/black", [0, 0, 0, 0]),
            PlaceholderKind::Error => Self::error_checkerboard(),
        }
    }
}

/// Built-in textures the renderer uploads before any scene texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaceholderKind {
    White,
    Grey,
    Black,
    Error,
}

impl PlaceholderKind {
    pub const ALL: [PlaceholderKind; 4] = [
        PlaceholderKind::White,
        PlaceholderKind::Grey,
        PlaceholderKind::Black,
        PlaceholderKind::Error,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SamplerKind {
    Nearest,
    #[default]
    Linear,
}

/// A material slot pointing at one of the scene's textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureBinding {
    pub texture: usize,
    pub sampler: SamplerKind,
}

/// What a material slot ends up sampling once placeholders are applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolvedTexture {
    Scene {
        texture: usize,
        sampler: SamplerKind,
    },
    Placeholder {
        kind: PlaceholderKind,
        sampler: SamplerKind,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MaterialPass {
    #[default]
    Opaque,
    Transparent,
    Undefined,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaterialSettings {
    pub base_color: [f32; 4],
    pub roughness: f32,
    pub metallic: f32,
}

impl Default for MaterialSettings {
    fn default() -> Self {
        Self {
            base_color: [1.0, 1.0, 1.0, 1.0],
            roughness: 0.5,
            metallic: 0.0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MaterialData {
    pub name: String,
    pub settings: MaterialSettings,
    pub pass: MaterialPass,
    pub base_color_texture: Option<TextureBinding>,
    pub metallic_roughness_texture: Option<TextureBinding>,
}

impl MaterialData {
    /// Untextured materials sample the grey placeholder through the linear sampler.
    pub fn resolved_base_color(&self, texture_count: usize) -> ResolvedTexture {
        resolve(self.base_color_texture, texture_count, PlaceholderKind::Grey)
    }

    pub fn resolved_metallic_roughness(&self, texture_count: usize) -> ResolvedTexture {
        resolve(
            self.metallic_roughness_texture,
            texture_count,
            PlaceholderKind::White,
        )
    }
}

fn resolve(
    binding: Option<TextureBinding>,
    texture_count: usize,
    fallback: PlaceholderKind,
) -> ResolvedTexture {
    match binding {
        Some(binding) if binding.texture < texture_count => ResolvedTexture::Scene {
            texture: binding.texture,
            sampler: binding.sampler,
        },
        Some(binding) => {
            log::warn!(
                "Material references missing texture {}, using the error placeholder",
                binding.texture
            );
            ResolvedTexture::Placeholder {
                kind: PlaceholderKind::Error,
                sampler: SamplerKind::Nearest,
            }
        }
        None => ResolvedTexture::Placeholder {
            kind: fallback,
            sampler: SamplerKind::Linear,
        },
    }
}
