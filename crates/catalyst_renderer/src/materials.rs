use ash::vk;

use catalyst_assets::{
    MaterialData, PlaceholderKind, ResolvedTexture, SamplerKind, TextureData, TextureFormat,
};
use catalyst_scene::LoadedScene;

use crate::{
    allocator::{AllocatedImage, GpuAllocator, create_array, create_each},
    commands::ImmediateSubmit,
    descriptors::{DescriptorAllocator, DescriptorLayoutBuilder, DescriptorWriter, PoolSizeRatio},
    error::RenderResult,
    shader_data::MaterialConstants,
};

pub struct Samplers {
    pub nearest: vk::Sampler,
    pub linear: vk::Sampler,
}

impl Samplers {
    pub fn new(device: &ash::Device) -> RenderResult<Self> {
        let info = |filter| {
            vk::SamplerCreateInfo::default()
                .mag_filter(filter)
                .min_filter(filter)
                .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::REPEAT)
                .address_mode_v(vk::SamplerAddressMode::REPEAT)
                .address_mode_w(vk::SamplerAddressMode::REPEAT)
                .max_lod(vk::LOD_CLAMP_NONE)
        };
        let nearest = unsafe { device.create_sampler(&info(vk::Filter::NEAREST), None)? };
        let linear = match unsafe { device.create_sampler(&info(vk::Filter::LINEAR), None) } {
            Ok(linear) => linear,
            Err(e) => {
                unsafe { device.destroy_sampler(nearest, None) };
                return Err(e.into());
            }
        };
        Ok(Self { nearest, linear })
    }

    pub fn get(&self, kind: SamplerKind) -> vk::Sampler {
        match kind {
            SamplerKind::Nearest => self.nearest,
            SamplerKind::Linear => self.linear,
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_sampler(self.nearest, None);
            device.destroy_sampler(self.linear, None);
        }
    }
}

/// Built-in textures uploaded once at startup.
pub struct PlaceholderTextures {
    pub white: AllocatedImage,
    pub grey: AllocatedImage,
    pub black: AllocatedImage,
    pub error: AllocatedImage,
}

impl PlaceholderTextures {
    pub fn new(
        allocator: &mut GpuAllocator,
        immediate: &ImmediateSubmit,
        queue: vk::Queue,
    ) -> RenderResult<Self> {
        const KINDS: [PlaceholderKind; 4] = [
            PlaceholderKind::White,
            PlaceholderKind::Grey,
            PlaceholderKind::Black,
            PlaceholderKind::Error,
        ];
        let images: [AllocatedImage; 4] = create_array(
            allocator,
            |allocator: &mut GpuAllocator, index| {
                let texture = TextureData::placeholder(KINDS[index]);
                upload_texture(allocator, immediate, queue, &texture, false)
            },
            |allocator, image: AllocatedImage| image.destroy(allocator),
        )?;
        let [white, grey, black, error] = images;
        Ok(Self {
            white,
            grey,
            black,
            error,
        })
    }

    pub fn view(&self, kind: PlaceholderKind) -> vk::ImageView {
        match kind {
            PlaceholderKind::White => self.white.view,
            PlaceholderKind::Grey => self.grey.view,
            PlaceholderKind::Black => self.black.view,
            PlaceholderKind::Error => self.error.view,
        }
    }

    pub fn destroy(self, allocator: &mut GpuAllocator) {
        self.white.destroy(allocator);
        self.grey.destroy(allocator);
        self.black.destroy(allocator);
        self.error.destroy(allocator);
    }
}

pub fn vk_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
    }
}

pub fn upload_texture(
    allocator: &mut GpuAllocator,
    immediate: &ImmediateSubmit,
    queue: vk::Queue,
    texture: &TextureData,
    mipmapped: bool,
) -> RenderResult<AllocatedImage> {
    allocator.upload_image(
        immediate,
        queue,
        &texture.name,
        &texture.pixels,
        vk::Extent3D {
            width: texture.width,
            height: texture.height,
            depth: 1,
        },
        vk_format(texture.format),
        vk::ImageUsageFlags::SAMPLED,
        mipmapped,
    )
}

/// One entry per material. A scene without materials still gets one
/// default entry so index 0 is always valid.
pub fn material_constants(materials: &[MaterialData]) -> Vec<MaterialConstants> {
    if materials.is_empty() {
        return vec![MaterialConstants::from(&MaterialData::default())];
    }
    materials.iter().map(MaterialConstants::from).collect()
}

/// Set 1: base color and metallic-roughness arrays indexed by material.
pub struct MaterialSet {
    pub layout: vk::DescriptorSetLayout,
    pub set: vk::DescriptorSet,
    descriptors: DescriptorAllocator,
    textures: Vec<AllocatedImage>,
}

impl MaterialSet {
    pub fn new(
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        immediate: &ImmediateSubmit,
        queue: vk::Queue,
        scene: &LoadedScene,
        placeholders: &PlaceholderTextures,
        samplers: &Samplers,
    ) -> RenderResult<Self> {
        let textures = create_each(
            allocator,
            scene.textures.len(),
            |allocator: &mut GpuAllocator, index| {
                upload_texture(allocator, immediate, queue, &scene.textures[index], true)
            },
            |allocator, image: AllocatedImage| image.destroy(allocator),
        )?;

        let defaults = [MaterialData::default()];
        let materials: &[MaterialData] = if scene.materials.is_empty() {
            &defaults
        } else {
            &scene.materials
        };
        let count = materials.len() as u32;

        let (layout, descriptors, set) = match allocate_material_set(device, count) {
            Ok(parts) => parts,
            Err(e) => {
                for texture in textures {
                    texture.destroy(allocator);
                }
                return Err(e);
            }
        };

        let texture_count = textures.len();
        let image_info = |resolved: ResolvedTexture| {
            let (view, sampler) = match resolved {
                ResolvedTexture::Scene { texture, sampler } => (textures[texture].view, sampler),
                ResolvedTexture::Placeholder { kind, sampler } => (placeholders.view(kind), sampler),
            };
            vk::DescriptorImageInfo {
                sampler: samplers.get(sampler),
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }
        };

        let base_colors = materials
            .iter()
            .map(|m| image_info(m.resolved_base_color(texture_count)))
            .collect();
        let metal_roughs = materials
            .iter()
            .map(|m| image_info(m.resolved_metallic_roughness(texture_count)))
            .collect();

        let mut writer = DescriptorWriter::default();
        writer
            .write_images(0, base_colors, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .write_images(1, metal_roughs, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        writer.update_set(device, set);

        log::info!(
            "Material set: {count} materials, {} scene textures",
            textures.len()
        );

        Ok(Self {
            layout,
            set,
            descriptors,
            textures,
        })
    }

    pub fn destroy(mut self, device: &ash::Device, allocator: &mut GpuAllocator) {
        self.descriptors.destroy_pools(device);
        unsafe { device.destroy_descriptor_set_layout(self.layout, None) };
        for texture in self.textures {
            texture.destroy(allocator);
        }
    }
}

/// Layout, pool and the one set holding `count` entries per array. Each
/// step undoes the earlier ones if it fails.
fn allocate_material_set(
    device: &ash::Device,
    count: u32,
) -> RenderResult<(vk::DescriptorSetLayout, DescriptorAllocator, vk::DescriptorSet)> {
    let layout = DescriptorLayoutBuilder::default()
        .add_binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, count)
        .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, count)
        .build(device, vk::ShaderStageFlags::FRAGMENT)?;

    let pool_ratios = [PoolSizeRatio {
        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        ratio: 2.0 * count as f32,
    }];
    let mut descriptors = match DescriptorAllocator::new(device, 1, &pool_ratios) {
        Ok(descriptors) => descriptors,
        Err(e) => {
            unsafe { device.destroy_descriptor_set_layout(layout, None) };
            return Err(e);
        }
    };

    match descriptors.allocate(device, layout) {
        Ok(set) => Ok((layout, descriptors, set)),
        Err(e) => {
            descriptors.destroy_pools(device);
            unsafe { device.destroy_descriptor_set_layout(layout, None) };
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_material_list_still_yields_index_zero() {
        let constants = material_constants(&[]);
        assert_eq!(constants.len(), 1);
        assert_eq!(constants[0].color_factor, [1.0; 4]);
    }

    #[test]
    fn constants_pack_metallic_then_roughness() {
        let mut material = MaterialData::default();
        material.settings.metallic = 0.25;
        material.settings.roughness = 0.75;
        let constants = material_constants(&[material]);
        assert_eq!(constants[0].metal_rough_factor, [0.25, 0.75, 0.0, 0.0]);
    }

    #[test]
    fn srgb_textures_map_to_srgb_formats() {
        assert_eq!(
            vk_format(TextureFormat::Rgba8UnormSrgb),
            vk::Format::R8G8B8A8_SRGB
        );
        assert_eq!(vk_format(TextureFormat::Rgba8Unorm), vk::Format::R8G8B8A8_UNORM);
    }
}
