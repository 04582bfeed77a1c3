//! Host-side mirrors of the blocks declared in `shaders/common.glsl`.

use bytemuck::{Pod, Zeroable};
use catalyst_assets::MaterialData;
use glam::{Mat4, Vec4};

/// Per-frame uniform block, set 0 binding 0.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct GpuSceneData {
    pub sunlight_color: Vec4,
    pub sunlight_direction: Vec4,
    pub ambient_color: Vec4,
    pub view: Mat4,
    pub proj: Mat4,
    pub proj_view: Mat4,
    pub vertex_buffer: u64,
    pub material_buffer: u64,
    pub indirect_buffer: u64,
    pub collision_buffer: u64,
}

impl GpuSceneData {
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self {
            sunlight_color: Vec4::ONE,
            sunlight_direction: Vec4::new(0.0, 1.0, 0.5, 1.0),
            ambient_color: Vec4::ONE,
            view,
            proj,
            proj_view: proj * view,
            vertex_buffer: 0,
            material_buffer: 0,
            indirect_buffer: 0,
            collision_buffer: 0,
        }
    }
}

/// Per-frame uniform block for the culling pass, set 0 binding 1.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct CullingData {
    pub planes: [Vec4; 6],
    pub object_count: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub color_factor: [f32; 4],
    /// x = metallic, y = roughness.
    pub metal_rough_factor: [f32; 4],
}

impl From<&MaterialData> for MaterialConstants {
    fn from(material: &MaterialData) -> Self {
        Self {
            color_factor: material.settings.base_color,
            metal_rough_factor: [
                material.settings.metallic,
                material.settings.roughness,
                0.0,
                0.0,
            ],
        }
    }
}

/// Push constant for the traditional draw path.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct DrawPushConstants {
    pub model: Mat4,
    pub material_index: u32,
    pub _pad: [u32; 3],
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn scene_block_matches_std140() {
        assert_eq!(offset_of!(GpuSceneData, view), 48);
        assert_eq!(offset_of!(GpuSceneData, vertex_buffer), 240);
        assert_eq!(size_of::<GpuSceneData>(), 272);
    }

    #[test]
    fn small_blocks_have_expected_sizes() {
        assert_eq!(size_of::<CullingData>(), 112);
        assert_eq!(size_of::<MaterialConstants>(), 32);
        assert_eq!(size_of::<DrawPushConstants>(), 80);
    }

    #[test]
    fn proj_view_is_projection_after_view() {
        let view = Mat4::from_translation(glam::Vec3::new(0.0, 0.0, -5.0));
        let proj = Mat4::from_scale(glam::Vec3::splat(2.0));
        let data = GpuSceneData::new(view, proj);
        assert_eq!(data.proj_view, proj * view);
    }
}
