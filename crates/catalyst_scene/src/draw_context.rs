use bytemuck::{Pod, Zeroable};
use catalyst_assets::{Bounds, GeoSurface, MaterialPass};
use catalyst_core::Transform;
use glam::{Mat4, Vec3};

/// Flattened draw unit for the CPU path.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderObject {
    pub first_index: u32,
    pub index_count: u32,
    pub material_index: u32,
    pub pass: MaterialPass,
    pub model_matrix: Mat4,
    pub bounds: Bounds,
    /// Largest absolute axis scale of `model_matrix`.
    pub scale: f32,
    /// Translation of `model_matrix`. Culling places the sphere relative
    /// to it.
    pub position: Vec3,
    pub visible: bool,
}

/// Same layout as `VkDrawIndexedIndirectCommand`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

/// Per-object record in the indirect buffer. The draw command sits at
/// byte 68 so the buffer can be handed to `drawIndexedIndirect` directly
/// with offset [`IndirectDrawData::COMMAND_OFFSET`] and a 96 byte stride.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct IndirectDrawData {
    pub world_matrix: Mat4,
    pub material_index: u32,
    pub command: DrawIndexedCommand,
    pub _pad: [u32; 2],
}

impl IndirectDrawData {
    pub const COMMAND_OFFSET: u64 = 68;
    pub const STRIDE: u32 = std::mem::size_of::<IndirectDrawData>() as u32;
}

/// Object-space sphere center plus the radius already multiplied by the
/// object's scale. The compute shader moves the center with the matching
/// indirect record's world matrix.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrustumCollisionData {
    pub center: [f32; 3],
    pub radius: f32,
}

/// Output of a scene flatten. The three vectors are parallel when GPU
/// records are requested.
#[derive(Debug, Default)]
pub struct DrawContext {
    /// Every pass in flatten order. Transparent objects share the opaque
    /// draw; `pass` only classifies them.
    pub surfaces: Vec<RenderObject>,
    pub indirect_draws: Vec<IndirectDrawData>,
    pub collisions: Vec<FrustumCollisionData>,
    emit_gpu_records: bool,
}

impl DrawContext {
    pub fn new(emit_gpu_records: bool) -> Self {
        Self {
            emit_gpu_records,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub(crate) fn push_surface(&mut self, surface: &GeoSurface, pass: MaterialPass, matrix: Mat4) {
        let decomposed = Transform::from_matrix(&matrix);
        let scale = decomposed.uniform_scale();
        let position = decomposed.translation;
        let material_index = surface.material as u32;

        self.surfaces.push(RenderObject {
            first_index: surface.first_index,
            index_count: surface.index_count,
            material_index,
            pass,
            model_matrix: matrix,
            bounds: surface.bounds,
            scale,
            position,
            visible: true,
        });

        if self.emit_gpu_records {
            self.indirect_draws.push(IndirectDrawData {
                world_matrix: matrix,
                material_index,
                command: DrawIndexedCommand {
                    index_count: surface.index_count,
                    instance_count: 1,
                    first_index: surface.first_index,
                    vertex_offset: 0,
                    first_instance: 0,
                },
                _pad: [0; 2],
            });
            self.collisions.push(FrustumCollisionData {
                center: surface.bounds.sphere_center.to_array(),
                radius: surface.bounds.sphere_radius * scale,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn indirect_record_matches_the_gpu_layout() {
        assert_eq!(size_of::<DrawIndexedCommand>(), 20);
        assert_eq!(size_of::<IndirectDrawData>(), 96);
        assert_eq!(offset_of!(IndirectDrawData, material_index), 64);
        assert_eq!(
            offset_of!(IndirectDrawData, command) as u64,
            IndirectDrawData::COMMAND_OFFSET
        );
        assert_eq!(size_of::<FrustumCollisionData>(), 16);
    }

    #[test]
    fn gpu_records_mirror_the_render_object() {
        let surface = GeoSurface {
            first_index: 12,
            index_count: 6,
            material: 2,
            bounds: Bounds::from_min_max(Vec3::splat(-1.0), Vec3::splat(1.0)),
        };
        let matrix = Mat4::from_scale_rotation_translation(
            Vec3::new(1.0, -4.0, 2.0),
            glam::Quat::IDENTITY,
            Vec3::new(5.0, 0.0, 0.0),
        );

        let mut ctx = DrawContext::new(true);
        ctx.push_surface(&surface, MaterialPass::Opaque, matrix);

        let object = &ctx.surfaces[0];
        assert!((object.scale - 4.0).abs() < 1e-5);
        assert!(object.position.abs_diff_eq(Vec3::new(5.0, 0.0, 0.0), 1e-5));

        let record = ctx.indirect_draws[0];
        assert_eq!(record.material_index, 2);
        assert_eq!(record.command.first_index, 12);
        assert_eq!(record.command.index_count, 6);
        assert_eq!(record.command.instance_count, 1);
        assert!((ctx.collisions[0].radius - 3.0f32.sqrt() * 4.0).abs() < 1e-4);
    }

    #[test]
    fn transparent_surfaces_share_the_single_list() {
        let surface = GeoSurface {
            first_index: 0,
            index_count: 3,
            material: 0,
            bounds: Bounds::default(),
        };
        let mut ctx = DrawContext::new(true);
        ctx.push_surface(&surface, MaterialPass::Opaque, Mat4::IDENTITY);
        ctx.push_surface(&surface, MaterialPass::Transparent, Mat4::IDENTITY);

        let passes: Vec<_> = ctx.surfaces.iter().map(|o| o.pass).collect();
        assert_eq!(passes, vec![MaterialPass::Opaque, MaterialPass::Transparent]);
        assert_eq!(ctx.indirect_draws.len(), 2);
    }

    #[test]
    fn cpu_only_context_skips_gpu_records() {
        let mut ctx = DrawContext::new(false);
        ctx.push_surface(&GeoSurface {
            first_index: 0,
            index_count: 3,
            material: 0,
            bounds: Bounds::default(),
        }, MaterialPass::Opaque, Mat4::IDENTITY);

        assert_eq!(ctx.len(), 1);
        assert!(ctx.indirect_draws.is_empty());
        assert!(ctx.collisions.is_empty());
    }
}
