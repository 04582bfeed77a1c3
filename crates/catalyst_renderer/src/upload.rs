use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;

use catalyst_assets::Vertex;
use catalyst_scene::{DrawContext, FrustumCollisionData, IndirectDrawData};

use crate::{
    allocator::{AllocatedBuffer, GpuAllocator, create_array},
    commands::ImmediateSubmit,
    error::{RenderError, RenderResult},
    shader_data::MaterialConstants,
};

/// Destination buffers never go below this, so an empty array still has
/// a valid device address.
pub const MIN_BUFFER_SIZE: vk::DeviceSize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagingRegion {
    pub src_offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl StagingRegion {
    /// Size of the destination buffer backing this region.
    pub fn buffer_size(&self) -> vk::DeviceSize {
        self.size.max(MIN_BUFFER_SIZE)
    }

    /// Empty arrays get a buffer but no copy.
    pub fn copy(&self) -> Option<vk::BufferCopy> {
        (self.size > 0).then_some(vk::BufferCopy {
            src_offset: self.src_offset,
            dst_offset: 0,
            size: self.size,
        })
    }
}

/// Packs several arrays back to back in one staging buffer. Each array is
/// copied to offset zero of its own destination buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StagingLayout {
    pub regions: Vec<StagingRegion>,
    pub total_size: vk::DeviceSize,
}

impl StagingLayout {
    pub fn new(sizes: &[vk::DeviceSize]) -> Self {
        let mut layout = Self::default();
        for &size in sizes {
            layout.regions.push(StagingRegion {
                src_offset: layout.total_size,
                size,
            });
            layout.total_size += size;
        }
        layout
    }

    /// Writes every array into `staging` at its region offset.
    pub fn pack_into(&self, staging: &mut [u8], arrays: &[&[u8]]) {
        for (region, bytes) in self.regions.iter().zip(arrays) {
            let start = region.src_offset as usize;
            staging[start..start + bytes.len()].copy_from_slice(bytes);
        }
    }
}

/// The scene's shared GPU buffers. Everything but `indirect` is read-only
/// after the upload; the culling pass rewrites instance counts there.
pub struct SceneBuffers {
    pub vertices: AllocatedBuffer,
    pub indices: AllocatedBuffer,
    pub materials: AllocatedBuffer,
    pub indirect: AllocatedBuffer,
    pub collisions: AllocatedBuffer,
    pub object_count: u32,
}

impl SceneBuffers {
    pub fn destroy(self, allocator: &mut GpuAllocator) {
        self.vertices.destroy(allocator);
        self.indices.destroy(allocator);
        self.materials.destroy(allocator);
        self.indirect.destroy(allocator);
        self.collisions.destroy(allocator);
    }
}

fn byte_len<T: Pod>(data: &[T]) -> vk::DeviceSize {
    std::mem::size_of_val(data) as vk::DeviceSize
}

/// One staging buffer, one command buffer, five copies. Blocks until the
/// queue is idle, then frees the staging buffer.
#[allow(clippy::too_many_arguments)]
pub fn upload_scene_buffers(
    device: &ash::Device,
    queue: vk::Queue,
    allocator: &mut GpuAllocator,
    immediate: &ImmediateSubmit,
    vertices: &[Vertex],
    indices: &[u32],
    materials: &[MaterialConstants],
    draws: &DrawContext,
) -> RenderResult<SceneBuffers> {
    let indirect: &[IndirectDrawData] = &draws.indirect_draws;
    let collisions: &[FrustumCollisionData] = &draws.collisions;

    let arrays: [&[u8]; 5] = [
        bytemuck::cast_slice(vertices),
        bytemuck::cast_slice(indices),
        bytemuck::cast_slice(materials),
        bytemuck::cast_slice(indirect),
        bytemuck::cast_slice(collisions),
    ];
    let layout = StagingLayout::new(&[
        byte_len(vertices),
        byte_len(indices),
        byte_len(materials),
        byte_len(indirect),
        byte_len(collisions),
    ]);

    let address = vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    let storage = vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
    let usages = [
        storage | address,
        vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        storage | address,
        storage | address | vk::BufferUsageFlags::INDIRECT_BUFFER,
        storage | address,
    ];
    let names = [
        "vertex buffer",
        "index buffer",
        "material constants",
        "indirect draws",
        "frustum collisions",
    ];

    let allocated: [AllocatedBuffer; 5] = create_array(
        allocator,
        |allocator: &mut GpuAllocator, index| {
            allocator.allocate_buffer(
                names[index],
                layout.regions[index].buffer_size(),
                usages[index],
                MemoryLocation::GpuOnly,
            )
        },
        |allocator, buffer: AllocatedBuffer| buffer.destroy(allocator),
    )?;
    let [vertex_buffer, index_buffer, material_buffer, indirect_buffer, collision_buffer] = allocated;
    let buffers = SceneBuffers {
        vertices: vertex_buffer,
        indices: index_buffer,
        materials: material_buffer,
        indirect: indirect_buffer,
        collisions: collision_buffer,
        object_count: draws.len() as u32,
    };
    let destinations = [
        buffers.vertices.buffer,
        buffers.indices.buffer,
        buffers.materials.buffer,
        buffers.indirect.buffer,
        buffers.collisions.buffer,
    ];

    if layout.total_size > 0 {
        let copied = copy_through_staging(
            device,
            queue,
            allocator,
            immediate,
            &layout,
            &arrays,
            &destinations,
        );
        if let Err(e) = copied {
            buffers.destroy(allocator);
            return Err(e);
        }
    }

    log::info!(
        "Uploaded scene: {} vertices, {} indices, {} materials, {} objects ({} bytes staged)",
        vertices.len(),
        indices.len(),
        materials.len(),
        draws.len(),
        layout.total_size
    );

    Ok(buffers)
}

/// The staging buffer is freed whether or not the copy succeeds.
fn copy_through_staging(
    device: &ash::Device,
    queue: vk::Queue,
    allocator: &mut GpuAllocator,
    immediate: &ImmediateSubmit,
    layout: &StagingLayout,
    arrays: &[&[u8]],
    destinations: &[vk::Buffer],
) -> RenderResult<()> {
    let mut staging = allocator.allocate_buffer(
        "scene staging",
        layout.total_size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
    )?;

    let result = match staging.allocation.mapped_slice_mut() {
        Some(mapped) => {
            layout.pack_into(mapped, arrays);
            immediate.submit(device, queue, |cmd| {
                for (region, &destination) in layout.regions.iter().zip(destinations) {
                    if let Some(copy) = region.copy() {
                        unsafe { device.cmd_copy_buffer(cmd, staging.buffer, destination, &[copy]) };
                    }
                }
            })
        }
        None => Err(RenderError::NotMapped("scene staging")),
    };

    staging.destroy(allocator);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_prefix_sums() {
        let layout = StagingLayout::new(&[48, 12, 0, 96, 16]);
        let offsets: Vec<_> = layout.regions.iter().map(|r| r.src_offset).collect();
        assert_eq!(offsets, vec![0, 48, 60, 60, 156]);
        assert_eq!(layout.total_size, 172);
    }

    #[test]
    fn empty_array_gets_minimum_buffer_and_no_copy() {
        let layout = StagingLayout::new(&[0]);
        assert_eq!(layout.regions[0].buffer_size(), MIN_BUFFER_SIZE);
        assert!(layout.regions[0].copy().is_none());
    }

    #[test]
    fn copies_recover_each_array_independently() {
        let a: Vec<u8> = (0..40).collect();
        let b: Vec<u8> = vec![0xAB; 7];
        let c: Vec<u8> = Vec::new();
        let d: Vec<u8> = (100..133).rev().collect();
        let arrays: [&[u8]; 4] = [&a, &b, &c, &d];

        let layout = StagingLayout::new(&arrays.map(|x| x.len() as vk::DeviceSize));
        let mut staging = vec![0u8; layout.total_size as usize];
        layout.pack_into(&mut staging, &arrays);

        // simulate vkCmdCopyBuffer into zero-based destinations
        let mut destinations: Vec<Vec<u8>> = layout
            .regions
            .iter()
            .map(|r| vec![0u8; r.buffer_size() as usize])
            .collect();
        for (region, destination) in layout.regions.iter().zip(&mut destinations) {
            if let Some(copy) = region.copy() {
                let src = copy.src_offset as usize;
                let dst = copy.dst_offset as usize;
                let len = copy.size as usize;
                destination[dst..dst + len].copy_from_slice(&staging[src..src + len]);
            }
        }

        for (array, destination) in arrays.iter().zip(&destinations) {
            assert_eq!(&destination[..array.len()], *array);
        }
        assert_eq!(destinations[2].len() as vk::DeviceSize, MIN_BUFFER_SIZE);
    }
}
