use ash::vk;

use crate::error::RenderResult;

/// One-shot command buffer for load-time work. `submit` blocks until the
/// queue is idle.
pub struct ImmediateSubmit {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    fence: vk::Fence,
}

impl ImmediateSubmit {
    pub fn new(device: &ash::Device, queue_family: u32) -> RenderResult<Self> {
        unsafe {
            let pool = device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(queue_family)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                None,
            )?;
            let buffer = device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )?[0];
            let fence = device.create_fence(&vk::FenceCreateInfo::default(), None)?;

            Ok(Self {
                pool,
                buffer,
                fence,
            })
        }
    }

    pub fn submit(
        &self,
        device: &ash::Device,
        queue: vk::Queue,
        record: impl FnOnce(vk::CommandBuffer),
    ) -> RenderResult<()> {
        unsafe {
            device.reset_fences(&[self.fence])?;
            device.reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(
                self.buffer,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;

            record(self.buffer);

            device.end_command_buffer(self.buffer)?;

            let buffer_infos =
                [vk::CommandBufferSubmitInfo::default().command_buffer(self.buffer)];
            let submit = vk::SubmitInfo2::default().command_buffer_infos(&buffer_infos);
            device.queue_submit2(queue, &[submit], self.fence)?;
            device.queue_wait_idle(queue)?;
        }
        Ok(())
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_fence(self.fence, None);
            device.destroy_command_pool(self.pool, None);
        }
    }
}

pub fn aspect_for_layout(layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    match layout {
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Full-image layout transition. Uses ALL_COMMANDS on both sides, which
/// is coarse but fine at the handful of transitions per frame here.
pub fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    current: vk::ImageLayout,
    new: vk::ImageLayout,
) {
    transition_mips(device, cmd, image, current, new, 0, vk::REMAINING_MIP_LEVELS);
}

pub fn transition_mips(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    current: vk::ImageLayout,
    new: vk::ImageLayout,
    base_mip: u32,
    mip_count: u32,
) {
    let barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
        .old_layout(current)
        .new_layout(new)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_for_layout(new))
                .base_mip_level(base_mip)
                .level_count(mip_count)
                .layer_count(vk::REMAINING_ARRAY_LAYERS),
        );

    let barriers = [barrier];
    let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
    unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) };
}

fn extent_offset(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    }
}

/// Linear blit of mip 0 of `src` onto mip 0 of `dst`, scaling between the
/// two extents. `src` must be TRANSFER_SRC and `dst` TRANSFER_DST.
pub fn blit_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: vk::Image,
    dst: vk::Image,
    src_extent: vk::Extent2D,
    dst_extent: vk::Extent2D,
) {
    blit_level(device, cmd, src, dst, 0, 0, src_extent, dst_extent);
}

#[allow(clippy::too_many_arguments)]
fn blit_level(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: vk::Image,
    dst: vk::Image,
    src_mip: u32,
    dst_mip: u32,
    src_extent: vk::Extent2D,
    dst_extent: vk::Extent2D,
) {
    let subresource = |mip| {
        vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(mip)
            .layer_count(1)
    };

    let regions = [vk::ImageBlit2::default()
        .src_subresource(subresource(src_mip))
        .src_offsets([vk::Offset3D::default(), extent_offset(src_extent)])
        .dst_subresource(subresource(dst_mip))
        .dst_offsets([vk::Offset3D::default(), extent_offset(dst_extent)])];

    let blit_info = vk::BlitImageInfo2::default()
        .src_image(src)
        .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .dst_image(dst)
        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .filter(vk::Filter::LINEAR)
        .regions(&regions);

    unsafe { device.cmd_blit_image2(cmd, &blit_info) };
}

pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Fills mips 1.. of an image whose every level is in TRANSFER_DST and
/// whose mip 0 holds the pixels. Leaves the whole chain SHADER_READ_ONLY.
pub fn generate_mipmaps(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    extent: vk::Extent2D,
    mip_levels: u32,
) {
    let mut size = extent;
    for mip in 0..mip_levels {
        transition_mips(
            device,
            cmd,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            mip,
            1,
        );

        if mip + 1 < mip_levels {
            let half = vk::Extent2D {
                width: (size.width / 2).max(1),
                height: (size.height / 2).max(1),
            };
            blit_level(device, cmd, image, image, mip, mip + 1, size, half);
            size = half;
        }
    }

    transition_image(
        device,
        cmd,
        image,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_length() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(16, 16), 5);
        assert_eq!(mip_level_count(1024, 512), 11);
        assert_eq!(mip_level_count(300, 20), 9);
    }

    #[test]
    fn depth_layouts_use_the_depth_aspect() {
        assert_eq!(
            aspect_for_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for_layout(vk::ImageLayout::GENERAL),
            vk::ImageAspectFlags::COLOR
        );
    }
}
