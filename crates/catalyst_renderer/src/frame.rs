use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::{
    allocator::{AllocatedBuffer, GpuAllocator},
    descriptors::{DescriptorAllocator, PoolSizeRatio},
    error::{RenderError, RenderResult},
    shader_data::{CullingData, GpuSceneData},
};

pub const FRAMES_IN_FLIGHT: usize = 2;

/// Everything one frame slot owns. The CPU may only touch it after
/// `render_fence` has signaled. The present semaphores belong to the
/// swapchain images instead.
pub struct FrameData {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_fence: vk::Fence,
    pub scene_buffer: AllocatedBuffer,
    pub culling_buffer: AllocatedBuffer,
    pub descriptors: DescriptorAllocator,
}

impl FrameData {
    pub fn new(
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        queue_family: u32,
        index: usize,
    ) -> RenderResult<Self> {
        let (command_pool, command_buffer, image_available, render_fence) = unsafe {
            let command_pool = device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(queue_family)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                None,
            )?;
            let command_buffer = device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )?[0];

            let image_available = device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?;
            // Signaled so the first wait on this slot returns immediately.
            let render_fence = device.create_fence(
                &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                None,
            )?;
            (command_pool, command_buffer, image_available, render_fence)
        };

        let scene_buffer = allocator.allocate_buffer(
            &format!("frame {index} scene data"),
            std::mem::size_of::<GpuSceneData>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;
        let culling_buffer = allocator.allocate_buffer(
            &format!("frame {index} culling data"),
            std::mem::size_of::<CullingData>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;

        let descriptors = DescriptorAllocator::new(
            device,
            4,
            &[PoolSizeRatio {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                ratio: 2.0,
            }],
        )?;

        Ok(Self {
            command_pool,
            command_buffer,
            image_available,
            render_fence,
            scene_buffer,
            culling_buffer,
            descriptors,
        })
    }

    pub fn destroy(mut self, device: &ash::Device, allocator: &mut GpuAllocator) {
        self.descriptors.destroy_pools(device);
        unsafe {
            device.destroy_fence(self.render_fence, None);
            device.destroy_semaphore(self.image_available, None);
            device.destroy_command_pool(self.command_pool, None);
        }
        self.scene_buffer.destroy(allocator);
        self.culling_buffer.destroy(allocator);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct SlotStatus {
    /// The slot's fence was waited on since the last recording.
    fence_waited: bool,
}

/// Tracks which frame slot is current and refuses to record into a slot
/// whose fence has not been waited on since it was last recorded.
#[derive(Debug)]
pub struct FramePacer {
    frame_number: u64,
    slots: Vec<SlotStatus>,
    pub waits: u64,
    pub records: u64,
}

impl FramePacer {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frame_number: 0,
            slots: vec![SlotStatus::default(); frames_in_flight.max(1)],
            waits: 0,
            records: 0,
        }
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn current_slot(&self) -> usize {
        (self.frame_number % self.slots.len() as u64) as usize
    }

    /// Call after the slot's fence wait returned.
    pub fn fence_waited(&mut self) {
        let slot = self.current_slot();
        self.slots[slot].fence_waited = true;
        self.waits += 1;
    }

    /// Claims the current slot for recording.
    pub fn begin_record(&mut self) -> RenderResult<usize> {
        let slot = self.current_slot();
        if !self.slots[slot].fence_waited {
            return Err(RenderError::FrameDiscipline { slot });
        }
        self.slots[slot].fence_waited = false;
        self.records += 1;
        Ok(slot)
    }

    pub fn advance(&mut self) {
        self.frame_number += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_cycle_modulo_frames_in_flight() {
        let mut pacer = FramePacer::new(FRAMES_IN_FLIGHT);
        let slots: Vec<usize> = (0..5)
            .map(|_| {
                let slot = pacer.current_slot();
                pacer.advance();
                slot
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn recording_without_waiting_is_refused() {
        let mut pacer = FramePacer::new(FRAMES_IN_FLIGHT);
        assert!(matches!(
            pacer.begin_record(),
            Err(RenderError::FrameDiscipline { slot: 0 })
        ));

        pacer.fence_waited();
        assert_eq!(pacer.begin_record().unwrap(), 0);
        // a second record into the same slot needs another wait
        assert!(pacer.begin_record().is_err());
    }

    #[test]
    fn a_trace_of_frames_never_records_twice_per_wait() {
        let mut pacer = FramePacer::new(FRAMES_IN_FLIGHT);
        for frame in 0..50u64 {
            pacer.fence_waited();
            // every seventh frame finds the swapchain out of date and
            // returns before recording, leaving the fence signaled
            if frame % 7 == 3 {
                continue;
            }
            pacer.begin_record().unwrap();
            pacer.advance();
        }
        assert!(pacer.records <= pacer.waits);
        assert_eq!(pacer.waits, 50);
        assert_eq!(pacer.records, 50 - 7);
    }

    #[test]
    fn coming_back_to_a_slot_requires_a_fresh_wait() {
        let mut pacer = FramePacer::new(2);
        pacer.fence_waited();
        pacer.begin_record().unwrap();
        pacer.advance();
        pacer.fence_waited();
        pacer.begin_record().unwrap();
        pacer.advance();

        // back on slot 0
        assert_eq!(pacer.current_slot(), 0);
        assert!(pacer.begin_record().is_err());
        pacer.fence_waited();
        assert!(pacer.begin_record().is_ok());
    }
}
