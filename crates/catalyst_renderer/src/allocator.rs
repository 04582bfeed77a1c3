use std::mem::ManuallyDrop;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::{
    MemoryLocation,
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc},
};

use crate::{
    commands::{self, ImmediateSubmit},
    context::VulkanContext,
    error::{RenderError, RenderResult},
};

pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Allocation,
    /// Zero unless the buffer was created with SHADER_DEVICE_ADDRESS.
    pub address: vk::DeviceAddress,
    pub size: vk::DeviceSize,
}

impl AllocatedBuffer {
    /// Copies `data` to the start of a host-visible buffer.
    pub fn write<T: Pod>(&mut self, data: &[T]) -> RenderResult<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> RenderResult<()> {
        let mapped = self
            .allocation
            .mapped_slice_mut()
            .ok_or(RenderError::NotMapped("write target"))?;
        let end = offset + bytes.len();
        let capacity = mapped.len();
        let target = mapped
            .get_mut(offset..end)
            .ok_or(RenderError::BufferOverflow { end, capacity })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    pub fn destroy(self, allocator: &mut GpuAllocator) {
        unsafe { allocator.device.destroy_buffer(self.buffer, None) };
        allocator.free(self.allocation);
    }
}

pub struct AllocatedImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub allocation: Allocation,
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub mip_levels: u32,
}

impl AllocatedImage {
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    pub fn destroy(self, allocator: &mut GpuAllocator) {
        unsafe {
            allocator.device.destroy_image_view(self.view, None);
            allocator.device.destroy_image(self.image, None);
        }
        allocator.free(self.allocation);
    }
}

/// Builds `count` resources in order. When one fails, the ones already
/// built are handed to `release` newest first and the error is returned.
pub fn create_each<S: ?Sized, T>(
    state: &mut S,
    count: usize,
    mut create: impl FnMut(&mut S, usize) -> RenderResult<T>,
    mut release: impl FnMut(&mut S, T),
) -> RenderResult<Vec<T>> {
    let mut built = Vec::with_capacity(count);
    for index in 0..count {
        match create(state, index) {
            Ok(value) => built.push(value),
            Err(e) => {
                while let Some(value) = built.pop() {
                    release(state, value);
                }
                return Err(e);
            }
        }
    }
    Ok(built)
}

/// [`create_each`] for a fixed number of resources.
pub fn create_array<S: ?Sized, T, const N: usize>(
    state: &mut S,
    create: impl FnMut(&mut S, usize) -> RenderResult<T>,
    mut release: impl FnMut(&mut S, T),
) -> RenderResult<[T; N]> {
    let built = create_each(state, N, create, &mut release)?;
    <[T; N]>::try_from(built).map_err(|mut partial| {
        let built = partial.len();
        while let Some(value) = partial.pop() {
            release(state, value);
        }
        RenderError::Incomplete { expected: N, built }
    })
}

/// Tightly packed RGBA8 with a non-zero extent.
pub fn check_rgba8_pixels(name: &str, pixels: &[u8], extent: vk::Extent3D) -> RenderResult<()> {
    let expected = extent.width as u64 * extent.height as u64 * extent.depth as u64 * 4;
    if expected == 0 || pixels.len() as u64 != expected {
        return Err(RenderError::ImageData {
            name: name.to_string(),
            width: extent.width,
            height: extent.height,
            expected,
            actual: pixels.len(),
        });
    }
    Ok(())
}

/// Sub-allocates buffers and images out of large device memory blocks.
pub struct GpuAllocator {
    device: ash::Device,
    allocator: ManuallyDrop<Allocator>,
}

impl GpuAllocator {
    pub fn new(ctx: &VulkanContext) -> RenderResult<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: ctx.instance.clone(),
            device: ctx.device.clone(),
            physical_device: ctx.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        Ok(Self {
            device: ctx.device.clone(),
            allocator: ManuallyDrop::new(allocator),
        })
    }

    /// `CpuToGpu` and `GpuToCpu` buffers come back persistently mapped.
    pub fn allocate_buffer(
        &mut self,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RenderResult<AllocatedBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free(allocation);
            return Err(e.into());
        }

        let address = if usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            unsafe {
                self.device
                    .get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
            }
        } else {
            0
        };

        Ok(AllocatedBuffer {
            buffer,
            allocation,
            address,
            size,
        })
    }

    /// GPU-only image plus a view over every mip.
    pub fn allocate_image(
        &mut self,
        name: &str,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
    ) -> RenderResult<AllocatedImage> {
        let mip_levels = if mipmapped {
            commands::mip_level_count(extent.width, extent.height)
        } else {
            1
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { self.device.destroy_image(image, None) };
            self.free(allocation);
            return Err(e.into());
        }

        let aspect = if format == vk::Format::D32_SFLOAT {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .level_count(mip_levels)
                    .layer_count(1),
            );
        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                self.free(allocation);
                return Err(e.into());
            }
        };

        Ok(AllocatedImage {
            image,
            view,
            allocation,
            extent,
            format,
            mip_levels,
        })
    }

    /// Allocates an image and fills it with tightly packed RGBA8 pixels
    /// through a throwaway staging buffer. Blocks until the copy is done.
    #[allow(clippy::too_many_arguments)]
    pub fn upload_image(
        &mut self,
        immediate: &ImmediateSubmit,
        queue: vk::Queue,
        name: &str,
        pixels: &[u8],
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
    ) -> RenderResult<AllocatedImage> {
        check_rgba8_pixels(name, pixels, extent)?;

        let mut staging = self.allocate_buffer(
            "image staging",
            pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        let result = match staging.write_bytes(0, pixels) {
            Ok(()) => self.image_from_staging(immediate, queue, name, &staging, extent, format, usage, mipmapped),
            Err(e) => Err(e),
        };
        staging.destroy(self);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn image_from_staging(
        &mut self,
        immediate: &ImmediateSubmit,
        queue: vk::Queue,
        name: &str,
        staging: &AllocatedBuffer,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
    ) -> RenderResult<AllocatedImage> {
        let mut usage = usage | vk::ImageUsageFlags::TRANSFER_DST;
        if mipmapped {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let image = self.allocate_image(name, extent, format, usage, mipmapped)?;

        let device = self.device.clone();
        let result = immediate.submit(&device, queue, |cmd| {
            commands::transition_image(
                &device,
                cmd,
                image.image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );

            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .layer_count(1),
                )
                .image_extent(extent);
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                )
            };

            if mipmapped {
                commands::generate_mipmaps(&device, cmd, image.image, image.extent_2d(), image.mip_levels);
            } else {
                commands::transition_image(
                    &device,
                    cmd,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            }
        });

        match result {
            Ok(()) => Ok(image),
            Err(e) => {
                image.destroy(self);
                Err(e)
            }
        }
    }

    pub fn free(&mut self, allocation: Allocation) {
        if let Err(e) = self.allocator.free(allocation) {
            log::warn!("Failed to free GPU allocation: {e}");
        }
    }

    /// Drops the underlying allocator. Every allocation must already be
    /// freed, and the device must still be alive.
    ///
    /// # Safety
    /// Must be called exactly once, and the allocator must not be used after.
    pub unsafe fn destroy(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.allocator) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out numbered resources and fails the N-th request.
    #[derive(Default)]
    struct MockDevice {
        fail_at: Option<usize>,
        requests: usize,
        live: Vec<u32>,
        released: Vec<u32>,
    }

    impl MockDevice {
        fn failing_at(request: usize) -> Self {
            Self {
                fail_at: Some(request),
                ..Default::default()
            }
        }

        fn create(&mut self, index: usize) -> RenderResult<u32> {
            self.requests += 1;
            if self.fail_at == Some(index) {
                return Err(RenderError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            let id = index as u32 + 100;
            self.live.push(id);
            Ok(id)
        }

        fn release(&mut self, id: u32) {
            self.live.retain(|&live| live != id);
            self.released.push(id);
        }
    }

    #[test]
    fn failure_part_way_releases_everything_already_built() {
        let mut device = MockDevice::failing_at(3);
        let result = create_each(&mut device, 5, MockDevice::create, MockDevice::release);

        assert!(matches!(
            result,
            Err(RenderError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        assert_eq!(device.requests, 4);
        assert!(device.live.is_empty());
        assert_eq!(device.released, vec![102, 101, 100]);
    }

    #[test]
    fn every_failure_position_leaves_nothing_alive() {
        for fail_at in 0..5 {
            let mut device = MockDevice::failing_at(fail_at);
            let result: RenderResult<[u32; 5]> =
                create_array(&mut device, MockDevice::create, MockDevice::release);

            assert!(result.is_err());
            assert!(device.live.is_empty(), "leak when request {fail_at} failed");
            assert_eq!(device.released.len(), fail_at);
        }
    }

    #[test]
    fn success_keeps_creation_order() {
        let mut device = MockDevice::default();
        let built: [u32; 3] = create_array(&mut device, MockDevice::create, MockDevice::release).unwrap();

        assert_eq!(built, [100, 101, 102]);
        assert!(device.released.is_empty());
    }

    fn extent(width: u32, height: u32) -> vk::Extent3D {
        vk::Extent3D {
            width,
            height,
            depth: 1,
        }
    }

    #[test]
    fn pixel_data_must_cover_the_extent_exactly() {
        assert!(check_rgba8_pixels("ok", &[0; 2 * 3 * 4], extent(2, 3)).is_ok());

        let short = check_rgba8_pixels("short", &[0; 20], extent(2, 3));
        assert!(matches!(
            short,
            Err(RenderError::ImageData {
                expected: 24,
                actual: 20,
                ..
            })
        ));
        assert!(check_rgba8_pixels("long", &[0; 28], extent(2, 3)).is_err());
    }

    #[test]
    fn empty_images_are_rejected() {
        assert!(check_rgba8_pixels("empty", &[], extent(0, 0)).is_err());
        assert!(check_rgba8_pixels("flat", &[], extent(4, 0)).is_err());
    }
}
