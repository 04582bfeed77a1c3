use ash::vk;

use crate::{
    context::VulkanContext,
    error::{RenderError, RenderResult},
};

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    /// Signaled by the frame that renders into the image with the same
    /// index and waited on by its present.
    pub render_finished: Vec<vk::Semaphore>,
}

/// One more image than the minimum, within the surface's limit.
pub fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

pub fn swapchain_create_info<'a>(
    surface: vk::SurfaceKHR,
    capabilities: &vk::SurfaceCapabilitiesKHR,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    old_swapchain: vk::SwapchainKHR,
) -> vk::SwapchainCreateInfoKHR<'a> {
    vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(image_count(capabilities))
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain)
}

impl Swapchain {
    pub fn new(ctx: &VulkanContext, width: u32, height: u32, vsync: bool) -> RenderResult<Self> {
        Self::create(ctx, width, height, vsync, vk::SwapchainKHR::null())
    }

    fn create(
        ctx: &VulkanContext,
        width: u32,
        height: u32,
        vsync: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<Self> {
        let surface_format = choose_surface_format(ctx)?;
        let present_mode = choose_present_mode(ctx, vsync)?;

        let capabilities = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)?
        };
        let extent = choose_extent(&capabilities, width, height);

        let create_info = swapchain_create_info(
            ctx.surface,
            &capabilities,
            surface_format,
            present_mode,
            extent,
            old_swapchain,
        );
        let handle = unsafe { ctx.swapchain_loader.create_swapchain(&create_info, None)? };

        // From here on `swapchain.destroy` releases whatever was built.
        let mut swapchain = Self {
            handle,
            format: surface_format.format,
            extent,
            images: Vec::new(),
            image_views: Vec::new(),
            render_finished: Vec::new(),
        };
        if let Err(e) = swapchain.create_image_resources(ctx) {
            swapchain.destroy(ctx);
            return Err(e);
        }

        log::info!(
            "Swapchain: {} images, {:?}, {}x{}, {:?}",
            swapchain.images.len(),
            surface_format.format,
            extent.width,
            extent.height,
            present_mode
        );
        Ok(swapchain)
    }

    fn create_image_resources(&mut self, ctx: &VulkanContext) -> RenderResult<()> {
        self.images = unsafe { ctx.swapchain_loader.get_swapchain_images(self.handle)? };

        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );
            self.image_views
                .push(unsafe { ctx.device.create_image_view(&view_info, None)? });
            self.render_finished.push(unsafe {
                ctx.device
                    .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
            });
        }
        Ok(())
    }

    /// Semaphore the submit for `image_index` signals and its present waits on.
    pub fn present_semaphore(&self, image_index: u32) -> RenderResult<vk::Semaphore> {
        self.render_finished
            .get(image_index as usize)
            .copied()
            .ok_or(RenderError::ImageIndex {
                index: image_index,
                count: self.render_finished.len(),
            })
    }

    /// Builds the replacement against the same surface, retiring the
    /// current swapchain through `old_swapchain`, then destroys the old
    /// one. On failure `self` is left as it was. The caller waits for the
    /// device first.
    pub fn recreate(
        &mut self,
        ctx: &VulkanContext,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> RenderResult<()> {
        let replacement = Self::create(ctx, width, height, vsync, self.handle)?;
        let mut retired = std::mem::replace(self, replacement);
        retired.destroy(ctx);
        Ok(())
    }

    pub fn destroy(&mut self, ctx: &VulkanContext) {
        unsafe {
            for semaphore in self.render_finished.drain(..) {
                ctx.device.destroy_semaphore(semaphore, None);
            }
            for view in self.image_views.drain(..) {
                ctx.device.destroy_image_view(view, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                ctx.swapchain_loader.destroy_swapchain(self.handle, None);
            }
        }
        self.handle = vk::SwapchainKHR::null();
        self.images.clear();
    }
}

fn choose_surface_format(ctx: &VulkanContext) -> RenderResult<vk::SurfaceFormatKHR> {
    let formats = unsafe {
        ctx.surface_loader
            .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)?
    };

    Ok(formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
        .unwrap_or(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }))
}

fn choose_present_mode(ctx: &VulkanContext, vsync: bool) -> RenderResult<vk::PresentModeKHR> {
    if vsync {
        return Ok(vk::PresentModeKHR::FIFO);
    }

    let modes = unsafe {
        ctx.surface_loader
            .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)?
    };
    Ok(pick_present_mode(&modes, vsync))
}

/// FIFO is the only mode every driver has to support.
pub fn pick_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn vsync_always_picks_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(pick_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn without_vsync_mailbox_beats_immediate() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(pick_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            pick_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn undefined_surface_extent_is_clamped_to_the_window() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 8000, 600);
        assert_eq!((extent.width, extent.height), (4096, 600));
    }

    #[test]
    fn recreation_hands_over_the_old_swapchain() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        let format = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let old = vk::SwapchainKHR::from_raw(42);

        let info = swapchain_create_info(
            vk::SurfaceKHR::null(),
            &capabilities,
            format,
            vk::PresentModeKHR::FIFO,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            old,
        );
        assert_eq!(info.old_swapchain, old);
        assert_eq!(info.min_image_count, 3);
    }

    #[test]
    fn image_count_respects_the_surface_maximum() {
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(image_count(&capped), 3);
    }

    fn swapchain_with_images(count: u64) -> Swapchain {
        Swapchain {
            handle: vk::SwapchainKHR::null(),
            format: vk::Format::B8G8R8A8_UNORM,
            extent: vk::Extent2D::default(),
            images: (0..count).map(|i| vk::Image::from_raw(i + 1)).collect(),
            image_views: Vec::new(),
            render_finished: (0..count).map(|i| vk::Semaphore::from_raw(100 + i)).collect(),
        }
    }

    #[test]
    fn each_image_presents_with_its_own_semaphore() {
        let swapchain = swapchain_with_images(3);
        let semaphores: Vec<_> = (0..3)
            .map(|index| swapchain.present_semaphore(index).unwrap())
            .collect();

        assert_eq!(semaphores[0], vk::Semaphore::from_raw(100));
        assert_ne!(semaphores[0], semaphores[1]);
        assert_ne!(semaphores[1], semaphores[2]);
        assert!(matches!(
            swapchain.present_semaphore(3),
            Err(RenderError::ImageIndex { index: 3, count: 3 })
        ));
    }
}
