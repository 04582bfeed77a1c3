use std::{ffi::CString, mem::ManuallyDrop, path::PathBuf};

use ash::vk;
use catalyst_core::{EngineConfig, FlyCamera};
use catalyst_scene::{DrawContext, LoadedScene};
use glam::Mat4;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::{
    allocator::{AllocatedImage, GpuAllocator},
    commands::{self, ImmediateSubmit},
    context::VulkanContext,
    culling::Frustum,
    descriptors::{DescriptorLayoutBuilder, DescriptorWriter},
    error::RenderResult,
    frame::{FRAMES_IN_FLIGHT, FrameData, FramePacer},
    materials::{MaterialSet, PlaceholderTextures, Samplers, material_constants},
    shader_data::{CullingData, GpuSceneData},
    strategy::{DrawStrategy, FrameContext, IndirectDraw, PipelineTargets, StrategyKind, TraditionalDraw},
    swapchain::Swapchain,
    upload::{SceneBuffers, upload_scene_buffers},
};

pub const DRAW_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
const CLEAR_COLOR: [f32; 4] = [0.0, 0.9, 0.8, 0.8];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The swapchain was out of date and got rebuilt. Nothing was submitted.
    SwapchainRecreated,
    /// The window has no area, so there is nothing to present to.
    Skipped,
}

/// The draw extent never exceeds the fixed offscreen attachments.
pub fn clamp_draw_extent(window: vk::Extent2D, target: vk::Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: window.width.min(target.width),
        height: window.height.min(target.height),
    }
}

struct RendererSettings {
    shader_dir: PathBuf,
    vsync: bool,
    fence_timeout_ns: u64,
    far_cull_distance: f32,
}

/// Everything built from a `LoadedScene`. Replaced wholesale on reload.
struct SceneResources {
    buffers: SceneBuffers,
    materials: MaterialSet,
    draws: DrawContext,
    traditional: TraditionalDraw,
    indirect: IndirectDraw,
}

/// Resources released by value at shutdown.
struct RenderResources {
    draw_image: AllocatedImage,
    depth_image: AllocatedImage,
    frames: Vec<FrameData>,
    placeholders: PlaceholderTextures,
    scene: Option<SceneResources>,
}

pub struct Renderer {
    settings: RendererSettings,
    allocator: GpuAllocator,
    immediate: ImmediateSubmit,
    swapchain: Swapchain,
    frame_layout: vk::DescriptorSetLayout,
    samplers: Samplers,
    resources: ManuallyDrop<RenderResources>,
    pacer: FramePacer,
    active: StrategyKind,
    window_extent: vk::Extent2D,
    resize_requested: bool,
    // dropped last
    ctx: VulkanContext,
}

impl Renderer {
    pub fn new<W: HasDisplayHandle + HasWindowHandle>(
        window: &W,
        width: u32,
        height: u32,
        config: &EngineConfig,
    ) -> RenderResult<Self> {
        let app_name =
            CString::new(config.window_title.as_str()).unwrap_or_else(|_| c"Catalyst".to_owned());
        let ctx = VulkanContext::new(window, &app_name, config.validation)?;
        let device = &ctx.device;

        let mut allocator = GpuAllocator::new(&ctx)?;
        let immediate = ImmediateSubmit::new(device, ctx.graphics_family)?;
        let swapchain = Swapchain::new(&ctx, width, height, config.vsync)?;

        let target_extent = vk::Extent3D {
            width: config.render_width.max(1),
            height: config.render_height.max(1),
            depth: 1,
        };
        let draw_image = allocator.allocate_image(
            "draw image",
            target_extent,
            DRAW_FORMAT,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            false,
        )?;
        let depth_image = allocator.allocate_image(
            "depth image",
            target_extent,
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            false,
        )?;

        let frames = (0..FRAMES_IN_FLIGHT)
            .map(|index| FrameData::new(device, &mut allocator, ctx.graphics_family, index))
            .collect::<RenderResult<Vec<_>>>()?;

        let frame_layout = {
            let mut builder = DescriptorLayoutBuilder::default();
            builder
                .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1)
                .add_binding(1, vk::DescriptorType::UNIFORM_BUFFER, 1);
            builder.build(
                device,
                vk::ShaderStageFlags::VERTEX
                    | vk::ShaderStageFlags::FRAGMENT
                    | vk::ShaderStageFlags::COMPUTE,
            )?
        };

        let samplers = Samplers::new(device)?;
        let placeholders = PlaceholderTextures::new(&mut allocator, &immediate, ctx.graphics_queue)?;

        log::info!(
            "Renderer ready: offscreen {}x{}, {} frames in flight",
            target_extent.width,
            target_extent.height,
            FRAMES_IN_FLIGHT
        );

        Ok(Self {
            settings: RendererSettings {
                shader_dir: config.shader_dir.clone(),
                vsync: config.vsync,
                fence_timeout_ns: config.fence_timeout_ns,
                far_cull_distance: config.far_cull_distance,
            },
            allocator,
            immediate,
            swapchain,
            frame_layout,
            samplers,
            resources: ManuallyDrop::new(RenderResources {
                draw_image,
                depth_image,
                frames,
                placeholders,
                scene: None,
            }),
            pacer: FramePacer::new(FRAMES_IN_FLIGHT),
            active: StrategyKind::from_indirect(config.start_with_indirect),
            window_extent: vk::Extent2D { width, height },
            resize_requested: false,
            ctx,
        })
    }

    pub fn strategy(&self) -> StrategyKind {
        self.active
    }

    pub fn toggle_strategy(&mut self) -> StrategyKind {
        self.active = self.active.toggle();
        log::info!("Draw strategy: {}", self.active);
        self.active
    }

    /// Recorded now, acted on at the start of the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.window_extent = vk::Extent2D { width, height };
        self.resize_requested = true;
    }

    pub fn draw_extent(&self) -> vk::Extent2D {
        clamp_draw_extent(self.swapchain.extent, self.resources.draw_image.extent_2d())
    }

    /// Flattens the scene under `top`, uploads its arrays and textures,
    /// and builds the pipelines of both strategies against its material
    /// layout. Any previously uploaded scene is released first.
    pub fn upload_scene(&mut self, scene: &LoadedScene, top: Mat4) -> RenderResult<()> {
        self.release_scene()?;

        let mut draws = DrawContext::new(true);
        scene.add_to_draw_context(&top, &mut draws);
        let constants = material_constants(&scene.materials);

        let device = &self.ctx.device;
        let queue = self.ctx.graphics_queue;
        let buffers = upload_scene_buffers(
            device,
            queue,
            &mut self.allocator,
            &self.immediate,
            &scene.vertices,
            &scene.indices,
            &constants,
            &draws,
        )?;

        let materials = match MaterialSet::new(
            device,
            &mut self.allocator,
            &self.immediate,
            queue,
            scene,
            &self.resources.placeholders,
            &self.samplers,
        ) {
            Ok(materials) => materials,
            Err(e) => {
                buffers.destroy(&mut self.allocator);
                return Err(e);
            }
        };

        let targets = PipelineTargets {
            shader_dir: &self.settings.shader_dir,
            frame_layout: self.frame_layout,
            material_layout: materials.layout,
            color_format: DRAW_FORMAT,
            depth_format: DEPTH_FORMAT,
        };
        let strategies = TraditionalDraw::new(device, &targets).and_then(|mut traditional| {
            match IndirectDraw::new(device, &targets) {
                Ok(indirect) => Ok((traditional, indirect)),
                Err(e) => {
                    traditional.destroy(device);
                    Err(e)
                }
            }
        });
        let (traditional, indirect) = match strategies {
            Ok(strategies) => strategies,
            Err(e) => {
                materials.destroy(device, &mut self.allocator);
                buffers.destroy(&mut self.allocator);
                return Err(e);
            }
        };

        self.resources.scene = Some(SceneResources {
            buffers,
            materials,
            draws,
            traditional,
            indirect,
        });
        Ok(())
    }

    fn release_scene(&mut self) -> RenderResult<()> {
        if let Some(mut scene) = self.resources.scene.take() {
            self.ctx.wait_idle()?;
            let device = &self.ctx.device;
            scene.traditional.destroy(device);
            scene.indirect.destroy(device);
            scene.materials.destroy(device, &mut self.allocator);
            scene.buffers.destroy(&mut self.allocator);
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> RenderResult<()> {
        self.ctx.wait_idle()?;
        self.swapchain.recreate(
            &self.ctx,
            self.window_extent.width,
            self.window_extent.height,
            self.settings.vsync,
        )?;
        self.resize_requested = false;

        let draw_extent = self.draw_extent();
        log::info!(
            "Swapchain recreated at {}x{}, drawing {}x{}",
            self.swapchain.extent.width,
            self.swapchain.extent.height,
            draw_extent.width,
            draw_extent.height
        );
        Ok(())
    }

    pub fn draw_frame(&mut self, camera: &FlyCamera) -> RenderResult<FrameOutcome> {
        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            return Ok(FrameOutcome::Skipped);
        }
        if self.resize_requested {
            self.recreate_swapchain()?;
        }

        let slot = self.pacer.current_slot();
        let timeout = self.settings.fence_timeout_ns;

        // 1. Wait
        {
            let frame = &self.resources.frames[slot];
            unsafe {
                self.ctx
                    .device
                    .wait_for_fences(&[frame.render_fence], true, timeout)?
            };
            self.pacer.fence_waited();
        }

        // 2. Update
        let view = camera.view_matrix();
        let proj = camera.projection_matrix();
        let frustum = Frustum::new(&view, &proj, self.settings.far_cull_distance);
        let frame_set = self.update_frame_data(slot, view, proj, &frustum)?;

        // 3. Acquire
        let image_available = self.resources.frames[slot].image_available;
        let acquired = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                self.swapchain.handle,
                timeout,
                image_available,
                vk::Fence::null(),
            )
        };
        let image_index = match acquired {
            Ok((index, suboptimal)) => {
                self.resize_requested |= suboptimal;
                index
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                // The fence stays signaled, so this slot can be waited on again.
                self.recreate_swapchain()?;
                return Ok(FrameOutcome::SwapchainRecreated);
            }
            Err(e) => return Err(e.into()),
        };

        let render_finished = self.swapchain.present_semaphore(image_index)?;
        let render_fence = self.resources.frames[slot].render_fence;
        unsafe { self.ctx.device.reset_fences(&[render_fence])? };

        // 4. Record
        let slot = self.pacer.begin_record()?;
        let cmd = self.record_frame(slot, image_index as usize, frame_set, &frustum)?;

        // 5. Submit
        let frame = &self.resources.frames[slot];
        let wait_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.image_available)
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)];
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(render_finished)
            .stage_mask(vk::PipelineStageFlags2::ALL_GRAPHICS)];
        let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos)
            .command_buffer_infos(&cmd_infos);
        unsafe {
            self.ctx
                .device
                .queue_submit2(self.ctx.graphics_queue, &[submit], frame.render_fence)?
        };

        // 6. Present
        let wait_semaphores = [render_finished];
        let swapchains = [self.swapchain.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let presented = unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.graphics_queue, &present_info)
        };

        // 7. Advance
        self.pacer.advance();

        match presented {
            Ok(suboptimal) => self.resize_requested |= suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => self.resize_requested = true,
            Err(e) => return Err(e.into()),
        }
        Ok(FrameOutcome::Presented)
    }

    /// Writes the scene and culling blocks and allocates a fresh set 0
    /// out of the slot's reset descriptor pools.
    fn update_frame_data(
        &mut self,
        slot: usize,
        view: Mat4,
        proj: Mat4,
        frustum: &Frustum,
    ) -> RenderResult<vk::DescriptorSet> {
        let device = &self.ctx.device;
        let resources = &mut *self.resources;
        let frame = &mut resources.frames[slot];

        let mut scene_data = GpuSceneData::new(view, proj);
        if let Some(scene) = &resources.scene {
            scene_data.vertex_buffer = scene.buffers.vertices.address;
            scene_data.material_buffer = scene.buffers.materials.address;
            scene_data.indirect_buffer = scene.buffers.indirect.address;
            scene_data.collision_buffer = scene.buffers.collisions.address;

            let strategy: &dyn DrawStrategy = match self.active {
                StrategyKind::Traditional => &scene.traditional,
                StrategyKind::Indirect => &scene.indirect,
            };
            strategy.upload_scene_data(frustum, scene.buffers.object_count, &mut frame.culling_buffer)?;
        }
        frame.scene_buffer.write(&[scene_data])?;

        frame.descriptors.reset_pools(device)?;
        let set = frame.descriptors.allocate(device, self.frame_layout)?;

        let mut writer = DescriptorWriter::default();
        writer
            .write_buffer(
                0,
                frame.scene_buffer.buffer,
                std::mem::size_of::<GpuSceneData>() as vk::DeviceSize,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
            )
            .write_buffer(
                1,
                frame.culling_buffer.buffer,
                std::mem::size_of::<CullingData>() as vk::DeviceSize,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
            );
        writer.update_set(device, set);

        Ok(set)
    }

    fn record_frame(
        &mut self,
        slot: usize,
        image_index: usize,
        frame_set: vk::DescriptorSet,
        frustum: &Frustum,
    ) -> RenderResult<vk::CommandBuffer> {
        let device = &self.ctx.device;
        let draw_extent = clamp_draw_extent(self.swapchain.extent, self.resources.draw_image.extent_2d());
        let swapchain_image = self.swapchain.images[image_index];
        let swapchain_extent = self.swapchain.extent;

        let resources = &mut *self.resources;
        let cmd = resources.frames[slot].command_buffer;
        let draw_image = &resources.draw_image;
        let depth_image = &resources.depth_image;

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }

        let mut scene = resources.scene.as_mut().map(|scene| {
            let SceneResources {
                buffers,
                materials,
                draws,
                traditional,
                indirect,
            } = scene;
            let strategy: &dyn DrawStrategy = match self.active {
                StrategyKind::Traditional => &*traditional,
                StrategyKind::Indirect => &*indirect,
            };
            let frame = FrameContext {
                device,
                cmd,
                frame_set,
                material_set: materials.set,
                extent: draw_extent,
                buffers: &*buffers,
            };
            (strategy, frame, &mut draws.surfaces)
        });

        if let Some((strategy, frame, objects)) = scene.as_mut() {
            strategy.cull(frame, frustum, objects);
        }

        commands::transition_image(
            device,
            cmd,
            draw_image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );
        let clear = vk::ClearColorValue {
            float32: CLEAR_COLOR,
        };
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(vk::REMAINING_MIP_LEVELS)
            .layer_count(vk::REMAINING_ARRAY_LAYERS);
        unsafe {
            device.cmd_clear_color_image(cmd, draw_image.image, vk::ImageLayout::GENERAL, &clear, &[range])
        };
        commands::transition_image(
            device,
            cmd,
            draw_image.image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        commands::transition_image(
            device,
            cmd,
            depth_image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        );

        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(draw_image.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)];
        // Reverse-Z: far is 0.
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(depth_image.view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 0.0,
                    stencil: 0,
                },
            });
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: draw_extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        unsafe { device.cmd_begin_rendering(cmd, &rendering_info) };
        if let Some((strategy, frame, objects)) = scene.as_ref() {
            strategy.draw(frame, objects);
        }
        unsafe { device.cmd_end_rendering(cmd) };

        commands::transition_image(
            device,
            cmd,
            draw_image.image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        commands::transition_image(
            device,
            cmd,
            swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        commands::blit_image(
            device,
            cmd,
            draw_image.image,
            swapchain_image,
            draw_extent,
            swapchain_extent,
        );
        commands::transition_image(
            device,
            cmd,
            swapchain_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        unsafe { device.end_command_buffer(cmd)? };
        Ok(cmd)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            log::error!("Failed to wait for the device before shutdown: {e}");
        }

        let device = &self.ctx.device;
        let resources = unsafe { ManuallyDrop::take(&mut self.resources) };

        if let Some(mut scene) = resources.scene {
            scene.traditional.destroy(device);
            scene.indirect.destroy(device);
            scene.materials.destroy(device, &mut self.allocator);
            scene.buffers.destroy(&mut self.allocator);
        }
        resources.placeholders.destroy(&mut self.allocator);
        self.samplers.destroy(device);
        unsafe { device.destroy_descriptor_set_layout(self.frame_layout, None) };
        for frame in resources.frames {
            frame.destroy(device, &mut self.allocator);
        }
        resources.depth_image.destroy(&mut self.allocator);
        resources.draw_image.destroy(&mut self.allocator);
        self.swapchain.destroy(&self.ctx);
        self.immediate.destroy(device);

        unsafe { self.allocator.destroy() };
        log::info!("Renderer shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_extent_is_clipped_to_the_offscreen_targets() {
        let target = vk::Extent2D {
            width: 1920,
            height: 1080,
        };

        let small = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(clamp_draw_extent(small, target), small);

        let huge = vk::Extent2D {
            width: 3840,
            height: 900,
        };
        assert_eq!(
            clamp_draw_extent(huge, target),
            vk::Extent2D {
                width: 1920,
                height: 900,
            }
        );
    }
}
