use std::{fmt, path::Path};

use ash::vk;
use catalyst_scene::{IndirectDrawData, RenderObject};

use crate::{
    allocator::AllocatedBuffer,
    culling::{Frustum, cull_render_objects},
    error::RenderResult,
    pipelines::{
        GraphicsPipelineBuilder, PipelineLayoutInfo, build_compute_pipeline,
        create_pipeline_layout, load_shader_module,
    },
    shader_data::DrawPushConstants,
    upload::SceneBuffers,
};

pub const CULL_GROUP_SIZE: u32 = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    Traditional,
    Indirect,
}

impl StrategyKind {
    pub fn from_indirect(indirect: bool) -> Self {
        if indirect {
            StrategyKind::Indirect
        } else {
            StrategyKind::Traditional
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            StrategyKind::Traditional => StrategyKind::Indirect,
            StrategyKind::Indirect => StrategyKind::Traditional,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Traditional => write!(f, "traditional (CPU culling, push constants)"),
            StrategyKind::Indirect => write!(f, "indirect (GPU culling, draw indirect)"),
        }
    }
}

/// Handles shared by both strategies while a frame is being recorded.
pub struct FrameContext<'a> {
    pub device: &'a ash::Device,
    pub cmd: vk::CommandBuffer,
    pub frame_set: vk::DescriptorSet,
    pub material_set: vk::DescriptorSet,
    pub extent: vk::Extent2D,
    pub buffers: &'a SceneBuffers,
}

/// Layouts and formats every strategy pipeline is built against.
pub struct PipelineTargets<'a> {
    pub shader_dir: &'a Path,
    pub frame_layout: vk::DescriptorSetLayout,
    pub material_layout: vk::DescriptorSetLayout,
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
}

pub trait DrawStrategy {
    fn kind(&self) -> StrategyKind;

    /// Writes whatever per-frame data the strategy needs beyond the scene
    /// uniform block.
    fn upload_scene_data(
        &self,
        frustum: &Frustum,
        object_count: u32,
        culling_buffer: &mut AllocatedBuffer,
    ) -> RenderResult<()>;

    /// Runs before rendering begins. May record commands.
    fn cull(&self, frame: &FrameContext<'_>, frustum: &Frustum, objects: &mut [RenderObject]);

    /// Runs inside the dynamic rendering pass.
    fn draw(&self, frame: &FrameContext<'_>, objects: &[RenderObject]);

    fn destroy(&mut self, device: &ash::Device);
}

fn set_viewport_and_scissor(device: &ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    };
    unsafe {
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[scissor]);
    }
}

fn bind_graphics(
    frame: &FrameContext<'_>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
) {
    let device = frame.device;
    unsafe {
        device.cmd_bind_pipeline(frame.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        device.cmd_bind_descriptor_sets(
            frame.cmd,
            vk::PipelineBindPoint::GRAPHICS,
            layout,
            0,
            &[frame.frame_set, frame.material_set],
            &[],
        );
        device.cmd_bind_index_buffer(
            frame.cmd,
            frame.buffers.indices.buffer,
            0,
            vk::IndexType::UINT32,
        );
    }
    set_viewport_and_scissor(device, frame.cmd, frame.extent);
}

fn graphics_pipeline(
    device: &ash::Device,
    targets: &PipelineTargets<'_>,
    vertex_shader: &str,
    layout: vk::PipelineLayout,
) -> RenderResult<vk::Pipeline> {
    let vertex = load_shader_module(device, &targets.shader_dir.join(vertex_shader))?;
    let fragment = match load_shader_module(device, &targets.shader_dir.join("main.frag.spv")) {
        Ok(module) => module,
        Err(e) => {
            unsafe { device.destroy_shader_module(vertex, None) };
            return Err(e);
        }
    };

    let pipeline = GraphicsPipelineBuilder::default()
        .shaders(vertex, fragment)
        .cull_mode(vk::CullModeFlags::NONE, vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_test(true, vk::CompareOp::GREATER_OR_EQUAL)
        .color_format(targets.color_format)
        .depth_format(targets.depth_format)
        .layout(layout)
        .build(device);

    unsafe {
        device.destroy_shader_module(vertex, None);
        device.destroy_shader_module(fragment, None);
    }
    pipeline
}

/// CPU culling, then one push constant and one `draw_indexed` per
/// visible object.
pub struct TraditionalDraw {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl TraditionalDraw {
    pub fn new(device: &ash::Device, targets: &PipelineTargets<'_>) -> RenderResult<Self> {
        let push_constants = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: std::mem::size_of::<DrawPushConstants>() as u32,
        }];
        let layout = create_pipeline_layout(
            device,
            PipelineLayoutInfo {
                set_layouts: &[targets.frame_layout, targets.material_layout],
                push_constants: &push_constants,
            },
        )?;
        let pipeline = match graphics_pipeline(device, targets, "main.vert.spv", layout) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };
        Ok(Self { pipeline, layout })
    }
}

impl DrawStrategy for TraditionalDraw {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Traditional
    }

    fn upload_scene_data(
        &self,
        _frustum: &Frustum,
        _object_count: u32,
        _culling_buffer: &mut AllocatedBuffer,
    ) -> RenderResult<()> {
        Ok(())
    }

    fn cull(&self, _frame: &FrameContext<'_>, frustum: &Frustum, objects: &mut [RenderObject]) {
        let visible = cull_render_objects(frustum, objects);
        log::trace!("CPU culling kept {visible}/{} objects", objects.len());
    }

    fn draw(&self, frame: &FrameContext<'_>, objects: &[RenderObject]) {
        bind_graphics(frame, self.pipeline, self.layout);

        for object in objects.iter().filter(|o| o.visible) {
            let constants = DrawPushConstants {
                model: object.model_matrix,
                material_index: object.material_index,
                _pad: [0; 3],
            };
            unsafe {
                frame.device.cmd_push_constants(
                    frame.cmd,
                    self.layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&constants),
                );
                frame
                    .device
                    .cmd_draw_indexed(frame.cmd, object.index_count, 1, object.first_index, 0, 0);
            }
        }
    }

    fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Compute culling writes instance counts into the indirect buffer, then
/// a single `draw_indexed_indirect` covers the whole scene.
pub struct IndirectDraw {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    cull_pipeline: vk::Pipeline,
    cull_layout: vk::PipelineLayout,
}

impl IndirectDraw {
    pub fn new(device: &ash::Device, targets: &PipelineTargets<'_>) -> RenderResult<Self> {
        let layout = create_pipeline_layout(
            device,
            PipelineLayoutInfo {
                set_layouts: &[targets.frame_layout, targets.material_layout],
                push_constants: &[],
            },
        )?;
        let cull_layout = create_pipeline_layout(
            device,
            PipelineLayoutInfo {
                set_layouts: &[targets.frame_layout],
                push_constants: &[],
            },
        )?;

        let mut strategy = Self {
            pipeline: vk::Pipeline::null(),
            layout,
            cull_pipeline: vk::Pipeline::null(),
            cull_layout,
        };

        // destroy() skips null pipelines, so a half-built strategy cleans up
        match strategy.build_pipelines(device, targets) {
            Ok(()) => Ok(strategy),
            Err(e) => {
                strategy.destroy(device);
                Err(e)
            }
        }
    }

    fn build_pipelines(
        &mut self,
        device: &ash::Device,
        targets: &PipelineTargets<'_>,
    ) -> RenderResult<()> {
        self.pipeline = graphics_pipeline(device, targets, "indirect.vert.spv", self.layout)?;

        let module = load_shader_module(device, &targets.shader_dir.join("cull.comp.spv"))?;
        let cull_pipeline = build_compute_pipeline(device, module, self.cull_layout);
        unsafe { device.destroy_shader_module(module, None) };
        self.cull_pipeline = cull_pipeline?;
        Ok(())
    }
}

pub fn cull_group_count(object_count: u32) -> u32 {
    object_count.div_ceil(CULL_GROUP_SIZE)
}

impl DrawStrategy for IndirectDraw {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Indirect
    }

    fn upload_scene_data(
        &self,
        frustum: &Frustum,
        object_count: u32,
        culling_buffer: &mut AllocatedBuffer,
    ) -> RenderResult<()> {
        culling_buffer.write(&[frustum.to_gpu(object_count)])
    }

    fn cull(&self, frame: &FrameContext<'_>, _frustum: &Frustum, _objects: &mut [RenderObject]) {
        let count = frame.buffers.object_count;
        if count == 0 {
            return;
        }

        let device = frame.device;

        // The previous frame's indirect draw may still be reading the buffer.
        let before = [vk::BufferMemoryBarrier2::default()
            .src_stage_mask(
                vk::PipelineStageFlags2::DRAW_INDIRECT | vk::PipelineStageFlags2::VERTEX_SHADER,
            )
            .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
            .dst_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(frame.buffers.indirect.buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE)];
        unsafe {
            device.cmd_pipeline_barrier2(
                frame.cmd,
                &vk::DependencyInfo::default().buffer_memory_barriers(&before),
            );
        }

        unsafe {
            device.cmd_bind_pipeline(frame.cmd, vk::PipelineBindPoint::COMPUTE, self.cull_pipeline);
            device.cmd_bind_descriptor_sets(
                frame.cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.cull_layout,
                0,
                &[frame.frame_set],
                &[],
            );
            device.cmd_dispatch(frame.cmd, cull_group_count(count), 1, 1);
        }

        // The draw reads the commands and the vertex shader reads the
        // records, both written just above.
        let barriers = [vk::BufferMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
            .src_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)
            .dst_stage_mask(
                vk::PipelineStageFlags2::DRAW_INDIRECT | vk::PipelineStageFlags2::VERTEX_SHADER,
            )
            .dst_access_mask(
                vk::AccessFlags2::INDIRECT_COMMAND_READ | vk::AccessFlags2::SHADER_STORAGE_READ,
            )
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(frame.buffers.indirect.buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE)];
        let dependency = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
        unsafe { device.cmd_pipeline_barrier2(frame.cmd, &dependency) };
    }

    fn draw(&self, frame: &FrameContext<'_>, _objects: &[RenderObject]) {
        let count = frame.buffers.object_count;
        if count == 0 {
            return;
        }

        bind_graphics(frame, self.pipeline, self.layout);
        unsafe {
            frame.device.cmd_draw_indexed_indirect(
                frame.cmd,
                frame.buffers.indirect.buffer,
                IndirectDrawData::COMMAND_OFFSET,
                count,
                IndirectDrawData::STRIDE,
            );
        }
    }

    fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                device.destroy_pipeline(self.pipeline, None);
            }
            if self.cull_pipeline != vk::Pipeline::null() {
                device.destroy_pipeline(self.cull_pipeline, None);
            }
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_pipeline_layout(self.cull_layout, None);
        }
    }
}
