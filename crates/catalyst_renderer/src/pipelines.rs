use std::{fs::File, path::Path};

use ash::vk;

use crate::error::{RenderError, RenderResult};

pub fn load_shader_module(device: &ash::Device, path: &Path) -> RenderResult<vk::ShaderModule> {
    let shader_error = |source| RenderError::Shader {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(shader_error)?;
    let code = ash::util::read_spv(&mut file).map_err(shader_error)?;

    let info = vk::ShaderModuleCreateInfo::default().code(&code);
    let module = unsafe { device.create_shader_module(&info, None)? };
    log::debug!("Loaded shader {}", path.display());
    Ok(module)
}

pub struct PipelineLayoutInfo<'a> {
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub push_constants: &'a [vk::PushConstantRange],
}

pub fn create_pipeline_layout(
    device: &ash::Device,
    info: PipelineLayoutInfo<'_>,
) -> RenderResult<vk::PipelineLayout> {
    let create_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(info.set_layouts)
        .push_constant_ranges(info.push_constants);
    Ok(unsafe { device.create_pipeline_layout(&create_info, None)? })
}

/// Fixed-function state for a dynamic-rendering graphics pipeline.
/// Viewport and scissor are always dynamic.
pub struct GraphicsPipelineBuilder {
    stages: Vec<(vk::ShaderStageFlags, vk::ShaderModule)>,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    depth_test: bool,
    depth_write: bool,
    depth_compare: vk::CompareOp,
    color_format: vk::Format,
    depth_format: vk::Format,
    layout: vk::PipelineLayout,
}

impl Default for GraphicsPipelineBuilder {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: false,
            depth_write: false,
            depth_compare: vk::CompareOp::ALWAYS,
            color_format: vk::Format::UNDEFINED,
            depth_format: vk::Format::UNDEFINED,
            layout: vk::PipelineLayout::null(),
        }
    }
}

impl GraphicsPipelineBuilder {
    pub fn shaders(mut self, vertex: vk::ShaderModule, fragment: vk::ShaderModule) -> Self {
        self.stages = vec![
            (vk::ShaderStageFlags::VERTEX, vertex),
            (vk::ShaderStageFlags::FRAGMENT, fragment),
        ];
        self
    }

    pub fn cull_mode(mut self, mode: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.cull_mode = mode;
        self.front_face = front_face;
        self
    }

    pub fn depth_test(mut self, write: bool, compare: vk::CompareOp) -> Self {
        self.depth_test = true;
        self.depth_write = write;
        self.depth_compare = compare;
        self
    }

    pub fn color_format(mut self, format: vk::Format) -> Self {
        self.color_format = format;
        self
    }

    pub fn depth_format(mut self, format: vk::Format) -> Self {
        self.depth_format = format;
        self
    }

    pub fn layout(mut self, layout: vk::PipelineLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn build(&self, device: &ash::Device) -> RenderResult<vk::Pipeline> {
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = self
            .stages
            .iter()
            .map(|&(stage, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage)
                    .module(module)
                    .name(c"main")
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(self.topology);
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(self.polygon_mode)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&blend_attachments);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [self.color_format];
        let mut rendering = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(self.depth_format);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .push_next(&mut rendering)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .depth_stencil_state(&depth_stencil)
            .dynamic_state(&dynamic)
            .layout(self.layout);

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| e)?;
        pipelines
            .into_iter()
            .next()
            .ok_or(RenderError::Vulkan(vk::Result::ERROR_UNKNOWN))
    }
}

pub fn build_compute_pipeline(
    device: &ash::Device,
    module: vk::ShaderModule,
    layout: vk::PipelineLayout,
) -> RenderResult<vk::Pipeline> {
    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(c"main");
    let create_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(layout);

    let pipelines = unsafe {
        device.create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
    }
    .map_err(|(_, e)| e)?;
    pipelines
        .into_iter()
        .next()
        .ok_or(RenderError::Vulkan(vk::Result::ERROR_UNKNOWN))
}
