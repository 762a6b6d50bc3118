use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use crate::renderer::core::context::Context;
use crate::renderer::pipeline::material::Material;
use crate::renderer::resources::vertex::VertexBufferLayout;
use crate::renderer::target::render_pass::RenderPass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputAssemblyConfig {
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart: bool,
}

impl Default for InputAssemblyConfig {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerConfig {
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
    pub depth_clamp: bool,
}

impl Default for RasterizerConfig {
    fn default() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            depth_clamp: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthConfig {
    pub test: bool,
    pub write: bool,
    pub compare_op: vk::CompareOp,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            test: true,
            write: true,
            compare_op: vk::CompareOp::LESS_OR_EQUAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Opaque,
    // Make sure transparent objects are drawn after the opaque ones
    Alpha,
    Additive,
}

impl BlendMode {
    pub fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        match self {
            BlendMode::Opaque => state.blend_enable(false),
            BlendMode::Alpha => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD),
            BlendMode::Additive => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::ONE)
                .dst_color_blend_factor(vk::BlendFactor::DST_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD),
        }
    }
}

/// Immutable graphics pipeline and the layout it was built with
pub struct Pipeline {
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    vertex_layout: VertexBufferLayout,
    material: Arc<Material>,
    device: Arc<ash::Device>,
}

impl Pipeline {
    pub fn material(&self) -> &Arc<Material> {
        &self.material
    }

    pub fn vertex_layout(&self) -> &VertexBufferLayout {
        &self.vertex_layout
    }

    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.handle);
        }
    }

    pub fn bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                first_set,
                descriptor_sets,
                &[],
            );
        }
    }

    pub fn push_constants(
        &self,
        cmd: vk::CommandBuffer,
        stage_flags: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device.cmd_push_constants(cmd, self.layout, stage_flags, offset, data);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.handle, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

struct DrawableInput {
    material: Arc<Material>,
    vertex_layout: VertexBufferLayout,
    input_assembly: InputAssemblyConfig,
}

struct RenderPassBinding {
    handle: vk::RenderPass,
    subpass: u32,
    color_attachments: u32,
    has_depth: bool,
}

/// Staged construction of a graphics pipeline. Viewport and scissor are dynamic unless
/// configured statically.
pub struct PipelineBuilder {
    drawable_input: Option<DrawableInput>,
    rasterizer: RasterizerConfig,
    dynamic_states: Vec<vk::DynamicState>,
    viewport: Option<vk::Viewport>,
    scissor: Option<vk::Rect2D>,
    depth: DepthConfig,
    blend: BlendMode,
    samples: vk::SampleCountFlags,
    render_pass: Option<RenderPassBinding>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            drawable_input: None,
            rasterizer: RasterizerConfig::default(),
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            viewport: None,
            scissor: None,
            depth: DepthConfig::default(),
            blend: BlendMode::default(),
            samples: vk::SampleCountFlags::TYPE_1,
            render_pass: None,
        }
    }

    pub fn configure_drawable_input(
        mut self,
        material: Arc<Material>,
        vertex_layout: VertexBufferLayout,
        input_assembly: InputAssemblyConfig,
    ) -> Self {
        self.drawable_input = Some(DrawableInput {
            material,
            vertex_layout,
            input_assembly,
        });
        self
    }

    /// Replaces the default fill, back-face culling, counter-clockwise state
    pub fn configure_rasterizer(mut self, config: RasterizerConfig) -> Self {
        self.rasterizer = config;
        self
    }

    pub fn configure_dynamic_states(mut self, states: &[vk::DynamicState]) -> Self {
        self.dynamic_states = states.to_vec();
        self
    }

    /// Fixes the viewport into the pipeline and stops treating it as dynamic
    pub fn configure_viewport(mut self, viewport: vk::Viewport) -> Self {
        self.viewport = Some(viewport);
        self.dynamic_states.retain(|s| *s != vk::DynamicState::VIEWPORT);
        self
    }

    pub fn configure_scissor(mut self, scissor: vk::Rect2D) -> Self {
        self.scissor = Some(scissor);
        self.dynamic_states.retain(|s| *s != vk::DynamicState::SCISSOR);
        self
    }

    pub fn configure_depth(mut self, depth: DepthConfig) -> Self {
        self.depth = depth;
        self
    }

    pub fn configure_blending(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn configure_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn configure_render_pass(mut self, render_pass: &RenderPass, subpass: u32) -> Result<Self> {
        self.render_pass = Some(RenderPassBinding {
            handle: render_pass.handle,
            subpass,
            color_attachments: render_pass.color_attachment_count(subpass)?,
            has_depth: render_pass.has_depth(subpass)?,
        });
        Ok(self)
    }

    pub fn material(&self) -> Option<&Arc<Material>> {
        self.drawable_input.as_ref().map(|input| &input.material)
    }

    /// Fails when a required stage has not been configured
    pub fn check_ready(&self) -> Result<()> {
        if self.drawable_input.is_none() {
            return Err(eyre!("Pipeline builder has no drawable input configured"));
        }
        if self.render_pass.is_none() {
            return Err(eyre!("Pipeline builder has no render pass configured"));
        }
        let dynamic_viewport = self.dynamic_states.contains(&vk::DynamicState::VIEWPORT);
        let dynamic_scissor = self.dynamic_states.contains(&vk::DynamicState::SCISSOR);
        if !dynamic_viewport && self.viewport.is_none() {
            return Err(eyre!("Viewport must be either dynamic or configured"));
        }
        if !dynamic_scissor && self.scissor.is_none() {
            return Err(eyre!("Scissor must be either dynamic or configured"));
        }
        Ok(())
    }

    pub fn create_pipeline(self, ctx: &Context) -> Result<Pipeline> {
        self.check_ready()?;
        let input = self.drawable_input.ok_or_eyre("Missing drawable input")?;
        let rasterizer = self.rasterizer;
        let render_pass = self.render_pass.ok_or_eyre("Missing render pass")?;
        let device = ctx.device.clone();

        let set_layouts = input.material
            .set_layouts()
            .iter()
            .map(|layout| layout.handle)
            .collect::<Vec<_>>();
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(input.material.push_constants());
        let pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None)? };

        let shader_stages = input.material.stage_infos();

        let bindings = [input.vertex_layout.binding_description(0)];
        let attributes = input.vertex_layout.attribute_descriptions(0);
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(input.input_assembly.topology)
            .primitive_restart_enable(input.input_assembly.primitive_restart);

        let viewports = self.viewport.map(|v| [v]);
        let scissors = self.scissor.map(|s| [s]);
        let mut viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        if let Some(viewports) = viewports.as_ref() {
            viewport_state = viewport_state.viewports(viewports);
        }
        if let Some(scissors) = scissors.as_ref() {
            viewport_state = viewport_state.scissors(scissors);
        }

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(rasterizer.depth_clamp)
            .rasterizer_discard_enable(false)
            .polygon_mode(rasterizer.polygon_mode)
            .line_width(rasterizer.line_width)
            .cull_mode(rasterizer.cull_mode)
            .front_face(rasterizer.front_face)
            .depth_bias_enable(false);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(self.samples)
            .min_sample_shading(1.0);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth.test && render_pass.has_depth)
            .depth_write_enable(self.depth.write && render_pass.has_depth)
            .depth_compare_op(self.depth.compare_op)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false);

        let blend_attachments = vec![self.blend.attachment_state(); render_pass.color_attachments as usize];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&blend_attachments);

        let dynamic_info = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&self.dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .layout(pipeline_layout)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .depth_stencil_state(&depth_stencil)
            .dynamic_state(&dynamic_info)
            .render_pass(render_pass.handle)
            .subpass(render_pass.subpass);

        let created = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        let handle = match created {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(pipeline_layout, None) };
                return Err(eyre!("Failed to create graphics pipeline: {e}"));
            }
        };

        Ok(Pipeline {
            handle,
            layout: pipeline_layout,
            vertex_layout: input.vertex_layout,
            material: input.material,
            device,
        })
    }
}
