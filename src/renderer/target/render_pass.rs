use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::core::context::Context;
use crate::renderer::resources::image::{has_stencil, is_depth_format};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentConfig {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

impl AttachmentConfig {
    /// Cleared color attachment handed to the presentation engine afterwards
    pub fn color_present(format: vk::Format) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Cleared color attachment that later passes sample from
    pub fn color_sampled(format: vk::Format) -> Self {
        Self {
            final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ..Self::color_present(format)
        }
    }

    pub fn depth(format: vk::Format) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }

    pub fn is_depth(&self) -> bool {
        is_depth_format(self.format)
    }

    fn description(&self) -> vk::AttachmentDescription {
        let stencil_load_op = if has_stencil(self.format) {
            self.load_op
        } else {
            vk::AttachmentLoadOp::DONT_CARE
        };
        vk::AttachmentDescription::default()
            .format(self.format)
            .samples(self.samples)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .stencil_load_op(stencil_load_op)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(self.initial_layout)
            .final_layout(self.final_layout)
    }
}

/// Attachment indices a subpass writes, reads as input attachments and keeps intact
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubpassConfig {
    pub outputs: Vec<u32>,
    pub inputs: Vec<u32>,
    pub preserve: Vec<u32>,
    pub depth_stencil: Option<u32>,
}

impl SubpassConfig {
    fn writes(&self, attachment: u32) -> bool {
        self.outputs.contains(&attachment) || self.depth_stencil == Some(attachment)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderPassConfig {
    pub attachments: Vec<AttachmentConfig>,
    pub subpasses: Vec<SubpassConfig>,
}

impl RenderPassConfig {
    /// Single subpass drawing into a presentable color attachment, with an optional depth
    /// attachment at index 1
    pub fn presentable(color_format: vk::Format, depth_format: Option<vk::Format>) -> Self {
        let mut attachments = vec![AttachmentConfig::color_present(color_format)];
        let mut subpass = SubpassConfig {
            outputs: vec![0],
            ..Default::default()
        };
        if let Some(depth_format) = depth_format {
            attachments.push(AttachmentConfig::depth(depth_format));
            subpass.depth_stencil = Some(1);
        }
        Self {
            attachments,
            subpasses: vec![subpass],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.subpasses.is_empty() {
            return Err(eyre!("Render pass needs at least one subpass"));
        }
        let count = self.attachments.len() as u32;
        for (index, subpass) in self.subpasses.iter().enumerate() {
            let referenced = subpass.outputs
                .iter()
                .chain(&subpass.inputs)
                .chain(&subpass.preserve)
                .chain(subpass.depth_stencil.iter());
            for attachment in referenced {
                if *attachment >= count {
                    return Err(eyre!(
                        "Subpass {index} references attachment {attachment} but only {count} exist"
                    ));
                }
            }
            if let Some(output) = subpass.outputs
                .iter()
                .find(|a| self.attachments[**a as usize].is_depth())
            {
                return Err(eyre!("Subpass {index} uses depth attachment {output} as a color output"));
            }
            if let Some(depth) = subpass.depth_stencil {
                if !self.attachments[depth as usize].is_depth() {
                    return Err(eyre!("Subpass {index} uses color attachment {depth} as depth"));
                }
            }
        }
        Ok(())
    }

    /// External dependencies around the whole pass plus one by-region dependency from the
    /// most recent subpass writing an input attachment to the subpass reading it
    pub fn dependencies(&self) -> Vec<vk::SubpassDependency> {
        let Some(last) = self.subpasses.len().checked_sub(1) else {
            return Vec::new();
        };
        let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let attachment_writes = vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;

        let mut dependencies = vec![vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: attachment_stages | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            dst_stage_mask: attachment_stages,
            // The depth image is shared by every frame in flight and cleared each frame
            src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_access_mask: attachment_writes,
            dependency_flags: vk::DependencyFlags::empty(),
        }];

        for (consumer, subpass) in self.subpasses.iter().enumerate() {
            let mut producers = subpass.inputs
                .iter()
                .filter_map(|input| {
                    self.subpasses[..consumer]
                        .iter()
                        .rposition(|earlier| earlier.writes(*input))
                })
                .collect::<Vec<_>>();
            producers.sort_unstable();
            producers.dedup();

            dependencies.extend(producers.into_iter().map(|producer| vk::SubpassDependency {
                src_subpass: producer as u32,
                dst_subpass: consumer as u32,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access_mask: attachment_writes,
                dst_access_mask: vk::AccessFlags::INPUT_ATTACHMENT_READ,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            }));
        }

        dependencies.push(vk::SubpassDependency {
            src_subpass: last as u32,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE
                | vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::SHADER_READ,
            dependency_flags: vk::DependencyFlags::empty(),
        });

        dependencies
    }
}

pub struct RenderPass {
    pub handle: vk::RenderPass,
    config: RenderPassConfig,
    device: Arc<ash::Device>,
}

impl RenderPass {
    pub fn new(ctx: &Context, config: RenderPassConfig) -> Result<Self> {
        config.validate()?;

        let attachments = config.attachments
            .iter()
            .map(AttachmentConfig::description)
            .collect::<Vec<_>>();

        let reference = |attachment: u32, layout: vk::ImageLayout| vk::AttachmentReference {
            attachment,
            layout,
        };
        let color_refs = config.subpasses
            .iter()
            .map(|subpass| {
                subpass.outputs
                    .iter()
                    .map(|a| reference(*a, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let input_refs = config.subpasses
            .iter()
            .map(|subpass| {
                subpass.inputs
                    .iter()
                    .map(|a| {
                        let layout = if config.attachments[*a as usize].is_depth() {
                            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
                        } else {
                            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                        };
                        reference(*a, layout)
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let depth_refs = config.subpasses
            .iter()
            .map(|subpass| {
                subpass.depth_stencil
                    .map(|a| reference(a, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL))
            })
            .collect::<Vec<_>>();

        let subpasses = config.subpasses
            .iter()
            .enumerate()
            .map(|(i, subpass)| {
                let mut description = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&color_refs[i])
                    .input_attachments(&input_refs[i])
                    .preserve_attachments(&subpass.preserve);
                if let Some(depth) = depth_refs[i].as_ref() {
                    description = description.depth_stencil_attachment(depth);
                }
                description
            })
            .collect::<Vec<_>>();

        let dependencies = config.dependencies();
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let handle = unsafe { ctx.device.create_render_pass(&info, None)? };
        log::debug!(
            "Created render pass {:?} with {} attachments and {} subpasses",
            handle,
            config.attachments.len(),
            config.subpasses.len(),
        );

        Ok(Self {
            handle,
            config,
            device: ctx.device.clone(),
        })
    }

    pub fn config(&self) -> &RenderPassConfig {
        &self.config
    }

    pub fn attachment_count(&self) -> usize {
        self.config.attachments.len()
    }

    pub fn color_attachment_count(&self, subpass: u32) -> Result<u32> {
        Ok(self.subpass(subpass)?.outputs.len() as u32)
    }

    pub fn has_depth(&self, subpass: u32) -> Result<bool> {
        Ok(self.subpass(subpass)?.depth_stencil.is_some())
    }

    /// One clear value per attachment, in attachment order
    pub fn clear_values(&self, color: [f32; 4]) -> Vec<vk::ClearValue> {
        self.config.attachments
            .iter()
            .map(|attachment| {
                if attachment.is_depth() {
                    vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                    }
                } else {
                    vk::ClearValue {
                        color: vk::ClearColorValue { float32: color },
                    }
                }
            })
            .collect()
    }

    fn subpass(&self, subpass: u32) -> Result<&SubpassConfig> {
        self.config.subpasses
            .get(subpass as usize)
            .ok_or_else(|| eyre!("Render pass has no subpass {subpass}"))
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gbuffer_config() -> RenderPassConfig {
        RenderPassConfig {
            attachments: vec![
                AttachmentConfig::color_present(vk::Format::B8G8R8A8_SRGB),
                AttachmentConfig::color_sampled(vk::Format::R16G16B16A16_SFLOAT),
                AttachmentConfig::depth(vk::Format::D32_SFLOAT),
            ],
            subpasses: vec![
                SubpassConfig {
                    outputs: vec![1],
                    depth_stencil: Some(2),
                    ..Default::default()
                },
                SubpassConfig {
                    outputs: vec![0],
                    inputs: vec![1, 2],
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn forward_pass_gets_external_dependencies_only() {
        let config = RenderPassConfig::presentable(vk::Format::B8G8R8A8_SRGB, Some(vk::Format::D32_SFLOAT));
        config.validate().unwrap();

        let dependencies = config.dependencies();
        assert_eq!(dependencies.len(), 2);
        assert_eq!(dependencies[0].src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dependencies[0].dst_subpass, 0);
        // Last frame's depth writes finish before this frame clears the shared depth image
        assert!(dependencies[0].src_stage_mask.contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
        assert!(dependencies[0].src_access_mask.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(dependencies[0].dst_access_mask.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert_eq!(dependencies[1].src_subpass, 0);
        assert_eq!(dependencies[1].dst_subpass, vk::SUBPASS_EXTERNAL);
    }

    #[test]
    fn input_attachments_depend_on_their_producer() {
        let config = gbuffer_config();
        config.validate().unwrap();

        let dependencies = config.dependencies();
        // Both inputs come from subpass 0, so they share one edge
        assert_eq!(dependencies.len(), 3);
        let internal = dependencies
            .iter()
            .find(|d| d.src_subpass == 0 && d.dst_subpass == 1)
            .unwrap();
        assert_eq!(internal.dependency_flags, vk::DependencyFlags::BY_REGION);
        assert_eq!(internal.dst_access_mask, vk::AccessFlags::INPUT_ATTACHMENT_READ);
        assert_eq!(dependencies.last().unwrap().src_subpass, 1);
    }

    #[test]
    fn out_of_range_attachments_are_rejected() {
        let mut config = RenderPassConfig::presentable(vk::Format::B8G8R8A8_SRGB, None);
        config.subpasses[0].inputs.push(4);
        assert!(config.validate().is_err());

        let mut config = RenderPassConfig::presentable(vk::Format::B8G8R8A8_SRGB, None);
        config.subpasses[0].depth_stencil = Some(0);
        assert!(config.validate().is_err());
    }
}
