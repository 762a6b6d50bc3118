use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use gpu_allocator::vulkan::Allocation;
use crate::renderer::core::allocator::{MemoryAllocator, MemoryResidency};
use crate::renderer::core::context::Context;
use crate::renderer::resources::buffer::{Buffer, BufferConfig, MapMode};

#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub residency: MemoryResidency,
    pub name: String,
}

impl ImageConfig {
    /// Depth attachment matching a render target of `extent`
    pub fn depth(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            format,
            extent,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: depth_aspect(format),
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            residency: MemoryResidency::GpuOnly,
            name: "Depth image".into(),
        }
    }

    /// Color image that is filled once through a transfer and then sampled
    pub fn sampled_color(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            format,
            extent,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            aspect: vk::ImageAspectFlags::COLOR,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            residency: MemoryResidency::GpuOnly,
            name: "Color image".into(),
        }
    }
}

/// Bytes per texel for the formats images are uploaded in
pub fn texel_size(format: vk::Format) -> Option<usize> {
    match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => Some(1),
        vk::Format::R8G8_UNORM => Some(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

/// Size of tightly packed pixel data covering `extent` in `format`
pub fn upload_size(format: vk::Format, extent: vk::Extent2D) -> Result<usize> {
    let texel = texel_size(format)
        .ok_or_else(|| eyre!("Uploads in format {:?} are not supported", format))?;
    Ok(extent.width as usize * extent.height as usize * texel)
}

pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

pub struct Image {
    pub handle: vk::Image,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,

    allocation: Option<Allocation>,
    allocator: MemoryAllocator,
}

impl Image {
    // The returned image is not populated with any data. Unless it is an attachment,
    // call `Image::upload()` before sampling it.
    pub fn new(
        ctx: &Context,
        config: &ImageConfig,
    ) -> Result<Self> {
        if config.extent.width == 0 || config.extent.height == 0 {
            return Err(eyre!("Image {:?} has an empty extent", config.name));
        }
        let info = vk::ImageCreateInfo::default()
            .format(config.format)
            .usage(config.usage)
            .extent(vk::Extent3D {
                width: config.extent.width,
                height: config.extent.height,
                depth: 1,
            })
            .image_type(vk::ImageType::TYPE_2D)
            .mip_levels(config.mip_levels.max(1))
            .array_layers(1)
            .samples(config.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let (handle, allocation) = ctx
            .allocator()
            .create_image(&info, config.residency, &config.name)?;

        Ok(Self {
            handle,
            format: config.format,
            extent: config.extent,
            aspect: config.aspect,
            mip_levels: config.mip_levels.max(1),

            allocation: Some(allocation),
            allocator: ctx.allocator().clone(),
        })
    }

    /// Copies tightly packed pixel data into the image and leaves it shader readable
    pub fn upload(
        &mut self,
        ctx: &Context,
        data: &[u8],
    ) -> Result<()> {
        let expected = upload_size(self.format, self.extent)?;
        if data.len() != expected {
            return Err(eyre!(
                "Image of {}x{} {:?} needs {expected} bytes but got {}",
                self.extent.width,
                self.extent.height,
                self.format,
                data.len(),
            ));
        }

        let mut staging_buffer = Buffer::new(
            ctx,
            &BufferConfig::staging(data.len() as u64, "Image staging buffer"),
        )?;
        staging_buffer.update(data, MapMode::UnMap)?;

        ctx.run_one_time(|cmd, device| {
            transition_image_layout(
                device,
                cmd,
                self.handle,
                self.aspect,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );

            let copy_region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: self.aspect,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_extent: vk::Extent3D {
                    width: self.extent.width,
                    height: self.extent.height,
                    depth: 1,
                },
                ..Default::default()
            };
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging_buffer.handle,
                    self.handle,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[copy_region],
                );
            }

            transition_image_layout(
                device,
                cmd,
                self.handle,
                self.aspect,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
            Ok(())
        })
    }

    pub fn destroy(&mut self) {
        self.allocator.destroy_image(&mut self.handle, &mut self.allocation);
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Stage and access masks for the layout transitions the wrappers perform
pub fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (vk::PipelineStageFlags, vk::AccessFlags, vk::PipelineStageFlags, vk::AccessFlags) {
    match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        _ => (
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
        ),
    }
}

pub fn transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    if old_layout == new_layout {
        return;
    }

    let (src_stage, src_access, dst_stage, dst_access) = transition_masks(old_layout, new_layout);
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        })
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_get_depth_aspects() {
        assert!(is_depth_format(vk::Format::D32_SFLOAT));
        assert!(!is_depth_format(vk::Format::B8G8R8A8_SRGB));
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            depth_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        );
    }

    #[test]
    fn upload_size_follows_extent_and_format() {
        let extent = vk::Extent2D { width: 3, height: 2 };
        assert_eq!(upload_size(vk::Format::R8G8B8A8_SRGB, extent).unwrap(), 24);
        assert_eq!(upload_size(vk::Format::R32G32B32A32_SFLOAT, extent).unwrap(), 96);
        assert!(upload_size(vk::Format::BC1_RGB_UNORM_BLOCK, extent).is_err());
    }

    #[test]
    fn upload_transitions_end_in_fragment_reads() {
        let (_, _, dst_stage, dst_access) = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(dst_access, vk::AccessFlags::SHADER_READ);
    }
}
