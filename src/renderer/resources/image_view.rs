use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::core::context::Context;
use crate::renderer::resources::image::{depth_aspect, is_depth_format};

#[derive(Debug, Clone, Copy)]
pub struct ImageViewConfig {
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub view_type: vk::ImageViewType,
    pub base_mip_level: u32,
    pub level_count: u32,
}

impl ImageViewConfig {
    /// Whole-image 2D view, picking the aspect from the format
    pub fn for_format(format: vk::Format) -> Self {
        let aspect = if is_depth_format(format) {
            depth_aspect(format)
        } else {
            vk::ImageAspectFlags::COLOR
        };
        Self {
            format,
            aspect,
            view_type: vk::ImageViewType::TYPE_2D,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
        }
    }
}

pub struct ImageView {
    pub handle: vk::ImageView,
    pub format: vk::Format,
    device: Arc<ash::Device>,
}

impl ImageView {
    pub fn new(
        ctx: &Context,
        image: vk::Image,
        config: &ImageViewConfig,
    ) -> Result<Self> {
        let info = vk::ImageViewCreateInfo::default()
            .view_type(config.view_type)
            .image(image)
            .format(config.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: config.aspect,
                base_mip_level: config.base_mip_level,
                level_count: config.level_count,
                base_array_layer: 0,
                layer_count: 1,
            });
        let handle = unsafe { ctx.device.create_image_view(&info, None)? };

        Ok(Self {
            handle,
            format: config.format,
            device: ctx.device.clone(),
        })
    }

    pub fn destroy(&mut self) {
        if self.handle != vk::ImageView::null() {
            unsafe { self.device.destroy_image_view(self.handle, None) };
            self.handle = vk::ImageView::null();
        }
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.destroy();
    }
}
