use ash::vk;
use color_eyre::Result;
use crate::renderer::core::context::Context;
use crate::renderer::descriptor::updater::DescriptorUpdater;
use crate::renderer::resources::image::{Image, ImageConfig};
use crate::renderer::resources::image_view::{ImageView, ImageViewConfig};
use crate::renderer::resources::sampler::{Sampler, SamplerConfig};

/// A sampled RGBA image together with its view and sampler
pub struct Texture {
    pub sampler: Sampler,
    pub view: ImageView,
    pub image: Image,
}

impl Texture {
    pub fn from_rgba8(
        ctx: &Context,
        width: u32,
        height: u32,
        pixels: &[u8],
        sampler_config: &SamplerConfig,
    ) -> Result<Self> {
        let format = vk::Format::R8G8B8A8_SRGB;
        let mut image = Image::new(
            ctx,
            &ImageConfig::sampled_color(vk::Extent2D { width, height }, format),
        )?;
        image.upload(ctx, pixels)?;
        let view = ImageView::new(ctx, image.handle, &ImageViewConfig::for_format(format))?;
        let sampler = Sampler::new(ctx, sampler_config)?;

        Ok(Self {
            sampler,
            view,
            image,
        })
    }

    pub fn from_image(
        ctx: &Context,
        image: &image::DynamicImage,
        sampler_config: &SamplerConfig,
    ) -> Result<Self> {
        let data = image.to_rgba8();
        Self::from_rgba8(ctx, data.width(), data.height(), data.as_raw(), sampler_config)
    }

    /// Single opaque white texel, for materials that are not textured
    pub fn white(ctx: &Context) -> Result<Self> {
        Self::from_rgba8(ctx, 1, 1, &[255; 4], &SamplerConfig::nearest())
    }

    pub fn image_descriptor(&self) -> DescriptorUpdater {
        DescriptorUpdater::sampled_image(self.view.handle, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }

    pub fn sampler_descriptor(&self) -> DescriptorUpdater {
        DescriptorUpdater::sampler(self.sampler.handle)
    }
}
