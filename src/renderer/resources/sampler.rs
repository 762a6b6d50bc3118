use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::core::context::Context;

#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    /// Ignored when the device lacks anisotropic filtering
    pub max_anisotropy: Option<f32>,
    pub max_lod: f32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: Some(16.0),
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }
}

impl SamplerConfig {
    pub fn nearest() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            max_anisotropy: None,
            ..Default::default()
        }
    }

    /// Anisotropy level to request, clamped to the device limit
    pub fn effective_anisotropy(&self, supported: bool, device_limit: f32) -> Option<f32> {
        self.max_anisotropy
            .filter(|_| supported)
            .map(|requested| requested.clamp(1.0, device_limit.max(1.0)))
    }
}

pub struct Sampler {
    pub handle: vk::Sampler,
    device: Arc<ash::Device>,
}

impl Sampler {
    pub fn new(
        ctx: &Context,
        config: &SamplerConfig,
    ) -> Result<Self> {
        let anisotropy = config.effective_anisotropy(
            ctx.features.sampler_anisotropy,
            ctx.properties.limits.max_sampler_anisotropy,
        );
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(config.mag_filter)
            .min_filter(config.min_filter)
            .mipmap_mode(config.mipmap_mode)
            .address_mode_u(config.address_mode)
            .address_mode_v(config.address_mode)
            .address_mode_w(config.address_mode)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .min_lod(0.0)
            .max_lod(config.max_lod)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK);
        let handle = unsafe { ctx.device.create_sampler(&info, None)? };

        Ok(Self {
            handle,
            device: ctx.device.clone(),
        })
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.destroy_sampler(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anisotropy_respects_device_support_and_limits() {
        let config = SamplerConfig::default();
        assert_eq!(config.effective_anisotropy(false, 16.0), None);
        assert_eq!(config.effective_anisotropy(true, 8.0), Some(8.0));
        assert_eq!(SamplerConfig::nearest().effective_anisotropy(true, 16.0), None);
    }
}
