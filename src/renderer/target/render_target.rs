use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::core::context::Context;
use crate::renderer::target::render_pass::RenderPass;

/// Fails unless every chain carries exactly one view per render pass attachment
pub fn check_chains(expected: usize, chains: &[Vec<vk::ImageView>]) -> Result<()> {
    if chains.is_empty() {
        return Err(eyre!("Render target needs at least one attachment chain"));
    }
    for (index, chain) in chains.iter().enumerate() {
        if chain.len() != expected {
            return Err(eyre!(
                "Attachment chain {index} has {} views but the render pass expects {expected}",
                chain.len(),
            ));
        }
    }
    Ok(())
}

/// One framebuffer per attachment chain, all sharing a render pass and an extent
pub struct RenderTarget {
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
    device: Arc<ash::Device>,
}

impl RenderTarget {
    pub fn new(
        ctx: &Context,
        render_pass: &RenderPass,
        extent: vk::Extent2D,
        chains: &[Vec<vk::ImageView>],
    ) -> Result<Self> {
        check_chains(render_pass.attachment_count(), chains)?;

        let mut target = Self {
            framebuffers: Vec::with_capacity(chains.len()),
            extent,
            device: ctx.device.clone(),
        };
        for chain in chains {
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.handle)
                .attachments(chain)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            // Framebuffers created so far are released by Drop on failure
            let framebuffer = unsafe { ctx.device.create_framebuffer(&info, None)? };
            target.framebuffers.push(framebuffer);
        }
        log::debug!(
            "Created {} framebuffers of {}x{}",
            target.framebuffers.len(),
            extent.width,
            extent.height,
        );

        Ok(target)
    }

    pub fn framebuffer(&self, index: usize) -> Result<vk::Framebuffer> {
        self.framebuffers
            .get(index)
            .copied()
            .ok_or_else(|| eyre!("Render target has no framebuffer {index}"))
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    pub fn destroy(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe {
                self.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn view(raw: u64) -> vk::ImageView {
        vk::ImageView::from_raw(raw)
    }

    #[test]
    fn chains_must_match_attachment_count() {
        let chains = vec![vec![view(1), view(9)], vec![view(2), view(9)]];
        assert!(check_chains(2, &chains).is_ok());

        let error = check_chains(3, &chains).unwrap_err();
        assert!(error.to_string().contains("chain 0"));
    }

    #[test]
    fn empty_chain_list_is_rejected() {
        assert!(check_chains(1, &[]).is_err());
    }
}
