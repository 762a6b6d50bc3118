use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use smallvec::SmallVec;
use crate::renderer::config::{RecordMode, RendererConfig};
use crate::renderer::core::context::Context;
use crate::renderer::core::surface::{Surface, WindowSurface};
use crate::renderer::frame::pacer::{FrameDriver, FrameOutcome, FramePacer, Recreation, SubmitExtras};
use crate::renderer::frame::sync::FrameSyncObjects;
use crate::renderer::resources::image::{Image, ImageConfig};
use crate::renderer::resources::image_view::{ImageView, ImageViewConfig};
use crate::renderer::scene::node::{Renderable, Scene};
use crate::renderer::target::render_pass::{RenderPass, RenderPassConfig};
use crate::renderer::target::render_target::RenderTarget;
use crate::renderer::target::swapchain::{
    default_image_view_factory,
    prefer_low_latency,
    AcquireOutcome,
    PresentOutcome,
    SwapChain,
    SwapChainConfig,
};

struct DepthBuffer {
    view: ImageView,
    image: Image,
}

impl DepthBuffer {
    fn new(ctx: &Context, extent: vk::Extent2D, format: vk::Format) -> Result<Self> {
        let image = Image::new(ctx, &ImageConfig::depth(extent, format))?;
        let view = ImageView::new(ctx, image.handle, &ImageViewConfig::for_format(format))?;
        Ok(Self {
            view,
            image,
        })
    }
}

/// One attachment chain per swap chain image: its color view followed by the shared depth view
fn attachment_chains(swap_chain: &SwapChain, depth: &DepthBuffer) -> Vec<Vec<vk::ImageView>> {
    swap_chain
        .views()
        .iter()
        .map(|view| vec![view.handle, depth.view.handle])
        .collect()
}

/// The properties of a swap chain that the rest of the presentation is sized by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChainShape {
    image_count: usize,
    frames_in_flight: usize,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl ChainShape {
    fn of(swap_chain: &SwapChain) -> Self {
        Self {
            image_count: swap_chain.image_count(),
            frames_in_flight: swap_chain.frames_in_flight(),
            format: swap_chain.format().format,
            extent: swap_chain.extent(),
        }
    }
}

/// Work left after the swap chain itself was rebuilt. The depth buffer and render target are
/// always rebuilt since they reference the new images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecreationPlan {
    reallocate_command_buffers: bool,
    rebuild_sync: bool,
}

fn plan_recreation(before: &ChainShape, after: &ChainShape) -> Result<RecreationPlan> {
    if before.format != after.format {
        return Err(eyre!(
            "Surface format changed from {:?} to {:?}, the render pass no longer matches",
            before.format,
            after.format,
        ));
    }
    Ok(RecreationPlan {
        reallocate_command_buffers: before.image_count != after.image_count,
        rebuild_sync: before.frames_in_flight != after.frames_in_flight,
    })
}

/// Everything that is rebuilt together with the swap chain. Fields drop top to bottom.
struct Presentation {
    command_buffers: Vec<vk::CommandBuffer>,
    recorded: Vec<bool>,
    sync: FrameSyncObjects,
    render_target: RenderTarget,
    depth: DepthBuffer,
    render_pass: RenderPass,
    swap_chain: SwapChain,

    window: Arc<dyn WindowSurface>,
    config: RendererConfig,
    ctx: Arc<Context>,
}

impl Presentation {
    fn new(
        ctx: Arc<Context>,
        surface: Surface,
        window: Arc<dyn WindowSurface>,
        config: RendererConfig,
    ) -> Result<Self> {
        let mut swap_chain = SwapChain::with_surface(&ctx, surface)?;
        swap_chain.create_rendering_resources(
            &ctx,
            &swap_chain_config(window.as_ref(), &config),
            &default_image_view_factory,
        )?;

        let render_pass = RenderPass::new(
            &ctx,
            RenderPassConfig::presentable(swap_chain.format().format, Some(config.depth_format)),
        )?;
        let depth = DepthBuffer::new(&ctx, swap_chain.extent(), config.depth_format)?;
        let render_target = RenderTarget::new(
            &ctx,
            &render_pass,
            swap_chain.extent(),
            &attachment_chains(&swap_chain, &depth),
        )?;
        let sync = FrameSyncObjects::new(ctx.device.clone(), swap_chain.frames_in_flight())?;
        let command_buffers = ctx.allocate_command_buffers(swap_chain.image_count() as u32)?;

        Ok(Self {
            recorded: vec![false; command_buffers.len()],
            command_buffers,
            sync,
            render_target,
            depth,
            render_pass,
            swap_chain,

            window,
            config,
            ctx,
        })
    }

    fn recreate(&mut self) -> Result<Recreation> {
        let (width, height) = self.window.framebuffer_size();
        if width == 0 || height == 0 {
            return Ok(Recreation::Deferred);
        }

        self.ctx.wait_idle()?;
        let before = ChainShape {
            frames_in_flight: self.sync.len(),
            ..ChainShape::of(&self.swap_chain)
        };

        // Framebuffers reference the views about to be destroyed
        self.render_target.destroy();
        self.swap_chain.create_rendering_resources(
            &self.ctx,
            &swap_chain_config(self.window.as_ref(), &self.config),
            &default_image_view_factory,
        )?;
        let after = ChainShape::of(&self.swap_chain);
        let plan = plan_recreation(&before, &after)?;

        self.depth = DepthBuffer::new(&self.ctx, after.extent, self.config.depth_format)?;
        log::debug!("Rebuilt depth buffer {:?}", self.depth.image.handle);
        self.render_target = RenderTarget::new(
            &self.ctx,
            &self.render_pass,
            after.extent,
            &attachment_chains(&self.swap_chain, &self.depth),
        )?;

        if plan.reallocate_command_buffers {
            log::warn!(
                "Swap chain image count changed from {} to {}",
                before.image_count,
                after.image_count,
            );
            self.ctx.free_command_buffers(&self.command_buffers)?;
            self.command_buffers = self.ctx.allocate_command_buffers(after.image_count as u32)?;
        }
        self.recorded = vec![false; after.image_count];

        if plan.rebuild_sync {
            self.sync = FrameSyncObjects::new(self.ctx.device.clone(), after.frames_in_flight)?;
        }

        Ok(Recreation::Rebuilt)
    }

    fn record<T: Renderable>(&mut self, scene: &mut Scene<T>, image_index: u32) -> Result<()> {
        let image = image_index as usize;
        scene.prepare(image)?;
        if self.config.record_mode == RecordMode::Once && self.recorded[image] {
            return Ok(());
        }

        let device = self.ctx.device.clone();
        let cmd = self.command_buffers[image];
        let extent = self.render_target.extent();
        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        let clear_values = self.render_pass.clear_values(self.config.clear_color);
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass.handle)
            .framebuffer(self.render_target.framebuffer(image)?)
            .render_area(render_area)
            .clear_values(&clear_values);
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())?;
            device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);
        }
        let drawn = scene.record(&device, cmd, image);
        unsafe {
            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)?;
        }
        drawn?;

        self.recorded[image] = true;
        Ok(())
    }

    fn submit(&mut self, slot: usize, image_index: u32, extras: &SubmitExtras) -> Result<()> {
        let fence = self.sync.fence(slot)?;

        let mut wait_semaphores: SmallVec<[vk::Semaphore; 4]> =
            SmallVec::from_elem(self.swap_chain.image_available(slot)?, 1);
        let mut wait_stages: SmallVec<[vk::PipelineStageFlags; 4]> =
            SmallVec::from_elem(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT, 1);
        for (semaphore, stage) in &extras.waits {
            wait_semaphores.push(*semaphore);
            wait_stages.push(*stage);
        }
        let mut signal_semaphores: SmallVec<[vk::Semaphore; 4]> =
            SmallVec::from_elem(self.sync.render_finished(slot)?, 1);
        signal_semaphores.extend(extras.signals.iter().copied());

        let command_buffers = [self.command_buffers[image_index as usize]];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        self.sync.reset(slot)?;
        unsafe {
            self.ctx.device.queue_submit(self.ctx.graphics_queue.handle, &[submit_info], fence)?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let queue = self.ctx.present_queue()?.handle;
        let render_finished = self.sync.render_finished(slot)?;
        self.swap_chain.present(queue, image_index, &[render_finished])
    }
}

impl Drop for Presentation {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            log::error!("Failed to wait for the device before releasing frame resources: {e}");
        }
        if let Err(e) = self.ctx.free_command_buffers(&self.command_buffers) {
            log::error!("Failed to free frame command buffers: {e}");
        }
    }
}

fn swap_chain_config(window: &dyn WindowSurface, config: &RendererConfig) -> SwapChainConfig {
    let (width, height) = window.framebuffer_size();
    SwapChainConfig {
        present_mode_fn: if config.vsync { None } else { Some(prefer_low_latency) },
        window_extent: vk::Extent2D { width, height },
        max_frames_in_flight: config.max_frames_in_flight,
        ..Default::default()
    }
}

/// Drives one frame of a scene through the presentation resources
struct SceneDriver<'a, T> {
    presentation: &'a mut Presentation,
    scene: &'a mut Scene<T>,
}

impl<T: Renderable> FrameDriver for SceneDriver<'_, T> {
    fn slot_count(&self) -> usize {
        self.presentation.sync.len()
    }

    fn image_count(&self) -> usize {
        self.presentation.swap_chain.image_count()
    }

    fn wait_slot(&mut self, slot: usize) -> Result<()> {
        self.presentation.sync.wait(slot)
    }

    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.presentation.swap_chain.acquire_next_image(slot)
    }

    fn record(&mut self, _slot: usize, image_index: u32) -> Result<()> {
        self.presentation.record(self.scene, image_index)
    }

    fn submit(&mut self, slot: usize, image_index: u32, extras: &SubmitExtras) -> Result<()> {
        self.presentation.submit(slot, image_index, extras)
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        self.presentation.present(slot, image_index)
    }

    fn recreate(&mut self) -> Result<Recreation> {
        self.presentation.recreate()
    }
}

/// Renders scenes into a window surface with a depth buffer and several frames in flight
pub struct WindowRenderer {
    pacer: FramePacer,
    presentation: Presentation,
}

impl WindowRenderer {
    pub fn new(
        ctx: Arc<Context>,
        surface: Surface,
        window: Arc<dyn WindowSurface>,
        config: RendererConfig,
    ) -> Result<Self> {
        let presentation = Presentation::new(ctx, surface, window, config)?;
        let pacer = FramePacer::new(
            presentation.sync.len(),
            presentation.swap_chain.image_count(),
        )?;
        Ok(Self {
            pacer,
            presentation,
        })
    }

    pub fn draw_scene<T: Renderable>(
        &mut self,
        scene: &mut Scene<T>,
        extras: &SubmitExtras,
    ) -> Result<FrameOutcome> {
        let mut driver = SceneDriver {
            presentation: &mut self.presentation,
            scene,
        };
        self.pacer.draw_frame(&mut driver, extras)
    }

    /// Forwards a window resize. The swap chain is rebuilt after the next present.
    pub fn set_framebuffer_resized(&mut self, resized: bool) {
        self.pacer.set_resized(resized);
    }

    /// Forces every command buffer to be recorded again before its next use
    pub fn invalidate_commands(&mut self) {
        self.presentation.recorded.fill(false);
    }

    pub fn render_pass(&self) -> &RenderPass {
        &self.presentation.render_pass
    }

    /// Number of swap chain images, which is also the number of per-image uniform copies needed
    pub fn image_count(&self) -> usize {
        self.presentation.swap_chain.image_count()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.presentation.sync.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.presentation.swap_chain.extent()
    }

    pub fn swap_chain_generation(&self) -> u64 {
        self.presentation.swap_chain.generation()
    }

    pub fn frame(&self) -> u64 {
        self.pacer.frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(image_count: usize, frames_in_flight: usize) -> ChainShape {
        ChainShape {
            image_count,
            frames_in_flight,
            format: vk::Format::B8G8R8A8_SRGB,
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
        }
    }

    #[test]
    fn unchanged_chain_keeps_command_buffers_and_sync() {
        let plan = plan_recreation(&shape(3, 2), &shape(3, 2)).unwrap();
        assert_eq!(plan, RecreationPlan {
            reallocate_command_buffers: false,
            rebuild_sync: false,
        });

        let mut resized = shape(3, 2);
        resized.extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        assert_eq!(plan_recreation(&shape(3, 2), &resized).unwrap(), plan);
    }

    #[test]
    fn image_count_change_reallocates_command_buffers() {
        let plan = plan_recreation(&shape(3, 2), &shape(4, 2)).unwrap();
        assert!(plan.reallocate_command_buffers);
        assert!(!plan.rebuild_sync);
    }

    #[test]
    fn frames_in_flight_change_rebuilds_sync() {
        // A chain that shrank to one image can only keep one frame in flight
        let plan = plan_recreation(&shape(2, 2), &shape(1, 1)).unwrap();
        assert!(plan.reallocate_command_buffers);
        assert!(plan.rebuild_sync);
    }

    #[test]
    fn format_change_is_an_error() {
        let mut after = shape(3, 2);
        after.format = vk::Format::R8G8B8A8_UNORM;
        assert!(plan_recreation(&shape(3, 2), &after).is_err());
    }
}
