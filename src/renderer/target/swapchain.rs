use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use crate::renderer::core::context::Context;
use crate::renderer::core::surface::{Surface, SurfaceSupport};
use crate::renderer::frame::sync::create_semaphore;
use crate::renderer::resources::image_view::{ImageView, ImageViewConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapChainState {
    Uninitialized,
    SurfaceBound,
    Ready,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired {
        image_index: u32,
        suboptimal: bool,
    },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// Each setting resolves as: explicit value, then callback, then default
#[derive(Clone)]
pub struct SwapChainConfig {
    pub image_count: Option<u32>,
    pub image_count_fn: Option<fn(&vk::SurfaceCapabilitiesKHR) -> u32>,
    pub surface_format: Option<vk::SurfaceFormatKHR>,
    pub surface_format_fn: Option<fn(&[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR>>,
    pub present_mode: Option<vk::PresentModeKHR>,
    pub present_mode_fn: Option<fn(&[vk::PresentModeKHR]) -> Option<vk::PresentModeKHR>>,
    pub extent: Option<vk::Extent2D>,
    pub extent_fn: Option<fn(&vk::SurfaceCapabilitiesKHR) -> vk::Extent2D>,

    /// Fallback when the surface does not dictate an extent
    pub window_extent: vk::Extent2D,
    pub max_frames_in_flight: usize,
    pub image_usage: vk::ImageUsageFlags,
}

impl Default for SwapChainConfig {
    fn default() -> Self {
        Self {
            image_count: None,
            image_count_fn: None,
            surface_format: None,
            surface_format_fn: None,
            present_mode: None,
            present_mode_fn: None,
            extent: None,
            extent_fn: None,
            window_extent: vk::Extent2D::default(),
            max_frames_in_flight: 2,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        }
    }
}

/// Prefers low latency modes when vsync is not wanted
pub fn prefer_low_latency(modes: &[vk::PresentModeKHR]) -> Option<vk::PresentModeKHR> {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
}

pub fn resolve_image_count(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    config: &SwapChainConfig,
) -> u32 {
    let requested = config.image_count
        .or_else(|| config.image_count_fn.map(|f| f(capabilities)))
        // Request one more than the minimum so acquiring rarely waits on the driver
        .unwrap_or(capabilities.min_image_count + 1);
    let requested = requested.max(capabilities.min_image_count).max(1);
    if capabilities.max_image_count > 0 {
        requested.min(capabilities.max_image_count)
    } else {
        requested
    }
}

pub fn resolve_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    config: &SwapChainConfig,
) -> Result<vk::SurfaceFormatKHR> {
    if let Some(format) = config.surface_format {
        return Ok(format);
    }
    if let Some(format) = config.surface_format_fn.and_then(|f| f(formats)) {
        return Ok(format);
    }
    formats
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
        .ok_or_eyre("Surface reports no formats")
}

pub fn resolve_present_mode(
    modes: &[vk::PresentModeKHR],
    config: &SwapChainConfig,
) -> vk::PresentModeKHR {
    config.present_mode
        .or_else(|| config.present_mode_fn.and_then(|f| f(modes)))
        // FIFO is the only mode every implementation must support
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn resolve_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    config: &SwapChainConfig,
) -> vk::Extent2D {
    if let Some(extent) = config.extent {
        return extent;
    }
    if let Some(extent_fn) = config.extent_fn {
        return extent_fn(capabilities);
    }
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: config.window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: config.window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// A surface can only be bound to a swap chain that has none yet
pub fn surface_bound(state: SwapChainState) -> Result<SwapChainState> {
    match state {
        SwapChainState::Uninitialized => Ok(SwapChainState::SurfaceBound),
        _ => Err(eyre!("Swap chain already has a surface ({:?})", state)),
    }
}

pub fn frames_in_flight(image_count: usize, max_frames_in_flight: usize) -> usize {
    image_count.min(max_frames_in_flight).max(1)
}

/// Builds the view for one swap chain image
pub type ImageViewFactory = dyn Fn(&Context, vk::Image, vk::Format) -> Result<ImageView>;

pub fn default_image_view_factory(
    ctx: &Context,
    image: vk::Image,
    format: vk::Format,
) -> Result<ImageView> {
    ImageView::new(ctx, image, &ImageViewConfig::for_format(format))
}

/// Presentable images of a surface plus one image-available semaphore per frame in flight.
/// Image indices handed out by `acquire_next_image` are unrelated to the slot index.
pub struct SwapChain {
    state: SwapChainState,
    handle: vk::SwapchainKHR,
    loader: ash::khr::swapchain::Device,
    images: Vec<vk::Image>,
    views: Vec<ImageView>,
    image_available: Vec<vk::Semaphore>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    generation: u64,

    surface: Option<Surface>,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
}

impl SwapChain {
    pub fn new(ctx: &Context) -> Self {
        Self {
            state: SwapChainState::Uninitialized,
            handle: vk::SwapchainKHR::null(),
            loader: ash::khr::swapchain::Device::new(&ctx.instance.raw, &ctx.device),
            images: Vec::new(),
            views: Vec::new(),
            image_available: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            generation: 0,

            surface: None,
            physical_device: ctx.physical_device,
            device: ctx.device.clone(),
        }
    }

    /// Swap chain for a surface that was created together with the context
    pub fn with_surface(ctx: &Context, surface: Surface) -> Result<Self> {
        let mut swap_chain = Self::new(ctx);
        swap_chain.bind_surface(surface)?;
        Ok(swap_chain)
    }

    pub fn bind_surface(&mut self, surface: Surface) -> Result<()> {
        self.state = surface_bound(self.state)?;
        self.surface = Some(surface);
        Ok(())
    }

    pub fn surface_support(&self) -> Result<SurfaceSupport> {
        self.surface
            .as_ref()
            .ok_or_eyre("Swap chain has no surface")?
            .support(self.physical_device)
    }

    /// Creates (or recreates) the chain, its views and its semaphores. The previous chain is
    /// handed to the driver as `old_swapchain` and destroyed right after.
    pub fn create_rendering_resources(
        &mut self,
        ctx: &Context,
        config: &SwapChainConfig,
        view_factory: &ImageViewFactory,
    ) -> Result<()> {
        if !matches!(self.state, SwapChainState::SurfaceBound | SwapChainState::Ready) {
            return Err(eyre!("Cannot create swap chain resources in state {:?}", self.state));
        }
        let surface = self.surface.as_ref().ok_or_eyre("Swap chain has no surface")?;
        let support = surface.support(self.physical_device)?;
        let capabilities = &support.capabilities;

        let min_image_count = resolve_image_count(capabilities, config);
        let format = resolve_surface_format(&support.formats, config)?;
        let present_mode = resolve_present_mode(&support.present_modes, config);
        let extent = resolve_extent(capabilities, config);

        let pre_transform = if capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            capabilities.current_transform
        };

        let graphics_family = ctx.graphics_queue.family;
        let present_family = ctx.present_queue()?.family;
        let queue_families = [graphics_family, present_family];

        let old_swapchain = self.handle;
        let mut info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle)
            .min_image_count(min_image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_usage(config.image_usage)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(old_swapchain);
        info = if graphics_family != present_family {
            info.image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_families)
        } else {
            info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let handle = unsafe { self.loader.create_swapchain(&info, None)? };
        self.destroy();
        self.handle = handle;

        self.images = unsafe { self.loader.get_swapchain_images(handle)? };
        self.views = self.images
            .iter()
            .map(|image| view_factory(ctx, *image, format.format))
            .collect::<Result<Vec<_>>>()?;
        self.image_available = (0..frames_in_flight(self.images.len(), config.max_frames_in_flight))
            .map(|_| create_semaphore(&self.device))
            .collect::<Result<Vec<_>>>()?;

        self.format = format;
        self.present_mode = present_mode;
        self.extent = extent;
        self.generation += 1;
        self.state = SwapChainState::Ready;

        log::info!(
            "Created swap chain #{}: {} images of {}x{} {:?}, {:?}, {} frames in flight",
            self.generation,
            self.images.len(),
            extent.width,
            extent.height,
            format.format,
            present_mode,
            self.image_available.len(),
        );

        Ok(())
    }

    /// Releases the chain, its views and semaphores but keeps the surface for recreation
    pub fn destroy(&mut self) {
        self.views.clear();
        self.images.clear();
        unsafe {
            for semaphore in self.image_available.drain(..) {
                self.device.destroy_semaphore(semaphore, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
            }
        }
        self.handle = vk::SwapchainKHR::null();
        if self.state == SwapChainState::Ready {
            self.state = SwapChainState::SurfaceBound;
        }
    }

    /// Waits without timeout for the next image and signals the image-available semaphore of
    /// `slot` once it may be rendered to
    pub fn acquire_next_image(&self, slot: usize) -> Result<AcquireOutcome> {
        if self.state != SwapChainState::Ready {
            return Err(eyre!("Cannot acquire from swap chain in state {:?}", self.state));
        }
        let semaphore = self.image_available(slot)?;
        let acquired = unsafe {
            self.loader.acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        };
        match acquired {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(eyre!("Failed to acquire swap chain image: {e}")),
        }
    }

    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        if self.state != SwapChainState::Ready {
            return Err(eyre!("Cannot present from swap chain in state {:?}", self.state));
        }
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(eyre!("Failed to present swap chain image {image_index}: {e}")),
        }
    }

    pub fn state(&self) -> SwapChainState {
        self.state
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn views(&self) -> &[ImageView] {
        &self.views
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Bumped every time the chain is (re)created
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn frames_in_flight(&self) -> usize {
        self.image_available.len()
    }

    pub fn image_available(&self, slot: usize) -> Result<vk::Semaphore> {
        self.image_available
            .get(slot)
            .copied()
            .ok_or_else(|| eyre!("Swap chain has no image-available semaphore for slot {slot}"))
    }
}

impl Drop for SwapChain {
    fn drop(&mut self) {
        self.destroy();
        self.surface = None;
        self.state = SwapChainState::Destroyed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_defaults_to_one_above_minimum() {
        let config = SwapChainConfig::default();
        assert_eq!(resolve_image_count(&capabilities(2, 8), &config), 3);
        assert_eq!(resolve_image_count(&capabilities(3, 3), &config), 3);
        // Zero maximum means unbounded
        assert_eq!(resolve_image_count(&capabilities(2, 0), &config), 3);
    }

    #[test]
    fn explicit_image_count_wins_over_callback() {
        let config = SwapChainConfig {
            image_count: Some(4),
            image_count_fn: Some(|_| 6),
            ..Default::default()
        };
        assert_eq!(resolve_image_count(&capabilities(2, 8), &config), 4);

        let config = SwapChainConfig {
            image_count_fn: Some(|caps| caps.max_image_count),
            ..Default::default()
        };
        assert_eq!(resolve_image_count(&capabilities(2, 8), &config), 8);
    }

    #[test]
    fn surface_format_prefers_bgra_srgb() {
        let fallback = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let preferred = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let config = SwapChainConfig::default();

        assert_eq!(resolve_surface_format(&[fallback, preferred], &config).unwrap(), preferred);
        assert_eq!(resolve_surface_format(&[fallback], &config).unwrap(), fallback);
        assert!(resolve_surface_format(&[], &config).is_err());
    }

    #[test]
    fn present_mode_defaults_to_fifo() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(resolve_present_mode(&modes, &SwapChainConfig::default()), vk::PresentModeKHR::FIFO);

        let config = SwapChainConfig {
            present_mode_fn: Some(prefer_low_latency),
            ..Default::default()
        };
        assert_eq!(resolve_present_mode(&modes, &config), vk::PresentModeKHR::MAILBOX);
        assert_eq!(resolve_present_mode(&[vk::PresentModeKHR::FIFO], &config), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_uses_surface_extent_when_defined() {
        let mut caps = capabilities(2, 3);
        let config = SwapChainConfig {
            window_extent: vk::Extent2D {
                width: 5000,
                height: 600,
            },
            ..Default::default()
        };
        assert_eq!(resolve_extent(&caps, &config), vk::Extent2D { width: 4096, height: 600 });

        caps.current_extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        assert_eq!(resolve_extent(&caps, &config), vk::Extent2D { width: 1280, height: 720 });
    }

    #[test]
    fn unchanged_window_keeps_its_extent_once_the_surface_reports_it() {
        let config = SwapChainConfig {
            window_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };

        // First creation: the surface leaves the extent to the swap chain
        let mut caps = capabilities(2, 3);
        let created = resolve_extent(&caps, &config);
        let created_count = resolve_image_count(&caps, &config);

        // Recreation at the same window size: the surface now reports the extent in use
        caps.current_extent = created;
        assert_eq!(resolve_extent(&caps, &config), vk::Extent2D { width: 800, height: 600 });
        assert_eq!(resolve_image_count(&caps, &config), created_count);

        // A different window size is ignored while the surface dictates the extent
        let resized = SwapChainConfig {
            window_extent: vk::Extent2D {
                width: 1024,
                height: 768,
            },
            ..config.clone()
        };
        assert_eq!(resolve_extent(&caps, &resized), created);
    }

    #[test]
    fn surface_binds_only_once() {
        assert_eq!(surface_bound(SwapChainState::Uninitialized).unwrap(), SwapChainState::SurfaceBound);
        assert!(surface_bound(SwapChainState::SurfaceBound).is_err());
        assert!(surface_bound(SwapChainState::Ready).is_err());
        assert!(surface_bound(SwapChainState::Destroyed).is_err());
    }

    #[test]
    fn frames_in_flight_never_exceed_images() {
        assert_eq!(frames_in_flight(3, 2), 2);
        assert_eq!(frames_in_flight(2, 4), 2);
        assert_eq!(frames_in_flight(0, 2), 1);
    }
}
