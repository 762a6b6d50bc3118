use std::ffi::CStr;
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use vkframe::renderer::core::surface::WindowSurface;
use winit::window::Window;

/// Exposes a winit window to the renderer through `ash-window`
pub struct WinitSurface(pub Arc<Window>);

impl WindowSurface for WinitSurface {
    fn required_extensions(&self) -> Result<Vec<&'static CStr>> {
        let display_handle = self.0.display_handle()?.as_raw();
        let extensions = ash_window::enumerate_required_extensions(display_handle)?;
        Ok(extensions
            .iter()
            // ash-window hands out pointers to static null terminated extension names
            .map(|ext| unsafe { CStr::from_ptr(*ext) })
            .collect())
    }

    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR> {
        let surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.0.display_handle()?.as_raw(),
                self.0.window_handle()?.as_raw(),
                None,
            )?
        };
        Ok(surface)
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.0.inner_size();
        (size.width, size.height)
    }
}
