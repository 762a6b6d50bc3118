use std::ffi::CStr;
use ash::vk;
use color_eyre::Result;

/// Platform window as seen by the renderer
pub trait WindowSurface {
    /// Instance extensions the platform needs before a surface can be created
    fn required_extensions(&self) -> Result<Vec<&'static CStr>>;

    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR>;

    /// Current framebuffer size in pixels. Zero in either dimension while minimized.
    fn framebuffer_size(&self) -> (u32, u32);
}

/// Owns a `VkSurfaceKHR` together with the loader needed to query and destroy it.
/// Must be dropped before the instance that created it.
pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: ash::khr::surface::Instance,
}

/// Everything the swap chain needs to know about what a surface can do on a device
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl Surface {
    pub fn new(
        window: &dyn WindowSurface,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<Self> {
        let handle = window.create_surface(entry, instance)?;
        let loader = ash::khr::surface::Instance::new(entry, instance);
        Ok(Self {
            handle,
            loader,
        })
    }

    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> bool {
        unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.handle,
            )
        }.unwrap_or(false)
    }

    pub fn support(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<SurfaceSupport> {
        let (
            capabilities,
            formats,
            present_modes,
        ) = unsafe {
            (
                self.loader.get_physical_device_surface_capabilities(physical_device, self.handle)?,
                self.loader.get_physical_device_surface_formats(physical_device, self.handle)?,
                self.loader.get_physical_device_surface_present_modes(physical_device, self.handle)?,
            )
        };
        Ok(SurfaceSupport {
            capabilities,
            formats,
            present_modes,
        })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        if self.handle != vk::SurfaceKHR::null() {
            unsafe {
                self.loader.destroy_surface(self.handle, None);
            }
            self.handle = vk::SurfaceKHR::null();
        }
    }
}
