use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use crate::renderer::config::ContextConfig;
use crate::renderer::core::allocator::MemoryAllocator;
use crate::renderer::core::command::{CommandBufferFactory, OneTimeCommandRunner};
use crate::renderer::core::device::{self, DeviceFeatures};
use crate::renderer::core::instance::Instance;
use crate::renderer::core::queue::{Queue, QueueFamilyIndices};
use crate::renderer::core::surface::{Surface, WindowSurface};

/// Owns the instance, the logical device and the per-device allocators.
/// Every other wrapper is created from a context and must be dropped before it.
pub struct Context {
    one_time: ManuallyDrop<Mutex<OneTimeCommandRunner>>,
    command_factory: ManuallyDrop<Mutex<CommandBufferFactory>>,
    allocator: MemoryAllocator,

    pub device: Arc<ash::Device>,
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: DeviceFeatures,
    pub queue_families: QueueFamilyIndices,

    pub graphics_queue: Queue,
    pub present_queue: Option<Queue>,
    pub compute_queue: Option<Queue>,
    pub transfer_queue: Option<Queue>,

    pub instance: Instance,
}

impl Context {
    /// Creates the context and, when a window is given, the surface bound to it
    pub fn new(
        config: &ContextConfig,
        window: Option<&dyn WindowSurface>,
    ) -> Result<(Self, Option<Surface>)> {
        let instance = Instance::new(config, window)?;

        let surface = match window {
            Some(window) => Some(Surface::new(window, &instance.entry, &instance.raw)?),
            None => None,
        };

        let info = device::select_physical_device(&instance.raw, surface.as_ref())?;
        let logical_device = Arc::new(device::create_logical_device(
            &instance.raw,
            &info,
            surface.is_some(),
        )?);

        let get_queue = |family: u32| unsafe {
            Queue::new(family, logical_device.get_device_queue(family, 0))
        };
        let graphics_queue = get_queue(
            info.queue_families.graphics.ok_or_eyre("Device has no graphics queue")?
        );
        let present_queue = info.queue_families.present.map(get_queue);
        let compute_queue = info.queue_families.compute.map(get_queue);
        let transfer_queue = info.queue_families.transfer.map(get_queue);

        let allocator = MemoryAllocator::new(
            &instance.raw,
            logical_device.clone(),
            info.handle,
        )?;

        // Layout transitions to fragment shader stages need a graphics capable queue
        let one_time = OneTimeCommandRunner::new(graphics_queue, logical_device.clone())?;
        let command_factory = CommandBufferFactory::new(logical_device.clone());

        Ok((
            Self {
                one_time: ManuallyDrop::new(Mutex::new(one_time)),
                command_factory: ManuallyDrop::new(Mutex::new(command_factory)),
                allocator,
                device: logical_device,
                physical_device: info.handle,
                properties: info.properties,
                features: info.features,
                queue_families: info.queue_families,
                graphics_queue,
                present_queue,
                compute_queue,
                transfer_queue,
                instance,
            },
            surface,
        ))
    }

    pub fn allocator(&self) -> &MemoryAllocator {
        &self.allocator
    }

    pub fn present_queue(&self) -> Result<Queue> {
        self.present_queue.ok_or_eyre("Context was created without a presentation queue")
    }

    /// Records commands through `func`, submits them and waits for completion
    pub fn run_one_time<F>(
        &self,
        func: F,
    ) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        self.one_time
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .submit(func)
    }

    /// Allocates resettable primary command buffers for the graphics queue
    pub fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        self.command_factory
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(self.graphics_queue.family, count)
    }

    pub fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) -> Result<()> {
        self.command_factory
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .free(self.graphics_queue.family, command_buffers)
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            log::error!("Failed to wait for device idle during shutdown: {e}");
        }
        unsafe {
            ManuallyDrop::drop(&mut self.one_time);
            ManuallyDrop::drop(&mut self.command_factory);
        }
        if let Err(e) = self.allocator.shutdown() {
            log::error!("{e}");
        }
        unsafe {
            self.device.destroy_device(None);
        }
        log::debug!("Destroyed logical device");
    }
}
