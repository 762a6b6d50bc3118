use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};

/// Where a buffer or image lives and who gets to touch it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryResidency {
    GpuOnly,
    CpuToGpu,
    GpuToCpu,
}

impl MemoryResidency {
    pub fn location(self) -> MemoryLocation {
        match self {
            MemoryResidency::GpuOnly => MemoryLocation::GpuOnly,
            MemoryResidency::CpuToGpu => MemoryLocation::CpuToGpu,
            MemoryResidency::GpuToCpu => MemoryLocation::GpuToCpu,
        }
    }

    pub fn is_host_visible(self) -> bool {
        self != MemoryResidency::GpuOnly
    }
}

/// Shared handle to the device's sub-allocator. Cloning shares the same allocator.
#[derive(Clone)]
pub struct MemoryAllocator {
    inner: Arc<Mutex<Option<Allocator>>>,
    live: Arc<AtomicUsize>,
    device: Arc<ash::Device>,
}

impl MemoryAllocator {
    pub fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: true,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(Self {
            inner: Arc::new(Mutex::new(Some(allocator))),
            live: Arc::new(AtomicUsize::new(0)),
            device,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Allocator>>> {
        self.inner.lock().map_err(|e| eyre!(e.to_string()))
    }

    pub fn create_buffer(
        &self,
        info: &vk::BufferCreateInfo,
        residency: MemoryResidency,
        name: &str,
    ) -> Result<(vk::Buffer, Allocation)> {
        let buffer = unsafe { self.device.create_buffer(info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(name, requirements, residency, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free(allocation);
            return Err(e.into());
        }

        Ok((buffer, allocation))
    }

    pub fn create_image(
        &self,
        info: &vk::ImageCreateInfo,
        residency: MemoryResidency,
        name: &str,
    ) -> Result<(vk::Image, Allocation)> {
        let image = unsafe { self.device.create_image(info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.allocate(name, requirements, residency, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device.bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_image(image, None) };
            self.free(allocation);
            return Err(e.into());
        }

        Ok((image, allocation))
    }

    /// Destroys the buffer and returns its memory. Null handles are ignored so this may run twice.
    pub fn destroy_buffer(
        &self,
        buffer: &mut vk::Buffer,
        allocation: &mut Option<Allocation>,
    ) {
        if *buffer != vk::Buffer::null() {
            unsafe { self.device.destroy_buffer(*buffer, None) };
            *buffer = vk::Buffer::null();
        }
        if let Some(allocation) = allocation.take() {
            self.free(allocation);
        }
    }

    pub fn destroy_image(
        &self,
        image: &mut vk::Image,
        allocation: &mut Option<Allocation>,
    ) {
        if *image != vk::Image::null() {
            unsafe { self.device.destroy_image(*image, None) };
            *image = vk::Image::null();
        }
        if let Some(allocation) = allocation.take() {
            self.free(allocation);
        }
    }

    pub fn live_allocations(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Tears down the sub-allocator. Reports an error when allocations are still alive.
    pub fn shutdown(&self) -> Result<()> {
        let allocator = self.lock()?.take();
        let live = self.live_allocations();
        // Dropping the allocator frees its memory blocks and logs leaks
        drop(allocator);
        if live > 0 {
            return Err(eyre!("{live} allocations were still alive at shutdown"));
        }
        Ok(())
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        residency: MemoryResidency,
        linear: bool,
    ) -> Result<Allocation> {
        let mut guard = self.lock()?;
        let allocator = guard
            .as_mut()
            .ok_or_eyre("Memory allocator has already been shut down")?;
        let allocation = allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: residency.location(),
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        self.live.fetch_add(1, Ordering::AcqRel);
        Ok(allocation)
    }

    fn free(&self, allocation: Allocation) {
        match self.lock() {
            Ok(mut guard) => {
                if let Some(allocator) = guard.as_mut() {
                    if let Err(e) = allocator.free(allocation) {
                        log::error!("Failed to free allocation: {e}");
                    }
                }
                self.live.fetch_sub(1, Ordering::AcqRel);
            }
            Err(e) => log::error!("Failed to free allocation: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_gpu_only_memory_is_hidden_from_host() {
        assert!(!MemoryResidency::GpuOnly.is_host_visible());
        assert!(MemoryResidency::CpuToGpu.is_host_visible());
        assert!(MemoryResidency::GpuToCpu.is_host_visible());
        assert_eq!(MemoryResidency::CpuToGpu.location(), MemoryLocation::CpuToGpu);
    }
}
