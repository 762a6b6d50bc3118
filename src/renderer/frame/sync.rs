use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;

pub fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    Ok(unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? })
}

/// A `signaled` fence lets the first wait on it return immediately
pub fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    Ok(unsafe { device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None)? })
}

fn check_slot_count(slots: usize) -> Result<()> {
    if slots == 0 {
        return Err(eyre!("At least one frame in flight is required"));
    }
    Ok(())
}

fn slot_handle<T: Copy>(handles: &[T], slot: usize, what: &str) -> Result<T> {
    handles
        .get(slot)
        .copied()
        .ok_or_else(|| eyre!("No {what} for slot {slot}, only {} slots exist", handles.len()))
}

/// Per slot render-finished semaphores and in-flight fences. Image-available semaphores
/// belong to the swap chain because they are consumed by acquisition.
pub struct FrameSyncObjects {
    render_finished: Vec<vk::Semaphore>,
    in_flight: Vec<vk::Fence>,
    device: Arc<ash::Device>,
}

impl FrameSyncObjects {
    pub fn new(device: Arc<ash::Device>, slots: usize) -> Result<Self> {
        check_slot_count(slots)?;
        let mut sync = Self {
            render_finished: Vec::with_capacity(slots),
            in_flight: Vec::with_capacity(slots),
            device,
        };
        for _ in 0..slots {
            sync.render_finished.push(create_semaphore(&sync.device)?);
            sync.in_flight.push(create_fence(&sync.device, true)?);
        }
        log::debug!("Created synchronization objects for {slots} frames in flight");
        Ok(sync)
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn fence(&self, slot: usize) -> Result<vk::Fence> {
        slot_handle(&self.in_flight, slot, "in-flight fence")
    }

    pub fn render_finished(&self, slot: usize) -> Result<vk::Semaphore> {
        slot_handle(&self.render_finished, slot, "render-finished semaphore")
    }

    /// Blocks until the last submission made with `slot` has finished
    pub fn wait(&self, slot: usize) -> Result<()> {
        let fence = self.fence(slot)?;
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX)? };
        Ok(())
    }

    pub fn reset(&self, slot: usize) -> Result<()> {
        let fence = self.fence(slot)?;
        unsafe { self.device.reset_fences(&[fence])? };
        Ok(())
    }
}

impl Drop for FrameSyncObjects {
    fn drop(&mut self) {
        unsafe {
            for semaphore in self.render_finished.drain(..) {
                self.device.destroy_semaphore(semaphore, None);
            }
            for fence in self.in_flight.drain(..) {
                self.device.destroy_fence(fence, None);
            }
        }
    }
}
