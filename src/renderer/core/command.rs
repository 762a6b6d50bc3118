use std::collections::{hash_map, HashMap};
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::core::queue::Queue;

/// Hands out primary command buffers from one resettable pool per queue family
pub struct CommandBufferFactory {
    command_pools: HashMap<u32, vk::CommandPool>,
    allocated_command_buffers: HashMap<u32, Vec<vk::CommandBuffer>>,
    device: Arc<ash::Device>,
}

impl CommandBufferFactory {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self {
            command_pools: HashMap::new(),
            allocated_command_buffers: HashMap::new(),
            device,
        }
    }

    pub fn allocate(
        &mut self,
        queue_family: u32,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let command_pool = match self.command_pools.entry(queue_family) {
            hash_map::Entry::Vacant(entry) => {
                let pool_info = vk::CommandPoolCreateInfo::default()
                    .queue_family_index(queue_family)
                    // Allow the pool to reset individual command buffers
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
                let pool = unsafe {
                    self.device.create_command_pool(&pool_info, None)?
                };
                *entry.insert(pool)
            }
            hash_map::Entry::Occupied(entry) => *entry.get(),
        };

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(count)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffers = unsafe {
            self.device.allocate_command_buffers(&command_buffer_info)?
        };

        self.allocated_command_buffers
            .entry(queue_family)
            .or_default()
            .extend_from_slice(&command_buffers);

        Ok(command_buffers)
    }

    pub fn free(
        &mut self,
        queue_family: u32,
        command_buffers: &[vk::CommandBuffer],
    ) -> Result<()> {
        let command_pool = self.command_pools
            .get(&queue_family)
            .ok_or_eyre(format!("No command pool for queue family: {queue_family}"))?;
        unsafe {
            self.device.free_command_buffers(*command_pool, command_buffers);
        }
        if let Some(allocated) = self.allocated_command_buffers.get_mut(&queue_family) {
            allocated.retain(|cb| !command_buffers.contains(cb));
        }
        Ok(())
    }
}

impl Drop for CommandBufferFactory {
    fn drop(&mut self) {
        for (queue_family, command_pool) in self.command_pools.drain() {
            let command_buffers = self.allocated_command_buffers
                .remove(&queue_family)
                .unwrap_or_default();
            unsafe {
                if !command_buffers.is_empty() {
                    self.device.free_command_buffers(command_pool, &command_buffers);
                }
                self.device.destroy_command_pool(command_pool, None);
            }
        }
    }
}

/// Records and submits short-lived command buffers outside the frame loop, blocking until
/// the queue is idle again
pub struct OneTimeCommandRunner {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    queue: Queue,
    device: Arc<ash::Device>,
}

impl OneTimeCommandRunner {
    pub fn new(
        queue: Queue,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool = unsafe {
            device.create_command_pool(&command_pool_info, None)?
        };

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffer = match unsafe { device.allocate_command_buffers(&command_buffer_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.destroy_command_pool(command_pool, None) };
                return Err(e.into());
            }
        };

        Ok(Self {
            command_pool,
            command_buffer,
            queue,
            device,
        })
    }

    pub fn submit<F>(
        &self,
        func: F,
    ) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        let cmd = self.command_buffer;

        // This command buffer will be used exactly once before resetting
        let cmd_begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.begin_command_buffer(cmd, &cmd_begin_info)?;
        }

        let recorded = func(cmd, &self.device);

        unsafe {
            self.device.end_command_buffer(cmd)?;
        }
        if let Err(e) = recorded {
            unsafe {
                self.device.reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())?;
            }
            return Err(e);
        }

        let cmds = [cmd];
        let submit = vk::SubmitInfo::default()
            .command_buffers(&cmds);
        unsafe {
            self.device.queue_submit(self.queue.handle, &[submit], vk::Fence::null())?;
            self.device.queue_wait_idle(self.queue.handle)?;
            self.device.reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())?;
        }

        Ok(())
    }
}

impl Drop for OneTimeCommandRunner {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}
