use std::ptr::NonNull;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_allocator::vulkan::Allocation;
use crate::renderer::core::allocator::{MemoryAllocator, MemoryResidency};
use crate::renderer::core::context::Context;

/// What to do with the host mapping once an update finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    LeaveMapped,
    UnMap,
}

#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub residency: MemoryResidency,
    pub name: String,
}

impl BufferConfig {
    pub fn uniform(size: u64, name: impl Into<String>) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
            residency: MemoryResidency::CpuToGpu,
            name: name.into(),
        }
    }

    pub fn staging(size: u64, name: impl Into<String>) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            residency: MemoryResidency::CpuToGpu,
            name: name.into(),
        }
    }
}

pub struct Buffer {
    pub handle: vk::Buffer,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    residency: MemoryResidency,
    mapped: bool,

    allocation: Option<Allocation>,
    allocator: MemoryAllocator,
}

impl Buffer {
    pub fn new(
        ctx: &Context,
        config: &BufferConfig,
    ) -> Result<Self> {
        if config.size == 0 {
            return Err(eyre!("Buffer {:?} must not be empty", config.name));
        }
        let info = vk::BufferCreateInfo::default()
            .size(config.size)
            .usage(config.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let (handle, allocation) = ctx
            .allocator()
            .create_buffer(&info, config.residency, &config.name)?;

        Ok(Self {
            handle,
            size: config.size,
            usage: config.usage,
            residency: config.residency,
            mapped: false,

            allocation: Some(allocation),
            allocator: ctx.allocator().clone(),
        })
    }

    /// Creates a device-local buffer filled with `data` through a staging copy
    pub fn new_with_data<T: Copy>(
        ctx: &Context,
        usage: vk::BufferUsageFlags,
        data: &[T],
        name: &str,
    ) -> Result<Self> {
        let size = std::mem::size_of_val(data) as u64;
        let mut staging = Buffer::new(ctx, &BufferConfig::staging(size, format!("{name} staging")))?;
        staging.update(data, MapMode::UnMap)?;

        let buffer = Buffer::new(ctx, &BufferConfig {
            size,
            usage: usage | vk::BufferUsageFlags::TRANSFER_DST,
            residency: MemoryResidency::GpuOnly,
            name: name.into(),
        })?;

        ctx.run_one_time(|cmd, device| {
            let region = vk::BufferCopy::default().size(size);
            unsafe {
                device.cmd_copy_buffer(cmd, staging.handle, buffer.handle, &[region]);
            }
            Ok(())
        })?;

        Ok(buffer)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Maps the buffer for host access. Mapping an already mapped buffer is a no-op.
    pub fn map(&mut self) -> Result<NonNull<u8>> {
        if !self.residency.is_host_visible() {
            return Err(eyre!("Cannot map a buffer that lives in GPU-only memory"));
        }
        let ptr = self.allocation
            .as_ref()
            .ok_or_eyre("Buffer has been destroyed")?
            .mapped_ptr()
            .ok_or_eyre("Host visible allocation has no mapped pointer")?;
        self.mapped = true;
        Ok(ptr.cast())
    }

    pub fn unmap(&mut self) {
        // gpu-allocator keeps host visible blocks persistently mapped
        self.mapped = false;
    }

    pub fn update<T: Copy>(
        &mut self,
        data: &[T],
        mode: MapMode,
    ) -> Result<()> {
        self.update_at(data, 0, mode)
    }

    /// Copies `data` into the buffer at byte `offset`, mapping it first if needed
    pub fn update_at<T: Copy>(
        &mut self,
        data: &[T],
        offset: usize,
        mode: MapMode,
    ) -> Result<()> {
        let ptr = self.map()?;
        let copied = copy_into_mapped(ptr, self.size as usize, data, offset);
        if mode == MapMode::UnMap {
            self.unmap();
        }
        copied.map(|_| ())
    }

    /// Contents as seen by the host, when the buffer is currently mapped
    pub fn mapped_bytes(&self) -> Option<&[u8]> {
        if !self.mapped {
            return None;
        }
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .map(|bytes| &bytes[..self.size as usize])
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.handle,
            offset: 0,
            range: self.size,
        }
    }

    pub fn destroy(&mut self) {
        self.mapped = false;
        self.allocator.destroy_buffer(&mut self.handle, &mut self.allocation);
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Copies `data` into mapped memory of `capacity` bytes starting at `offset`
pub(crate) fn copy_into_mapped<T: Copy>(
    ptr: NonNull<u8>,
    capacity: usize,
    data: &[T],
    offset: usize,
) -> Result<presser::CopyRecord> {
    let size = std::mem::size_of_val(data);
    if offset.checked_add(size).is_none_or(|end| end > capacity) {
        return Err(eyre!(
            "Writing {size} bytes at offset {offset} overflows a {capacity} byte buffer"
        ));
    }

    let mut raw_allocation = presser::RawAllocation::from_raw_parts(ptr, capacity);
    let mut slab = unsafe { raw_allocation.borrow_as_slab() };
    let copy_record = presser::copy_from_slice_to_offset(data, &mut slab, offset)?;

    Ok(copy_record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_copy_reads_back_what_was_written() {
        let mut memory = vec![0u8; 64];
        let ptr = NonNull::new(memory.as_mut_ptr()).unwrap();
        let data = [1.0f32, 2.0, 3.0, 4.0];

        copy_into_mapped(ptr, memory.len(), &data, 16).unwrap();

        let expected = bytemuck::cast_slice::<f32, u8>(&data);
        assert_eq!(&memory[16..32], expected);
        assert!(memory[..16].iter().all(|b| *b == 0));
        assert!(memory[32..].iter().all(|b| *b == 0));
    }

    #[test]
    fn later_writes_replace_earlier_ones() {
        let mut memory = vec![0u8; 8];
        let ptr = NonNull::new(memory.as_mut_ptr()).unwrap();

        copy_into_mapped(ptr, memory.len(), &[7u32, 7], 0).unwrap();
        copy_into_mapped(ptr, memory.len(), &[9u32], 4).unwrap();

        assert_eq!(&memory[..4], &7u32.to_ne_bytes());
        assert_eq!(&memory[4..], &9u32.to_ne_bytes());
    }

    #[test]
    fn oversized_writes_are_rejected() {
        let mut memory = vec![0u8; 8];
        let ptr = NonNull::new(memory.as_mut_ptr()).unwrap();

        assert!(copy_into_mapped(ptr, memory.len(), &[0u8; 9], 0).is_err());
        assert!(copy_into_mapped(ptr, memory.len(), &[0u32; 2], 4).is_err());
        assert!(copy_into_mapped(ptr, memory.len(), &[0u8; 1], usize::MAX).is_err());
    }
}
