use std::collections::BTreeMap;
use std::sync::Arc;
use ash::vk;
use bytemuck::Pod;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use crate::renderer::core::context::Context;
use crate::renderer::descriptor::layout::{missing_bindings, DescriptorSetLayout};
use crate::renderer::descriptor::pool::DescriptorPool;
use crate::renderer::descriptor::updater::{check_write, DescriptorSetUpdater, DescriptorUpdater};
use crate::renderer::resources::buffer::{Buffer, BufferConfig, MapMode};

/// Writes queued per copy until the next flush, plus what each copy has had written so far
#[derive(Debug)]
pub struct PendingWrites {
    queued: Vec<DescriptorSetUpdater>,
    written: Vec<BTreeMap<u32, u32>>,
}

impl PendingWrites {
    pub fn new(copies: usize) -> Self {
        Self {
            queued: (0..copies).map(|_| DescriptorSetUpdater::new()).collect(),
            written: vec![BTreeMap::new(); copies],
        }
    }

    pub fn queue(&mut self, copy: usize, binding: u32, updater: DescriptorUpdater) -> Result<()> {
        let copies = self.queued.len();
        self.queued
            .get_mut(copy)
            .ok_or_else(|| eyre!("Descriptor copy {copy} requested but only {copies} exist"))?
            .bind_descriptor(binding, updater);
        Ok(())
    }

    /// Hands out the batch queued for `copy` and records its bindings as written
    pub fn take(&mut self, copy: usize) -> Option<DescriptorSetUpdater> {
        let batch = std::mem::take(self.queued.get_mut(copy)?);
        if batch.is_empty() {
            return None;
        }
        self.written[copy].extend(batch.written_counts());
        Some(batch)
    }

    pub fn written(&self, copy: usize) -> Option<&BTreeMap<u32, u32>> {
        self.written.get(copy)
    }
}

/// One descriptor set per copy, indexed by swap chain image, with optional uniform buffers
/// that are duplicated per copy so the CPU never writes memory an in-flight frame reads
pub struct DescriptorSetBuffer {
    uniform_buffers: BTreeMap<u32, Vec<Buffer>>,
    sets: Vec<vk::DescriptorSet>,
    writes: PendingWrites,
    layout: Arc<DescriptorSetLayout>,
    device: Arc<ash::Device>,
}

impl DescriptorSetBuffer {
    pub fn new(
        ctx: &Context,
        pool: &mut DescriptorPool,
        layout: Arc<DescriptorSetLayout>,
        copies: usize,
    ) -> Result<Self> {
        if copies == 0 {
            return Err(eyre!("Descriptor set buffer needs at least one copy"));
        }
        let sets = pool.allocate_many(&layout, copies as u32)?;

        Ok(Self {
            uniform_buffers: BTreeMap::new(),
            writes: PendingWrites::new(sets.len()),
            sets,
            layout,
            device: ctx.device.clone(),
        })
    }

    pub fn copy_count(&self) -> usize {
        self.sets.len()
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    pub fn set(&self, copy: usize) -> Result<vk::DescriptorSet> {
        self.sets
            .get(copy)
            .copied()
            .ok_or_else(|| eyre!("Descriptor copy {copy} requested but only {} exist", self.sets.len()))
    }

    /// Creates one host-visible uniform buffer of `size` bytes per copy and points `binding` at it
    pub fn bind_uniform_buffers(
        &mut self,
        ctx: &Context,
        binding: u32,
        size: u64,
    ) -> Result<()> {
        let buffers = (0..self.sets.len())
            .map(|copy| Buffer::new(ctx, &BufferConfig::uniform(size, format!("Uniform binding {binding} copy {copy}"))))
            .collect::<Result<Vec<_>>>()?;
        for (copy, buffer) in buffers.iter().enumerate() {
            self.bind(copy, binding, DescriptorUpdater::uniform_buffer(buffer))?;
        }
        self.uniform_buffers.insert(binding, buffers);
        Ok(())
    }

    /// Writes the same payload into every copy
    pub fn bind_all(&mut self, binding: u32, updater: DescriptorUpdater) -> Result<()> {
        for copy in 0..self.sets.len() {
            self.bind(copy, binding, updater.clone())?;
        }
        Ok(())
    }

    /// Queues a write for one copy. Nothing reaches the device until `flush`.
    pub fn bind(&mut self, copy: usize, binding: u32, updater: DescriptorUpdater) -> Result<()> {
        check_write(self.layout.bindings(), binding, &updater)?;
        self.writes.queue(copy, binding, updater)
    }

    /// Issues one descriptor update per copy covering everything queued for it
    pub fn flush(&mut self) {
        for (copy, set) in self.sets.iter().enumerate() {
            if let Some(mut batch) = self.writes.take(copy) {
                batch.flush(&self.device, *set);
            }
        }
    }

    /// Writes `value` into the uniform buffer of `binding` for one copy. The caller must make
    /// sure no submitted frame that reads this copy is still executing.
    pub fn update_uniform<T: Pod>(
        &mut self,
        copy: usize,
        binding: u32,
        value: &T,
    ) -> Result<()> {
        let buffer = self.uniform_buffers
            .get_mut(&binding)
            .ok_or_eyre(format!("Binding {binding} has no uniform buffers"))?
            .get_mut(copy)
            .ok_or_eyre(format!("Uniform copy {copy} does not exist"))?;
        buffer.update(bytemuck::bytes_of(value), MapMode::LeaveMapped)
    }

    /// Fails when a binding that is not partial has not been fully written and flushed for `copy`
    pub fn ensure_complete(&self, copy: usize) -> Result<()> {
        let written = self.writes
            .written(copy)
            .ok_or_else(|| eyre!("Descriptor copy {copy} does not exist"))?;
        let missing = missing_bindings(self.layout.bindings(), written);
        if !missing.is_empty() {
            return Err(eyre!("Descriptor copy {copy} is missing bindings {:?}", missing));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn sampler(raw: u64) -> DescriptorUpdater {
        DescriptorUpdater::sampler(vk::Sampler::from_raw(raw))
    }

    #[test]
    fn each_copy_flushes_all_its_bindings_at_once() {
        let mut writes = PendingWrites::new(2);
        for copy in 0..2 {
            writes.queue(copy, 0, sampler(1)).unwrap();
            writes.queue(copy, 1, sampler(2)).unwrap();
            writes.queue(copy, 2, sampler(3)).unwrap();
        }

        for copy in 0..2 {
            let batch = writes.take(copy).unwrap();
            assert_eq!(batch.pending().count(), 3);
            assert_eq!(writes.written(copy).unwrap().len(), 3);
        }
        assert!(writes.take(0).is_none());
    }

    #[test]
    fn queued_writes_do_not_count_until_taken() {
        let mut writes = PendingWrites::new(1);
        writes.queue(0, 4, sampler(1)).unwrap();
        assert!(writes.written(0).unwrap().is_empty());
        assert!(writes.queue(1, 0, sampler(1)).is_err());

        writes.take(0).unwrap();
        assert_eq!(writes.written(0).unwrap().get(&4), Some(&1));
    }
}
