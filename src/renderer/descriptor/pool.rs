use std::collections::BTreeMap;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::core::context::Context;
use crate::renderer::descriptor::layout::{BindingMap, DescriptorSetLayout};

/// Number of descriptors needed per descriptor type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorCounts(BTreeMap<vk::DescriptorType, u32>);

impl DescriptorCounts {
    /// Descriptors needed for `copies` sets of a layout with these bindings
    pub fn from_bindings(bindings: &BindingMap, copies: u32) -> Self {
        let mut counts = Self::default();
        for binding in bindings.values() {
            counts.add(binding.descriptor_type, binding.count * copies);
        }
        counts
    }

    pub fn add(&mut self, descriptor_type: vk::DescriptorType, count: u32) {
        if count > 0 {
            *self.0.entry(descriptor_type).or_insert(0) += count;
        }
    }

    pub fn get(&self, descriptor_type: vk::DescriptorType) -> u32 {
        self.0.get(&descriptor_type).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (vk::DescriptorType, u32)> + '_ {
        self.0.iter().map(|(ty, count)| (*ty, *count))
    }

    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        self.iter()
            .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
            .collect()
    }
}

/// Sums descriptor requirements over every layout that will be allocated from one pool
#[derive(Debug, Default)]
pub struct DescriptorPoolBuilder {
    totals: DescriptorCounts,
}

impl DescriptorPoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_layout(self, layout: &DescriptorSetLayout, copies: u32) -> Self {
        self.add_bindings(layout.bindings(), copies)
    }

    pub fn add_bindings(mut self, bindings: &BindingMap, copies: u32) -> Self {
        for (ty, count) in DescriptorCounts::from_bindings(bindings, copies).iter() {
            self.totals.add(ty, count);
        }
        self
    }

    pub fn totals(&self) -> &DescriptorCounts {
        &self.totals
    }

    /// Pool sized exactly for the accumulated totals, serving at most `max_sets` allocations
    pub fn create_pool(self, ctx: &Context, max_sets: u32) -> Result<DescriptorPool> {
        DescriptorPool::new(ctx, self.totals, max_sets)
    }
}

/// What a pool can still hand out. Pools never grow, so running out is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorBudget {
    remaining: DescriptorCounts,
    sets_remaining: u32,
}

impl DescriptorBudget {
    pub fn new(totals: DescriptorCounts, max_sets: u32) -> Self {
        Self {
            remaining: totals,
            sets_remaining: max_sets,
        }
    }

    /// Takes `sets` set allocations needing `requirements` descriptors in total.
    /// Nothing is taken when any part does not fit.
    pub fn reserve(&mut self, requirements: &DescriptorCounts, sets: u32) -> Result<()> {
        if sets > self.sets_remaining {
            return Err(eyre!(
                "Descriptor pool exhausted: {sets} sets requested, {} left",
                self.sets_remaining
            ));
        }
        for (ty, needed) in requirements.iter() {
            let left = self.remaining.get(ty);
            if needed > left {
                return Err(eyre!(
                    "Descriptor pool exhausted: {ty:?} needs {needed}, {left} left"
                ));
            }
        }

        self.sets_remaining -= sets;
        for (ty, needed) in requirements.iter() {
            if let Some(left) = self.remaining.0.get_mut(&ty) {
                *left -= needed;
            }
        }
        Ok(())
    }

    pub fn remaining(&self, descriptor_type: vk::DescriptorType) -> u32 {
        self.remaining.get(descriptor_type)
    }

    pub fn sets_remaining(&self) -> u32 {
        self.sets_remaining
    }
}

/// Fixed-capacity arena of descriptor sets. Sets live until the pool is dropped.
/// Not meant for concurrent allocation.
pub struct DescriptorPool {
    pub handle: vk::DescriptorPool,
    budget: DescriptorBudget,
    device: Arc<ash::Device>,
}

impl DescriptorPool {
    pub fn new(
        ctx: &Context,
        totals: DescriptorCounts,
        max_sets: u32,
    ) -> Result<Self> {
        if max_sets == 0 {
            return Err(eyre!("Descriptor pool must allow at least one set"));
        }
        let pool_sizes = totals.pool_sizes();
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);
        let handle = unsafe { ctx.device.create_descriptor_pool(&pool_info, None)? };
        log::debug!("Created descriptor pool for {max_sets} sets: {:?}", totals);

        Ok(Self {
            handle,
            budget: DescriptorBudget::new(totals, max_sets),
            device: ctx.device.clone(),
        })
    }

    pub fn allocate(&mut self, layout: &DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let mut sets = self.allocate_many(layout, 1)?;
        sets.pop().ok_or_else(|| eyre!("Descriptor set allocation returned nothing"))
    }

    pub fn allocate_many(
        &mut self,
        layout: &DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let Some(layouts) = repeated_layouts(layout.handle, count) else {
            return Ok(Vec::new());
        };
        let requirements = DescriptorCounts::from_bindings(layout.bindings(), count);
        self.budget.reserve(&requirements, count)?;

        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.handle)
            .set_layouts(&layouts);
        Ok(unsafe { self.device.allocate_descriptor_sets(&allocate_info)? })
    }

    pub fn budget(&self) -> &DescriptorBudget {
        &self.budget
    }
}

/// One layout handle per requested set, or nothing to allocate at all
fn repeated_layouts(layout: vk::DescriptorSetLayout, count: u32) -> Option<Vec<vk::DescriptorSetLayout>> {
    (count > 0).then(|| vec![layout; count as usize])
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::descriptor::layout::DescriptorBinding;

    const UNIFORM: vk::DescriptorType = vk::DescriptorType::UNIFORM_BUFFER;
    const COMBINED: vk::DescriptorType = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
    const SAMPLED: vk::DescriptorType = vk::DescriptorType::SAMPLED_IMAGE;

    fn bindings(entries: &[(u32, vk::DescriptorType, u32)]) -> BindingMap {
        entries
            .iter()
            .map(|(index, ty, count)| {
                (*index, DescriptorBinding::new(*ty, vk::ShaderStageFlags::ALL_GRAPHICS).with_count(*count))
            })
            .collect()
    }

    #[test]
    fn empty_requests_allocate_nothing() {
        use ash::vk::Handle;
        let layout = vk::DescriptorSetLayout::from_raw(7);
        assert!(repeated_layouts(layout, 0).is_none());
        assert_eq!(repeated_layouts(layout, 3).unwrap(), vec![layout; 3]);
    }

    #[test]
    fn totals_sum_element_counts_times_copies() {
        let camera = bindings(&[(0, UNIFORM, 1)]);
        let material = bindings(&[(0, UNIFORM, 1), (1, COMBINED, 1), (2, SAMPLED, 4)]);

        let builder = DescriptorPoolBuilder::new()
            .add_bindings(&camera, 3)
            .add_bindings(&material, 2);

        assert_eq!(builder.totals().get(UNIFORM), 3 + 2);
        assert_eq!(builder.totals().get(COMBINED), 2);
        assert_eq!(builder.totals().get(SAMPLED), 8);
        assert_eq!(builder.totals().get(vk::DescriptorType::STORAGE_BUFFER), 0);
    }

    #[test]
    fn exact_budget_is_allocatable_and_one_more_fails() {
        let camera = bindings(&[(0, UNIFORM, 1)]);
        let material = bindings(&[(0, UNIFORM, 1), (1, SAMPLED, 4)]);
        let builder = DescriptorPoolBuilder::new()
            .add_bindings(&camera, 3)
            .add_bindings(&material, 2);
        let mut budget = DescriptorBudget::new(builder.totals().clone(), 5);

        let one_camera = DescriptorCounts::from_bindings(&camera, 1);
        let one_material = DescriptorCounts::from_bindings(&material, 1);
        for _ in 0..3 {
            budget.reserve(&one_camera, 1).unwrap();
        }
        for _ in 0..2 {
            budget.reserve(&one_material, 1).unwrap();
        }

        assert_eq!(budget.remaining(UNIFORM), 0);
        assert_eq!(budget.remaining(SAMPLED), 0);
        assert_eq!(budget.sets_remaining(), 0);
        assert!(budget.reserve(&one_camera, 1).is_err());
        assert!(budget.reserve(&one_material, 1).is_err());
    }

    #[test]
    fn per_type_exhaustion_fails_even_with_sets_left() {
        let uniforms = bindings(&[(0, UNIFORM, 1)]);
        let samplers = bindings(&[(0, COMBINED, 1)]);
        let builder = DescriptorPoolBuilder::new()
            .add_bindings(&uniforms, 2)
            .add_bindings(&samplers, 1);
        let mut budget = DescriptorBudget::new(builder.totals().clone(), 10);

        let uniform_set = DescriptorCounts::from_bindings(&uniforms, 1);
        let sampler_set = DescriptorCounts::from_bindings(&samplers, 1);
        budget.reserve(&uniform_set, 1).unwrap();
        budget.reserve(&uniform_set, 1).unwrap();
        budget.reserve(&sampler_set, 1).unwrap();

        let third = budget.reserve(&uniform_set, 1);
        assert!(third.is_err());
        assert!(third.unwrap_err().to_string().contains("exhausted"));
        assert_eq!(budget.sets_remaining(), 7);
    }

    #[test]
    fn failed_reservation_takes_nothing() {
        let mixed = bindings(&[(0, UNIFORM, 1), (1, COMBINED, 2)]);
        let mut totals = DescriptorCounts::default();
        totals.add(UNIFORM, 4);
        totals.add(COMBINED, 1);
        let mut budget = DescriptorBudget::new(totals, 4);

        assert!(budget.reserve(&DescriptorCounts::from_bindings(&mixed, 1), 1).is_err());
        assert_eq!(budget.remaining(UNIFORM), 4);
        assert_eq!(budget.remaining(COMBINED), 1);
        assert_eq!(budget.sets_remaining(), 4);
    }

    #[test]
    fn set_limit_is_enforced_separately() {
        let uniforms = bindings(&[(0, UNIFORM, 1)]);
        let mut budget = DescriptorBudget::new(DescriptorCounts::from_bindings(&uniforms, 8), 2);
        let one = DescriptorCounts::from_bindings(&uniforms, 1);
        budget.reserve(&one, 1).unwrap();
        budget.reserve(&one, 1).unwrap();
        assert!(budget.reserve(&one, 1).is_err());
        assert_eq!(budget.remaining(UNIFORM), 6);
    }
}
