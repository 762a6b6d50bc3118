use std::collections::BTreeMap;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::core::context::Context;

/// One slot of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub descriptor_type: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
    pub count: u32,
    /// Array elements may be left unwritten
    pub partial: bool,
}

impl DescriptorBinding {
    pub fn new(descriptor_type: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        Self {
            descriptor_type,
            stages,
            count: 1,
            partial: false,
        }
    }

    pub fn uniform_buffer(stages: vk::ShaderStageFlags) -> Self {
        Self::new(vk::DescriptorType::UNIFORM_BUFFER, stages)
    }

    pub fn combined_image_sampler(stages: vk::ShaderStageFlags) -> Self {
        Self::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stages)
    }

    pub fn sampled_image(stages: vk::ShaderStageFlags) -> Self {
        Self::new(vk::DescriptorType::SAMPLED_IMAGE, stages)
    }

    pub fn sampler(stages: vk::ShaderStageFlags) -> Self {
        Self::new(vk::DescriptorType::SAMPLER, stages)
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn partially_bound(mut self) -> Self {
        self.partial = true;
        self
    }
}

/// Binding index to binding, ordered by index
pub type BindingMap = BTreeMap<u32, DescriptorBinding>;

pub struct DescriptorSetLayoutBuilder {
    bindings: BindingMap,
}

impl Default for DescriptorSetLayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorSetLayoutBuilder {
    pub fn new() -> Self {
        Self {
            bindings: BindingMap::new(),
        }
    }

    pub fn add_binding(
        mut self,
        index: u32,
        binding: DescriptorBinding,
    ) -> Self {
        self.bindings.insert(index, binding);
        self
    }

    pub fn bindings(&self) -> &BindingMap {
        &self.bindings
    }

    pub fn build(self, ctx: &Context) -> Result<DescriptorSetLayout> {
        DescriptorSetLayout::new(ctx, self.bindings)
    }
}

/// Immutable binding schema. Share it through `Arc` so pipelines built from the same
/// layout object stay compatible with each other's sets.
pub struct DescriptorSetLayout {
    pub handle: vk::DescriptorSetLayout,
    bindings: BindingMap,
    device: Arc<ash::Device>,
}

impl DescriptorSetLayout {
    pub fn new(
        ctx: &Context,
        bindings: BindingMap,
    ) -> Result<Self> {
        let needs_partial = bindings.values().any(|b| b.partial);
        if needs_partial && !ctx.features.partial_binding {
            return Err(eyre!("Device does not support partially bound descriptors"));
        }

        let native_bindings = bindings
            .iter()
            .map(|(index, binding)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(*index)
                    .descriptor_type(binding.descriptor_type)
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
            })
            .collect::<Vec<_>>();
        let binding_flags = bindings
            .values()
            .map(|binding| {
                if binding.partial {
                    vk::DescriptorBindingFlags::PARTIALLY_BOUND
                } else {
                    vk::DescriptorBindingFlags::empty()
                }
            })
            .collect::<Vec<_>>();

        let mut binding_flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(&binding_flags);
        let mut layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&native_bindings);
        if needs_partial {
            layout_info = layout_info.push_next(&mut binding_flags_info);
        }
        let handle = unsafe {
            ctx.device.create_descriptor_set_layout(&layout_info, None)?
        };

        Ok(Self {
            handle,
            bindings,
            device: ctx.device.clone(),
        })
    }

    pub fn bindings(&self) -> &BindingMap {
        &self.bindings
    }

    pub fn binding(&self, index: u32) -> Option<&DescriptorBinding> {
        self.bindings.get(&index)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.handle, None);
        }
    }
}

/// Bindings that are not partial and have fewer elements written than declared.
/// `written` maps binding index to the number of elements written so far.
pub fn missing_bindings(bindings: &BindingMap, written: &BTreeMap<u32, u32>) -> Vec<u32> {
    bindings
        .iter()
        .filter(|(_, binding)| !binding.partial)
        .filter(|(index, binding)| written.get(index).copied().unwrap_or(0) < binding.count)
        .map(|(index, _)| *index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material_bindings() -> BindingMap {
        DescriptorSetLayoutBuilder::new()
            .add_binding(0, DescriptorBinding::uniform_buffer(vk::ShaderStageFlags::VERTEX))
            .add_binding(1, DescriptorBinding::combined_image_sampler(vk::ShaderStageFlags::FRAGMENT))
            .add_binding(
                2,
                DescriptorBinding::sampled_image(vk::ShaderStageFlags::FRAGMENT)
                    .with_count(8)
                    .partially_bound(),
            )
            .bindings()
            .clone()
    }

    #[test]
    fn unwritten_full_bindings_are_reported() {
        let bindings = material_bindings();
        let written = BTreeMap::from([(0, 1)]);
        assert_eq!(missing_bindings(&bindings, &written), vec![1]);
    }

    #[test]
    fn partial_bindings_may_stay_empty() {
        let bindings = material_bindings();
        let written = BTreeMap::from([(0, 1), (1, 1)]);
        assert!(missing_bindings(&bindings, &written).is_empty());
    }

    #[test]
    fn short_arrays_are_reported() {
        let bindings = DescriptorSetLayoutBuilder::new()
            .add_binding(0, DescriptorBinding::sampled_image(vk::ShaderStageFlags::FRAGMENT).with_count(4))
            .bindings()
            .clone();
        let written = BTreeMap::from([(0, 3)]);
        assert_eq!(missing_bindings(&bindings, &written), vec![0]);
    }
}
