use std::collections::BTreeMap;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use smallvec::SmallVec;
use crate::renderer::descriptor::layout::BindingMap;
use crate::renderer::resources::buffer::Buffer;

/// Payload for one descriptor binding
#[derive(Debug, Clone)]
pub enum DescriptorUpdater {
    Buffer {
        descriptor_type: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    },
    Image {
        descriptor_type: vk::DescriptorType,
        info: vk::DescriptorImageInfo,
    },
    ImageArray {
        descriptor_type: vk::DescriptorType,
        infos: Vec<vk::DescriptorImageInfo>,
    },
    CombinedImageSampler {
        info: vk::DescriptorImageInfo,
    },
    Sampler {
        info: vk::DescriptorImageInfo,
    },
}

impl DescriptorUpdater {
    pub fn uniform_buffer(buffer: &Buffer) -> Self {
        Self::buffer(vk::DescriptorType::UNIFORM_BUFFER, buffer.descriptor_info())
    }

    pub fn buffer(descriptor_type: vk::DescriptorType, info: vk::DescriptorBufferInfo) -> Self {
        Self::Buffer { descriptor_type, info }
    }

    pub fn sampled_image(view: vk::ImageView, layout: vk::ImageLayout) -> Self {
        Self::Image {
            descriptor_type: vk::DescriptorType::SAMPLED_IMAGE,
            info: vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view,
                image_layout: layout,
            },
        }
    }

    pub fn storage_image(view: vk::ImageView) -> Self {
        Self::Image {
            descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
            info: vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view,
                image_layout: vk::ImageLayout::GENERAL,
            },
        }
    }

    pub fn image_array(
        descriptor_type: vk::DescriptorType,
        views: &[vk::ImageView],
        layout: vk::ImageLayout,
    ) -> Self {
        Self::ImageArray {
            descriptor_type,
            infos: views
                .iter()
                .map(|view| vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: *view,
                    image_layout: layout,
                })
                .collect(),
        }
    }

    pub fn combined_image_sampler(
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Self {
        Self::CombinedImageSampler {
            info: vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout: layout,
            },
        }
    }

    pub fn sampler(sampler: vk::Sampler) -> Self {
        Self::Sampler {
            info: vk::DescriptorImageInfo {
                sampler,
                ..Default::default()
            },
        }
    }

    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::Buffer { descriptor_type, .. }
            | Self::Image { descriptor_type, .. }
            | Self::ImageArray { descriptor_type, .. } => *descriptor_type,
            Self::CombinedImageSampler { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::Sampler { .. } => vk::DescriptorType::SAMPLER,
        }
    }

    /// Elements this write covers: the array length for image arrays, otherwise one
    pub fn descriptor_count(&self) -> u32 {
        match self {
            Self::ImageArray { infos, .. } => infos.len() as u32,
            _ => 1,
        }
    }

    pub fn write(&self, set: vk::DescriptorSet, binding: u32) -> vk::WriteDescriptorSet<'_> {
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(0)
            .descriptor_type(self.descriptor_type());
        match self {
            Self::Buffer { info, .. } => write.buffer_info(std::slice::from_ref(info)),
            Self::Image { info, .. }
            | Self::CombinedImageSampler { info }
            | Self::Sampler { info } => write.image_info(std::slice::from_ref(info)),
            Self::ImageArray { infos, .. } => write.image_info(infos),
        }
    }
}

/// Checks a write against the layout it targets
pub fn check_write(
    bindings: &BindingMap,
    binding: u32,
    updater: &DescriptorUpdater,
) -> Result<()> {
    let declared = bindings
        .get(&binding)
        .ok_or_else(|| eyre!("Layout has no binding {binding}"))?;
    if declared.descriptor_type != updater.descriptor_type() {
        return Err(eyre!(
            "Binding {binding} is {:?} but the write is {:?}",
            declared.descriptor_type,
            updater.descriptor_type(),
        ));
    }
    if updater.descriptor_count() == 0 || updater.descriptor_count() > declared.count {
        return Err(eyre!(
            "Binding {binding} holds {} elements but the write has {}",
            declared.count,
            updater.descriptor_count(),
        ));
    }
    Ok(())
}

/// Collects binding writes for one set and flushes them in a single update call
#[derive(Debug, Default)]
pub struct DescriptorSetUpdater {
    writes: Vec<(u32, DescriptorUpdater)>,
}

impl DescriptorSetUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_descriptor(&mut self, binding: u32, updater: DescriptorUpdater) -> &mut Self {
        self.writes.push((binding, updater));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = (u32, &DescriptorUpdater)> {
        self.writes.iter().map(|(binding, updater)| (*binding, updater))
    }

    /// Elements covered per binding by the queued writes
    pub fn written_counts(&self) -> BTreeMap<u32, u32> {
        let mut counts = BTreeMap::new();
        for (binding, updater) in &self.writes {
            let count = counts.entry(*binding).or_insert(0);
            *count = updater.descriptor_count().max(*count);
        }
        counts
    }

    pub fn flush(&mut self, device: &ash::Device, set: vk::DescriptorSet) {
        if self.writes.is_empty() {
            return;
        }
        {
            let writes = self.writes
                .iter()
                .map(|(binding, updater)| updater.write(set, *binding))
                .collect::<SmallVec<[vk::WriteDescriptorSet; 8]>>();
            unsafe {
                device.update_descriptor_sets(&writes, &[]);
            }
        }
        self.writes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use crate::renderer::descriptor::layout::DescriptorBinding;

    fn view(raw: u64) -> vk::ImageView {
        vk::ImageView::from_raw(raw)
    }

    #[test]
    fn image_arrays_report_their_length() {
        let updater = DescriptorUpdater::image_array(
            vk::DescriptorType::SAMPLED_IMAGE,
            &[view(1), view(2), view(3)],
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(updater.descriptor_count(), 3);

        let write = updater.write(vk::DescriptorSet::from_raw(9), 4);
        assert_eq!(write.descriptor_count, 3);
        assert_eq!(write.dst_binding, 4);
        assert_eq!(write.descriptor_type, vk::DescriptorType::SAMPLED_IMAGE);
        assert!(write.p_buffer_info.is_null());
    }

    #[test]
    fn single_writes_carry_one_payload() {
        let buffer = DescriptorUpdater::buffer(
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorBufferInfo {
                buffer: vk::Buffer::from_raw(5),
                offset: 0,
                range: 128,
            },
        );
        let write = buffer.write(vk::DescriptorSet::from_raw(1), 0);
        assert_eq!(write.descriptor_count, 1);
        assert!(!write.p_buffer_info.is_null());
        assert!(write.p_image_info.is_null());

        let combined = DescriptorUpdater::combined_image_sampler(
            view(2),
            vk::Sampler::from_raw(3),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        let write = combined.write(vk::DescriptorSet::from_raw(1), 1);
        assert_eq!(write.descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(write.descriptor_count, 1);
        assert!(!write.p_image_info.is_null());
    }

    #[test]
    fn batched_writes_keep_binding_correspondence() {
        let mut updater = DescriptorSetUpdater::new();
        updater
            .bind_descriptor(2, DescriptorUpdater::sampler(vk::Sampler::from_raw(7)))
            .bind_descriptor(0, DescriptorUpdater::sampled_image(view(8), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL))
            .bind_descriptor(1, DescriptorUpdater::image_array(
                vk::DescriptorType::SAMPLED_IMAGE,
                &[view(1), view(2)],
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ));

        let pending = updater
            .pending()
            .map(|(binding, updater)| (binding, updater.descriptor_type()))
            .collect::<Vec<_>>();
        assert_eq!(pending, vec![
            (2, vk::DescriptorType::SAMPLER),
            (0, vk::DescriptorType::SAMPLED_IMAGE),
            (1, vk::DescriptorType::SAMPLED_IMAGE),
        ]);
        assert_eq!(updater.written_counts(), BTreeMap::from([(0, 1), (1, 2), (2, 1)]));
    }

    #[test]
    fn writes_are_checked_against_the_layout() {
        let bindings: BindingMap = [
            (0, DescriptorBinding::uniform_buffer(vk::ShaderStageFlags::VERTEX)),
            (1, DescriptorBinding::sampled_image(vk::ShaderStageFlags::FRAGMENT).with_count(2)),
        ].into_iter().collect();

        let sampler = DescriptorUpdater::sampler(vk::Sampler::from_raw(1));
        assert!(check_write(&bindings, 0, &sampler).is_err());
        assert!(check_write(&bindings, 5, &sampler).is_err());

        let three = DescriptorUpdater::image_array(
            vk::DescriptorType::SAMPLED_IMAGE,
            &[view(1), view(2), view(3)],
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert!(check_write(&bindings, 1, &three).is_err());

        let two = DescriptorUpdater::image_array(
            vk::DescriptorType::SAMPLED_IMAGE,
            &[view(1), view(2)],
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert!(check_write(&bindings, 1, &two).is_ok());
    }
}
