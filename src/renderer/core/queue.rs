use ash::vk;

/// A device queue together with the family it was retrieved from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Queue {
    pub family: u32,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(
        family: u32,
        handle: vk::Queue,
    ) -> Self {
        Self {
            family,
            handle,
        }
    }
}

/// Queue family indices chosen for one physical device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    /// Chooses queue families from the device's family properties.
    ///
    /// Present is only searched for when a support query is given, preferring a family that
    /// also does graphics. Compute and transfer prefer dedicated families and fall back to
    /// shared ones, with transfer ending on the graphics family.
    pub fn discover(
        families: &[vk::QueueFamilyProperties],
        supports_present: Option<&dyn Fn(u32) -> bool>,
    ) -> Self {
        let has = |index: usize, flags: vk::QueueFlags| {
            families[index].queue_count > 0 && families[index].queue_flags.contains(flags)
        };
        let find = |pred: &dyn Fn(usize) -> bool| {
            (0..families.len())
                .find(|i| pred(*i))
                .map(|i| i as u32)
        };

        let graphics = find(&|i| has(i, vk::QueueFlags::GRAPHICS));

        let present = supports_present.and_then(|supports_present| {
            find(&|i| has(i, vk::QueueFlags::GRAPHICS) && supports_present(i as u32))
                .or_else(|| find(&|i| families[i].queue_count > 0 && supports_present(i as u32)))
        });

        let compute = find(&|i| has(i, vk::QueueFlags::COMPUTE) && !has(i, vk::QueueFlags::GRAPHICS))
            .or_else(|| find(&|i| has(i, vk::QueueFlags::COMPUTE)));

        // Graphics and compute families implicitly support transfers
        let transfer = find(&|i| {
            has(i, vk::QueueFlags::TRANSFER)
                && !has(i, vk::QueueFlags::GRAPHICS)
                && !has(i, vk::QueueFlags::COMPUTE)
        })
            .or_else(|| find(&|i| has(i, vk::QueueFlags::TRANSFER)))
            .or(graphics);

        Self {
            graphics,
            present,
            compute,
            transfer,
        }
    }

    pub fn is_complete(&self, needs_present: bool) -> bool {
        self.graphics.is_some() && (!needs_present || self.present.is_some())
    }

    /// Sorted, deduplicated list of every family that needs a queue
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = [self.graphics, self.present, self.compute, self.transfer]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        families.sort_unstable();
        families.dedup();
        families
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_dedicated_compute_and_transfer_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let present = |_: u32| true;
        let indices = QueueFamilyIndices::discover(&families, Some(&present));

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.compute, Some(1));
        assert_eq!(indices.transfer, Some(2));
        assert_eq!(indices.unique_families(), vec![0, 1, 2]);
    }

    #[test]
    fn single_family_covers_every_role() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        let present = |_: u32| true;
        let indices = QueueFamilyIndices::discover(&families, Some(&present));

        assert_eq!(indices, QueueFamilyIndices {
            graphics: Some(0),
            present: Some(0),
            compute: Some(0),
            transfer: Some(0),
        });
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn transfer_falls_back_to_graphics() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::discover(&families, None);

        assert_eq!(indices.transfer, Some(0));
        assert_eq!(indices.compute, None);
    }

    #[test]
    fn present_prefers_graphics_family_but_accepts_others() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let only_compute = |i: u32| i == 1;
        let indices = QueueFamilyIndices::discover(&families, Some(&only_compute));
        assert_eq!(indices.present, Some(1));

        let both = |_: u32| true;
        let indices = QueueFamilyIndices::discover(&families, Some(&both));
        assert_eq!(indices.present, Some(0));
    }

    #[test]
    fn missing_graphics_is_incomplete() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        let indices = QueueFamilyIndices::discover(&families, None);
        assert!(!indices.is_complete(false));

        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::discover(&families, None);
        assert!(indices.is_complete(false));
        assert!(!indices.is_complete(true));
    }

    #[test]
    fn empty_families_are_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::discover(&families, None);
        assert_eq!(indices.graphics, Some(1));
    }
}
