use std::ffi::{c_char, CStr};
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::core::queue::QueueFamilyIndices;
use crate::renderer::core::surface::Surface;

/// Optional device features the wrappers adapt to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFeatures {
    pub sampler_anisotropy: bool,
    pub partial_binding: bool,
}

/// Physical device picked for rendering, with everything decided about it up front
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub queue_families: QueueFamilyIndices,
    pub features: DeviceFeatures,
}

/// Lower is better
pub fn device_type_rank(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 3,
        vk::PhysicalDeviceType::OTHER => 4,
        _ => 5,
    }
}

pub fn required_device_extensions(with_swapchain: bool) -> Vec<&'static CStr> {
    let mut exts = Vec::new();
    if with_swapchain {
        exts.push(ash::khr::swapchain::NAME);
    }
    #[cfg(target_os = "macos")]
    exts.push(ash::khr::portability_subset::NAME);
    exts
}

pub fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<&Surface>,
) -> Result<PhysicalDeviceInfo> {
    let req_device_exts = required_device_extensions(surface.is_some());
    let devices = unsafe { instance.enumerate_physical_devices()? };

    let selected = devices
        .into_iter()
        // Filter out devices that do not contain the required device extensions
        .filter(|device| {
            let supported_extensions = unsafe {
                instance.enumerate_device_extension_properties(*device)
            }.unwrap_or_default();

            req_device_exts.iter().all(|req_ext| {
                supported_extensions
                    .iter()
                    .filter_map(|sup_ext| sup_ext.extension_name_as_c_str().ok())
                    .any(|sup_ext| sup_ext == *req_ext)
            })
        })
        // Filter out devices that do not contain the required queues
        .filter_map(|device| {
            let props = unsafe {
                instance.get_physical_device_queue_family_properties(device)
            };
            let supports_present = |family: u32| {
                surface.is_some_and(|surface| surface.supports_present(device, family))
            };
            let queue_families = QueueFamilyIndices::discover(
                &props,
                surface.map(|_| &supports_present as &dyn Fn(u32) -> bool),
            );
            queue_families
                .is_complete(surface.is_some())
                .then_some((device, queue_families))
        })
        .min_by_key(|(device, _)| {
            let props = unsafe { instance.get_physical_device_properties(*device) };
            device_type_rank(props.device_type)
        })
        .ok_or_eyre("No suitable physical device found")?;

    let (handle, queue_families) = selected;
    let properties = unsafe { instance.get_physical_device_properties(handle) };
    let features = query_features(instance, handle, &properties);

    log::info!(
        "Selected physical device {:?} ({:?})",
        properties.device_name_as_c_str().unwrap_or(c"<unnamed>"),
        properties.device_type,
    );
    log::debug!("Queue families: {:?}, features: {:?}", queue_families, features);

    Ok(PhysicalDeviceInfo {
        handle,
        properties,
        queue_families,
        features,
    })
}

fn query_features(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    properties: &vk::PhysicalDeviceProperties,
) -> DeviceFeatures {
    // Descriptor indexing is core from 1.2 onwards
    if vk::api_version_minor(properties.api_version) < 2 && vk::api_version_major(properties.api_version) == 1 {
        let base = unsafe { instance.get_physical_device_features(device) };
        return DeviceFeatures {
            sampler_anisotropy: base.sampler_anisotropy == vk::TRUE,
            partial_binding: false,
        };
    }

    let mut indexing = vk::PhysicalDeviceDescriptorIndexingFeatures::default();
    let base = {
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut indexing);
        unsafe { instance.get_physical_device_features2(device, &mut features2) };
        features2.features
    };

    DeviceFeatures {
        sampler_anisotropy: base.sampler_anisotropy == vk::TRUE,
        partial_binding: indexing.descriptor_binding_partially_bound == vk::TRUE,
    }
}

pub fn create_logical_device(
    instance: &ash::Instance,
    info: &PhysicalDeviceInfo,
    with_swapchain: bool,
) -> Result<ash::Device> {
    let queue_priorities = [1.0];
    let queue_create_infos = info
        .queue_families
        .unique_families()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
        })
        .collect::<Vec<_>>();

    let enabled_extension_names = required_device_extensions(with_swapchain)
        .iter()
        .map(|ext| ext.as_ptr())
        .collect::<Vec<*const c_char>>();

    let enabled_features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(info.features.sampler_anisotropy);
    let mut indexing_features = vk::PhysicalDeviceDescriptorIndexingFeatures::default()
        .descriptor_binding_partially_bound(true);

    let mut device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&enabled_extension_names)
        .enabled_features(&enabled_features);
    if info.features.partial_binding {
        device_create_info = device_create_info.push_next(&mut indexing_features);
    }

    Ok(unsafe {
        instance.create_device(info.handle, &device_create_info, None)?
    })
}
