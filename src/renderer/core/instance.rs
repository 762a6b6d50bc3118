use std::ffi::{c_char, c_void, CStr, CString};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::config::ContextConfig;
use crate::renderer::core::surface::WindowSurface;

/// Loads Vulkan and keeps the Vulkan instance alive
pub struct Instance {
    pub entry: ash::Entry,
    pub raw: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    const VALIDATION_LAYERS: &'static [&'static CStr] = &[
        c"VK_LAYER_KHRONOS_validation",
    ];

    pub fn new(
        config: &ContextConfig,
        window: Option<&dyn WindowSurface>,
    ) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| eyre!("Failed to load the Vulkan library: {e}"))?;

        let raw = Self::create_instance(&entry, config, window)?;

        let debug_utils = if config.enable_validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &raw);
            let messenger = unsafe {
                loader.create_debug_utils_messenger(&debug_utils_messenger_create_info(), None)?
            };
            Some((loader, messenger))
        } else {
            None
        };

        log::info!(
            "Created Vulkan instance for {:?} (validation {})",
            config.application_name,
            if config.enable_validation { "on" } else { "off" },
        );

        Ok(Self {
            entry,
            raw,
            debug_utils,
        })
    }

    fn create_instance(
        entry: &ash::Entry,
        config: &ContextConfig,
        window: Option<&dyn WindowSurface>,
    ) -> Result<ash::Instance> {
        if config.enable_validation {
            Self::check_validation_layers_supported(entry)?;
        }

        let application_name = CString::new(config.application_name.as_str())?;
        let application_info = vk::ApplicationInfo::default()
            .application_name(&application_name)
            .engine_name(c"vkframe")
            .api_version(config.api_version);
        let enabled_layer_names: Vec<*const c_char> = if config.enable_validation {
            Self::VALIDATION_LAYERS.iter().map(|layer| layer.as_ptr()).collect()
        } else {
            Vec::new()
        };
        let enabled_extension_names = Self::instance_extensions(config, window)?
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        let mut debug_info = debug_utils_messenger_create_info();
        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        if config.enable_validation {
            // Also catch messages from instance creation itself
            instance_info = instance_info.push_next(&mut debug_info);
        }

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        Ok(unsafe {
            entry.create_instance(&instance_info, None)?
        })
    }

    fn instance_extensions(
        config: &ContextConfig,
        window: Option<&dyn WindowSurface>,
    ) -> Result<Vec<&'static CStr>> {
        let mut exts = match window {
            Some(window) => window.required_extensions()?,
            None => Vec::new(),
        };

        if config.enable_validation {
            exts.push(ash::ext::debug_utils::NAME);
        }

        #[cfg(target_os = "macos")]
        {
            exts.push(ash::khr::portability_enumeration::NAME);
            exts.push(ash::khr::get_physical_device_properties2::NAME);
        }

        Ok(exts)
    }

    fn check_validation_layers_supported(entry: &ash::Entry) -> Result<()> {
        let available = unsafe { entry.enumerate_instance_layer_properties()? };
        let missing = Self::VALIDATION_LAYERS
            .iter()
            .find(|wanted| {
                !available
                    .iter()
                    .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == **wanted))
            });

        match missing {
            Some(layer) => Err(eyre!("Validation layer {:?} is not installed", layer)),
            None => Ok(()),
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}

fn debug_utils_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    type Severity = vk::DebugUtilsMessageSeverityFlagsEXT;
    type Kind = vk::DebugUtilsMessageTypeFlagsEXT;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(Severity::VERBOSE | Severity::INFO | Severity::WARNING | Severity::ERROR)
        .message_type(Kind::GENERAL | Kind::VALIDATION | Kind::PERFORMANCE)
        .pfn_user_callback(Some(debug_callback))
}

/// Short label prefixed to messages from the debug messenger
pub fn message_type_label(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL) {
        "general"
    } else {
        "vulkan"
    }
}

/// Maps a validation message severity onto the `log` level it is reported at
pub fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => log::Level::Trace,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::Level::Info,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        _ => log::Level::Warn,
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    // The driver owns `data` for the duration of the call only
    let message = unsafe { data.as_ref() }
        .filter(|data| !data.p_message.is_null())
        .map(|data| unsafe { CStr::from_ptr(data.p_message) });
    if let Some(message) = message {
        log::log!(
            target: "vkframe::vulkan",
            severity_level(severity),
            "[{}] {}",
            message_type_label(kind),
            message.to_string_lossy(),
        );
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_severities_map_to_log_levels() {
        assert_eq!(severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE), log::Level::Trace);
        assert_eq!(severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::INFO), log::Level::Info);
        assert_eq!(severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING), log::Level::Warn);
        assert_eq!(severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR), log::Level::Error);
    }

    #[test]
    fn validation_label_wins_over_general() {
        let kind = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION;
        assert_eq!(message_type_label(kind), "validation");
        assert_eq!(message_type_label(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE), "performance");
    }
}
