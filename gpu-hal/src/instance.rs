use std::ffi::{CStr, CString};
use std::sync::Arc;

use ash::vk;

use crate::error::{DeviceError, InitError};

/// Shared, ref-counted instance state. Kept behind an `Arc` because the
/// surface and every adapter derived from this instance need to outlive
/// the `Instance` value the caller holds.
pub struct InstanceShared {
    pub(crate) entry: ash::Entry,
    pub(crate) raw: ash::Instance,
    pub(crate) extensions: Vec<&'static CStr>,
    debug_utils: Option<DebugUtils>,
}

struct DebugUtils {
    extension: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        unsafe {
            if let Some(du) = self.debug_utils.take() {
                du.extension
                    .destroy_debug_utils_messenger(du.messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}

pub struct Instance {
    pub(crate) shared: Arc<InstanceShared>,
}

impl Instance {
    /// Create a new instance.
    ///
    /// `validation` enables `VK_LAYER_KHRONOS_validation` and the debug-utils
    /// messenger extension. This is a compile-time validation-layer toggle;
    /// the core never flips it at runtime.
    ///
    /// # Safety
    ///
    /// The Vulkan loader must be present on the system.
    pub unsafe fn new(app_name: &str, validation: bool) -> Result<Self, InitError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|err| {
            log::error!("failed to load Vulkan entry points: {err}");
            InitError::AdapterNotFound(crate::error::AdapterNotFoundError {
                missing: "vulkan loader".to_string(),
            })
        })?;

        let app_name_c = CString::new(app_name).unwrap_or_default();
        let engine_name_c = CString::new("gpu-core").unwrap();
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_c)
            .application_version(0)
            .engine_name(&engine_name_c)
            .engine_version(0)
            .api_version(vk::API_VERSION_1_3);

        let mut layers: Vec<*const i8> = Vec::new();
        let validation_layer = CString::new("VK_LAYER_KHRONOS_validation").unwrap();
        if validation {
            layers.push(validation_layer.as_ptr());
        }

        let mut extensions: Vec<&'static CStr> =
            vec![ash::khr::surface::NAME, ash::khr::get_physical_device_properties2::NAME];
        if validation {
            extensions.push(ash::ext::debug_utils::NAME);
        }
        let extension_ptrs: Vec<*const i8> = extensions.iter().map(|e| e.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extension_ptrs);

        let raw = unsafe { entry.create_instance(&create_info, None) }.map_err(|err| {
            log::error!("vkCreateInstance failed: {err:?}");
            InitError::Device(DeviceError::from(err))
        })?;

        let debug_utils = if validation {
            let extension = ash::ext::debug_utils::Instance::new(&entry, &raw);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_utils_messenger_callback));
            let messenger =
                unsafe { extension.create_debug_utils_messenger(&messenger_info, None) }
                    .map_err(|err| InitError::Device(DeviceError::from(err)))?;
            Some(DebugUtils {
                extension,
                messenger,
            })
        } else {
            None
        };

        Ok(Self {
            shared: Arc::new(InstanceShared {
                entry,
                raw,
                extensions,
                debug_utils,
            }),
        })
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.shared.raw
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.shared.entry
    }
}

unsafe extern "system" fn debug_utils_messenger_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = unsafe { CStr::from_ptr((*callback_data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("{message}");
    } else {
        log::warn!("{message}");
    }
    vk::FALSE
}
