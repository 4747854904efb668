// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, c_void, CStr, CString};

use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, error, info, warn};

use crate::error::{VkResult, VkResultExt};

/// Instance-scoped objects. Dropping destroys the surface, then the debug
/// messenger, then the instance; every device must be gone by then.
pub struct InstanceContext {
    pub(crate) entry: Entry,
    pub(crate) instance: ash::Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(?types, "[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(?types, "[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(?types, "[vulkan] {msg}");
    } else {
        tracing::trace!(?types, "[vulkan] {msg}");
    }
    vk::FALSE
}

/// Splits `requested` into (enabled, missing) against what the loader offers.
pub fn filter_layers(requested: &[String], available: &[String]) -> (Vec<String>, Vec<String>) {
    requested
        .iter()
        .cloned()
        .partition(|name| available.iter().any(|a| a == name))
}

unsafe fn installed_layers(entry: &Entry) -> VkResult<Vec<String>> {
    let props = entry
        .enumerate_instance_layer_properties()
        .vk("vkEnumerateInstanceLayerProperties")?;
    Ok(props
        .iter()
        .map(|p| {
            CStr::from_ptr(p.layer_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        })
        .collect())
}

unsafe fn has_instance_extension(entry: &Entry, name: &CStr) -> bool {
    entry
        .enumerate_instance_extension_properties(None)
        .unwrap_or_default()
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == name)
}

impl InstanceContext {
    // STRICT ORDER:
    // 1) instance (platform WSI extensions + optional debug utils)
    // 2) surface FROM THIS INSTANCE
    // 3) debug messenger
    // Physical devices are later rated AGAINST this surface.
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        app_name: &str,
        validation: bool,
        layers: &[String],
    ) -> VkResult<Self> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        unsafe {
            let entry = Entry::load()?;

            // --- Layers: skip anything not installed ---
            let enabled_layers = if validation {
                let (enabled, missing) = filter_layers(layers, &installed_layers(&entry)?);
                for name in &missing {
                    warn!("validation layer {name} not installed, skipping");
                }
                enabled
            } else {
                Vec::new()
            };
            let layer_names: Vec<CString> = enabled_layers
                .iter()
                .filter_map(|l| CString::new(l.as_str()).ok())
                .collect();
            let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|l| l.as_ptr()).collect();

            // --- Extensions: WSI for this display + debug utils when validating ---
            let mut extensions = ash_window::enumerate_required_extensions(dh)
                .vk("enumerate_required_extensions")?
                .to_vec();
            let want_debug = validation && has_instance_extension(&entry, debug_utils::NAME);
            if want_debug {
                extensions.push(debug_utils::NAME.as_ptr());
            }

            let app = CString::new(app_name).unwrap_or_else(|_| c"vela".to_owned());
            let app_info = vk::ApplicationInfo {
                s_type: vk::StructureType::APPLICATION_INFO,
                p_application_name: app.as_ptr(),
                application_version: vk::make_api_version(0, 0, 1, 0),
                p_engine_name: c"vela".as_ptr(),
                engine_version: vk::make_api_version(0, 0, 1, 0),
                api_version: vk::API_VERSION_1_1,
                ..Default::default()
            };

            let create_info = vk::InstanceCreateInfo {
                s_type: vk::StructureType::INSTANCE_CREATE_INFO,
                p_application_info: &app_info,
                enabled_extension_count: extensions.len() as u32,
                pp_enabled_extension_names: extensions.as_ptr(),
                enabled_layer_count: layer_ptrs.len() as u32,
                pp_enabled_layer_names: layer_ptrs.as_ptr(),
                ..Default::default()
            };
            let instance = entry
                .create_instance(&create_info, None)
                .vk("vkCreateInstance")?;
            info!(
                "Vulkan instance created (layers: {:?}, debug utils: {})",
                enabled_layers, want_debug
            );

            // --- Surface bound to THIS instance ---
            let surface_loader = surface::Instance::new(&entry, &instance);
            let surface = match ash_window::create_surface(&entry, &instance, dh, wh, None) {
                Ok(s) => s,
                Err(result) => {
                    instance.destroy_instance(None);
                    return Err(crate::VkError::Vulkan {
                        call: "create_surface",
                        result,
                    });
                }
            };

            let mut ctx = InstanceContext {
                entry,
                instance,
                debug: None,
                surface_loader,
                surface,
            };

            // --- Debug messenger (instance-scoped) ---
            if want_debug {
                let loader = debug_utils::Instance::new(&ctx.entry, &ctx.instance);
                let ci = vk::DebugUtilsMessengerCreateInfoEXT {
                    s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
                    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                    message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    pfn_user_callback: Some(debug_callback),
                    ..Default::default()
                };
                let messenger = loader
                    .create_debug_utils_messenger(&ci, None)
                    .vk("vkCreateDebugUtilsMessengerEXT")?;
                ctx.debug = Some((loader, messenger));
            }

            Ok(ctx)
        }
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("Vulkan instance destroyed");
    }
}
