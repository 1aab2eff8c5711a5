// Vulkan instance - driver connection, debug channel, window surface
//
// Responsibilities:
// - Instance creation with the window system extensions
// - Validation layer availability check
// - Debug messenger (debug builds)
// - Presentation surface for the window

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr, CString};

use super::driver::DriverSettings;

pub fn create_instance(
    entry: &Entry,
    app_name: &str,
    display_handle: RawDisplayHandle,
    settings: &DriverSettings,
) -> Result<ash::Instance> {
    let app_name_cstr = CString::new(app_name)?;

    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name_cstr)
        .application_version(DriverSettings::app_version())
        .engine_name(&app_name_cstr)
        .engine_version(DriverSettings::app_version())
        .api_version(vk::API_VERSION_1_0);

    // Window system extensions first, then our fixed ones
    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_handle)
        .context("Failed to query window system extensions")?
        .to_vec();
    extensions.extend(settings.instance_extensions.iter().map(|e| e.as_ptr()));

    for &ext in &extensions {
        log::debug!("Instance extension: {}", unsafe { CStr::from_ptr(ext) }.to_string_lossy());
    }

    let available = available_layers(entry);
    let layers: Vec<*const c_char> = retain_available_layers(&settings.layers, &available)
        .into_iter()
        .map(|l| l.as_ptr())
        .collect();

    let mut debug_info = messenger_create_info();

    let mut create_info = vk::InstanceCreateInfo::builder()
        .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    // Also report problems during instance creation/destruction
    if settings.validation {
        create_info = create_info.push_next(&mut debug_info);
    }

    let instance = unsafe { entry.create_instance(&create_info, None) }
        .context("Failed to create Vulkan instance")?;

    Ok(instance)
}

fn available_layers(entry: &Entry) -> Vec<String> {
    entry
        .enumerate_instance_layer_properties()
        .unwrap_or_else(|e| {
            log::warn!("Failed to enumerate instance layers: {:?}", e);
            Vec::new()
        })
        .iter()
        .map(|layer| {
            unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

/// Requested layers the loader actually has; the rest are reported and skipped
fn retain_available_layers(
    requested: &[&'static CStr],
    available: &[String],
) -> Vec<&'static CStr> {
    requested
        .iter()
        .copied()
        .filter(|layer| {
            let name = layer.to_string_lossy();
            let found = available.iter().any(|a| *a == name);
            if found {
                log::debug!("Instance layer: {}", name);
            } else {
                log::warn!("Instance layer {} missing, continuing without it", name);
            }
            found
        })
        .collect()
}

// =============================================================================
// DEBUG CHANNEL
// =============================================================================

/// Debug messenger forwarding driver messages to the log
pub struct DebugChannel {
    loader: DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugChannel {
    pub fn new(entry: &Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = DebugUtils::new(entry, instance);
        let create_info = messenger_create_info();

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok(Self { loader, messenger })
    }

    /// # Safety
    /// The instance it was created from must still be alive.
    pub unsafe fn destroy(self) {
        self.loader
            .destroy_debug_utils_messenger(self.messenger, None);
    }
}

fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

/// Short label printed with each driver message
pub const fn severity_label(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> &'static str {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => "verb",
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => "info",
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => "warn",
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => "fail",
        _ => "crit",
    }
}

fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::Level::Debug,
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => log::Level::Trace,
        _ => log::Level::Error,
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    log::log!(
        severity_level(message_severity),
        "[vulkan] [validation] [{}] {}",
        severity_label(message_severity),
        message.to_string_lossy()
    );

    vk::FALSE
}

// =============================================================================
// SURFACE
// =============================================================================

/// Window surface plus the loader needed to query and destroy it
pub struct PresentationSurface {
    pub loader: khr::Surface,
    pub surface: vk::SurfaceKHR,
}

impl PresentationSurface {
    pub fn new(
        entry: &Entry,
        instance: &ash::Instance,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Self> {
        let surface = unsafe {
            ash_window::create_surface(entry, instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface")?;

        Ok(Self {
            loader: khr::Surface::new(entry, instance),
            surface,
        })
    }

    /// # Safety
    /// The instance must still be alive and no swapchain may use the surface.
    pub unsafe fn destroy(self) {
        self.loader.destroy_surface(self.surface, None);
    }
}
