// Driver settings - layers and extensions requested from Vulkan
//
// Built once at startup from the config and passed by reference into the
// instance and device builders. Never mutated afterwards.

use ash::vk;
use std::ffi::CStr;

/// Khronos validation layer (debug builds only)
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Lets the loader enumerate portability (e.g. MoltenVK) implementations
pub const PORTABILITY_ENUMERATION: &CStr = c"VK_KHR_portability_enumeration";

/// Fixed set of names handed to the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    /// Validation layers and the debug channel are requested
    pub validation: bool,
    /// Instance layers to request (filtered against availability at creation)
    pub layers: Vec<&'static CStr>,
    /// Instance extensions requested in addition to the window system ones
    pub instance_extensions: Vec<&'static CStr>,
    /// Device extensions every candidate GPU must support
    pub device_extensions: Vec<&'static CStr>,
}

impl DriverSettings {
    pub fn new(validation: bool) -> Self {
        let layers = if validation {
            vec![VALIDATION_LAYER]
        } else {
            vec![]
        };

        Self {
            validation,
            layers,
            instance_extensions: vec![
                PORTABILITY_ENUMERATION,
                ash::extensions::ext::DebugUtils::name(),
            ],
            device_extensions: vec![ash::extensions::khr::Swapchain::name()],
        }
    }

    /// Application/engine version reported to the driver, taken from the package
    pub fn app_version() -> u32 {
        let part = |s: &str| s.parse::<u32>().unwrap_or(0);
        vk::make_api_version(
            0,
            part(env!("CARGO_PKG_VERSION_MAJOR")),
            part(env!("CARGO_PKG_VERSION_MINOR")),
            part(env!("CARGO_PKG_VERSION_PATCH")),
        )
    }
}
