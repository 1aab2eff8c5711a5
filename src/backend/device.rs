// Vulkan Device - GPU selection and logical device creation
//
// Responsibilities:
// - Score every physical device against our surface, pick the best
// - Logical device with one queue per distinct graphics/present family
// - Queue lookup

use anyhow::{Context, Result};
use ash::vk;
use std::collections::BTreeMap;
use std::ffi::CStr;

use super::capabilities::{
    find_queue_families, supports_extensions, CapabilityQuery, QueueFamilyIndices,
    SwapchainSupport,
};
use super::driver::DriverSettings;

/// Bonus for discrete GPUs, before the texture size tie-breaker
const DISCRETE_GPU_BONUS: i64 = 1000;

/// Score a physical device for rendering to the surface.
///
/// Preferences add to the score; each unmet requirement multiplies it by zero.
/// Every requirement is still checked and logged after a veto so the log shows
/// all the reasons a GPU was rejected. Never negative.
pub fn rate_suitability<Q: CapabilityQuery>(
    query: &Q,
    device: vk::PhysicalDevice,
    required_extensions: &[&CStr],
) -> i64 {
    let summary = query.device_summary(device);
    log::info!("GPU candidate: {}", summary.name);

    // Preferences
    let mut score = 0;
    if summary.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += DISCRETE_GPU_BONUS;
    }
    // Maximal texture size (affects graphics quality)
    score += i64::from(summary.max_image_dimension_2d.min(i32::MAX as u32));

    // Requirements
    let mut veto = 1;

    if !summary.geometry_shader {
        log::info!("GPU eliminated: '{}' has no geometry shader feature", summary.name);
        veto = 0;
    }

    let families = find_queue_families(query, device);
    if families.graphics.is_none() {
        log::info!("GPU eliminated: '{}' has no graphics queue family", summary.name);
        veto = 0;
    }
    if families.present.is_none() {
        log::info!("GPU eliminated: '{}' has no queue family that can present", summary.name);
        veto = 0;
    }

    if !supports_extensions(query, device, required_extensions) {
        log::info!("GPU eliminated: '{}' lacks a required device extension", summary.name);
        veto = 0;
    }

    // Only meaningful once the queues and the swapchain extension are there
    if score * veto > 0 {
        let adequate = SwapchainSupport::query(query, device).is_some_and(|s| s.is_adequate());
        if !adequate {
            log::info!("GPU eliminated: '{}' has no adequate swapchain support", summary.name);
            veto = 0;
        }
    }

    let score = score * veto;
    log::info!("GPU score: '{}' = {}", summary.name, score);
    score
}

/// Pick the highest scoring device, `None` if there is none or none qualifies.
///
/// Equal scores are resolved arbitrarily.
pub fn select_physical_device<Q: CapabilityQuery>(
    query: &Q,
    devices: &[vk::PhysicalDevice],
    required_extensions: &[&CStr],
) -> Option<vk::PhysicalDevice> {
    if devices.is_empty() {
        log::error!("No Vulkan-capable GPU found");
        return None;
    }

    let mut candidates: BTreeMap<i64, Vec<vk::PhysicalDevice>> = BTreeMap::new();
    for &device in devices {
        let score = rate_suitability(query, device, required_extensions);
        candidates.entry(score).or_default().push(device);
    }

    match candidates.last_key_value() {
        Some((&score, best)) if score > 0 => {
            let device = *best.last()?;
            log::info!("Selected GPU: {}", query.device_summary(device).name);
            Some(device)
        }
        _ => {
            log::error!("No suitable GPU found");
            None
        }
    }
}

/// Create the logical device with one queue per distinct family.
///
/// # Panics
/// If `families` is incomplete.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: &QueueFamilyIndices,
    settings: &DriverSettings,
) -> Result<ash::Device> {
    let queue_priorities = [1.0];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let extensions: Vec<*const std::ffi::c_char> =
        settings.device_extensions.iter().map(|e| e.as_ptr()).collect();

    // Ignored by up-to-date implementations, required by older ones
    let layers: Vec<*const std::ffi::c_char> =
        settings.layers.iter().map(|l| l.as_ptr()).collect();

    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .context("Failed to create logical device")?;

    log::info!(
        "Created logical device with {} queue famil{}",
        queue_create_infos.len(),
        if queue_create_infos.len() == 1 { "y" } else { "ies" }
    );

    Ok(device)
}

/// First queue of `family`. Always succeeds for a family the device was created with.
pub fn get_queue(device: &ash::Device, family: u32) -> vk::Queue {
    unsafe { device.get_device_queue(family, 0) }
}

/// Graphics and present queues, possibly the same queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceQueues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
}

impl DeviceQueues {
    pub fn get(device: &ash::Device, families: &QueueFamilyIndices) -> Self {
        let [graphics, present] = families.pair();
        Self {
            graphics: get_queue(device, graphics),
            present: get_queue(device, present),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{FakeDevice, FakeDriver};

    const SWAPCHAIN: &[&CStr] = &[c"VK_KHR_swapchain"];

    fn score_of(device: FakeDevice) -> i64 {
        let (driver, devices) = FakeDriver::with_devices(vec![device]);
        rate_suitability(&driver, devices[0], SWAPCHAIN)
    }

    #[test]
    fn suitable_device_scores_texture_size() {
        assert_eq!(score_of(FakeDevice::suitable("igpu")), 16384);
        assert_eq!(score_of(FakeDevice::suitable("dgpu").discrete()), 16384 + 1000);
    }

    #[test]
    fn texture_size_is_clamped_to_i32() {
        let huge = FakeDevice::suitable("huge").with_max_image_dimension(u32::MAX);
        assert_eq!(score_of(huge), i64::from(i32::MAX));
    }

    #[test]
    fn each_missing_requirement_scores_exactly_zero() {
        let no_geometry = FakeDevice::suitable("a").discrete().without_geometry_shader();
        let no_graphics = FakeDevice::suitable("b").with_queue_families(&[(vk::QueueFlags::COMPUTE, true)]);
        let no_present = FakeDevice::suitable("c").with_queue_families(&[(vk::QueueFlags::GRAPHICS, false)]);
        let no_swapchain_ext = FakeDevice::suitable("d").with_extensions(&["VK_KHR_maintenance1"]);
        let mut no_formats = FakeDevice::suitable("e");
        no_formats.formats.clear();
        let mut no_modes = FakeDevice::suitable("f");
        no_modes.present_modes.clear();
        let mut no_caps = FakeDevice::suitable("g");
        no_caps.capabilities = None;

        for device in [
            no_geometry,
            no_graphics,
            no_present,
            no_swapchain_ext,
            no_formats,
            no_modes,
            no_caps,
        ] {
            let name = device.summary.name.clone();
            assert_eq!(score_of(device), 0, "device {name}");
        }
    }

    #[test]
    fn several_missing_requirements_still_zero() {
        let broken = FakeDevice::suitable("broken")
            .discrete()
            .without_geometry_shader()
            .with_extensions(&[])
            .with_queue_families(&[]);
        assert_eq!(score_of(broken), 0);
    }

    #[test]
    fn empty_device_list_selects_nothing() {
        let driver = FakeDriver::default();
        assert_eq!(select_physical_device(&driver, &[], SWAPCHAIN), None);
    }

    #[test]
    fn integrated_gpu_beats_unsuitable_discrete_gpu() {
        let discrete = FakeDevice::suitable("discrete").discrete().without_geometry_shader();
        let integrated = FakeDevice::suitable("integrated");
        let (driver, devices) = FakeDriver::with_devices(vec![discrete, integrated]);

        assert_eq!(rate_suitability(&driver, devices[0], SWAPCHAIN), 0);
        assert!(rate_suitability(&driver, devices[1], SWAPCHAIN) > 0);
        assert_eq!(
            select_physical_device(&driver, &devices, SWAPCHAIN),
            Some(devices[1])
        );
    }

    #[test]
    fn discrete_gpu_preferred_when_both_qualify() {
        let (driver, devices) = FakeDriver::with_devices(vec![
            FakeDevice::suitable("integrated"),
            FakeDevice::suitable("discrete").discrete(),
        ]);

        assert_eq!(
            select_physical_device(&driver, &devices, SWAPCHAIN),
            Some(devices[1])
        );
    }

    #[test]
    fn larger_textures_break_type_ties() {
        let (driver, devices) = FakeDriver::with_devices(vec![
            FakeDevice::suitable("big").with_max_image_dimension(32768),
            FakeDevice::suitable("small").with_max_image_dimension(8192),
        ]);

        assert_eq!(
            select_physical_device(&driver, &devices, SWAPCHAIN),
            Some(devices[0])
        );
    }

    #[test]
    fn no_qualifying_device_selects_nothing() {
        let (driver, devices) = FakeDriver::with_devices(vec![
            FakeDevice::suitable("a").without_geometry_shader(),
            FakeDevice::suitable("b").with_extensions(&[]),
        ]);

        assert_eq!(select_physical_device(&driver, &devices, SWAPCHAIN), None);
    }

    #[test]
    fn equal_scores_pick_one_of_them() {
        let (driver, devices) = FakeDriver::with_devices(vec![
            FakeDevice::suitable("twin a"),
            FakeDevice::suitable("twin b"),
        ]);

        let selected = select_physical_device(&driver, &devices, SWAPCHAIN).unwrap();
        assert!(devices.contains(&selected));
    }
}
