// In-memory stand-in for the Vulkan driver, for unit tests

use super::capabilities::{CapabilityQuery, DeviceSummary};
use ash::vk::{self, Handle};
use std::collections::HashMap;

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

/// Everything the fake driver reports about one GPU
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub summary: DeviceSummary,
    /// (flags, can present) per family
    pub queue_families: Vec<(vk::QueueFlags, bool)>,
    pub extensions: Vec<String>,
    pub capabilities: Option<vk::SurfaceCapabilitiesKHR>,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl FakeDevice {
    /// An integrated GPU meeting every requirement, single graphics+present family
    pub fn suitable(name: &str) -> Self {
        Self {
            summary: DeviceSummary {
                name: name.to_string(),
                device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
                max_image_dimension_2d: 16384,
                geometry_shader: true,
            },
            queue_families: vec![(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, true)],
            extensions: vec!["VK_KHR_swapchain".to_string()],
            capabilities: Some(vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: extent(800, 600),
                min_image_extent: extent(1, 1),
                max_image_extent: extent(4096, 4096),
                ..Default::default()
            }),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    pub fn discrete(mut self) -> Self {
        self.summary.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        self
    }

    pub fn without_geometry_shader(mut self) -> Self {
        self.summary.geometry_shader = false;
        self
    }

    pub fn with_max_image_dimension(mut self, dimension: u32) -> Self {
        self.summary.max_image_dimension_2d = dimension;
        self
    }

    pub fn with_queue_families(mut self, families: &[(vk::QueueFlags, bool)]) -> Self {
        self.queue_families = families.to_vec();
        self
    }

    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_string()).collect();
        self
    }
}

/// Devices keyed by made-up physical device handles
#[derive(Debug, Default)]
pub struct FakeDriver {
    devices: HashMap<vk::PhysicalDevice, FakeDevice>,
}

impl FakeDriver {
    /// Register `devices` under handles 1, 2, 3... returned in the same order
    pub fn with_devices(devices: Vec<FakeDevice>) -> (Self, Vec<vk::PhysicalDevice>) {
        let mut driver = Self::default();
        let handles = devices
            .into_iter()
            .enumerate()
            .map(|(i, device)| {
                let handle = vk::PhysicalDevice::from_raw(i as u64 + 1);
                driver.devices.insert(handle, device);
                handle
            })
            .collect();
        (driver, handles)
    }

    fn get(&self, device: vk::PhysicalDevice) -> &FakeDevice {
        &self.devices[&device]
    }
}

impl CapabilityQuery for FakeDriver {
    fn device_summary(&self, device: vk::PhysicalDevice) -> DeviceSummary {
        self.get(device).summary.clone()
    }

    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        self.get(device)
            .queue_families
            .iter()
            .map(|&(queue_flags, _)| vk::QueueFamilyProperties {
                queue_flags,
                queue_count: 1,
                ..Default::default()
            })
            .collect()
    }

    fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> bool {
        self.get(device)
            .queue_families
            .get(family as usize)
            .map_or(false, |&(_, present)| present)
    }

    fn extension_names(&self, device: vk::PhysicalDevice) -> Vec<String> {
        self.get(device).extensions.clone()
    }

    fn surface_capabilities(&self, device: vk::PhysicalDevice) -> Option<vk::SurfaceCapabilitiesKHR> {
        self.get(device).capabilities
    }

    fn surface_formats(&self, device: vk::PhysicalDevice) -> Vec<vk::SurfaceFormatKHR> {
        self.get(device).formats.clone()
    }

    fn present_modes(&self, device: vk::PhysicalDevice) -> Vec<vk::PresentModeKHR> {
        self.get(device).present_modes.clone()
    }
}
