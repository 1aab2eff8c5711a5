// Capability queries - what a GPU can do with our surface
//
// Everything device selection and swapchain creation needs to know about a
// physical device goes through `CapabilityQuery`. `DriverQuery` answers from
// the real driver; tests answer from a fake.

use ash::vk;
use std::ffi::CStr;

/// The bits of `vk::PhysicalDeviceProperties`/`Features` the selector scores on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    pub geometry_shader: bool,
}

/// Read-only view of one (instance, surface) pair.
///
/// Methods never fail hard: driver errors come back as `None` or an empty
/// list, logged by the implementation.
pub trait CapabilityQuery {
    fn device_summary(&self, device: vk::PhysicalDevice) -> DeviceSummary;

    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties>;

    /// Whether queue family `family` can present to the surface
    fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> bool;

    fn extension_names(&self, device: vk::PhysicalDevice) -> Vec<String>;

    fn surface_capabilities(&self, device: vk::PhysicalDevice) -> Option<vk::SurfaceCapabilitiesKHR>;

    fn surface_formats(&self, device: vk::PhysicalDevice) -> Vec<vk::SurfaceFormatKHR>;

    fn present_modes(&self, device: vk::PhysicalDevice) -> Vec<vk::PresentModeKHR>;
}

/// `CapabilityQuery` backed by the Vulkan driver
pub struct DriverQuery<'a> {
    instance: &'a ash::Instance,
    surface_loader: &'a ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
}

impl<'a> DriverQuery<'a> {
    pub fn new(
        instance: &'a ash::Instance,
        surface_loader: &'a ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Self {
        Self {
            instance,
            surface_loader,
            surface,
        }
    }
}

impl CapabilityQuery for DriverQuery<'_> {
    fn device_summary(&self, device: vk::PhysicalDevice) -> DeviceSummary {
        let properties = unsafe { self.instance.get_physical_device_properties(device) };
        let features = unsafe { self.instance.get_physical_device_features(device) };

        DeviceSummary {
            name: unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned(),
            device_type: properties.device_type,
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
            geometry_shader: features.geometry_shader == vk::TRUE,
        }
    }

    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        unsafe { self.instance.get_physical_device_queue_family_properties(device) }
    }

    fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> bool {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_support(device, family, self.surface)
        }
        .unwrap_or_else(|e| {
            log::warn!("Surface support query failed for queue family {}: {:?}", family, e);
            false
        })
    }

    fn extension_names(&self, device: vk::PhysicalDevice) -> Vec<String> {
        let extensions = unsafe { self.instance.enumerate_device_extension_properties(device) }
            .unwrap_or_else(|e| {
                log::warn!("Device extension enumeration failed: {:?}", e);
                Vec::new()
            });

        extensions
            .iter()
            .map(|ext| {
                unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    fn surface_capabilities(&self, device: vk::PhysicalDevice) -> Option<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(device, self.surface)
        }
        .map_err(|e| log::warn!("Surface capabilities query failed: {:?}", e))
        .ok()
    }

    fn surface_formats(&self, device: vk::PhysicalDevice) -> Vec<vk::SurfaceFormatKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(device, self.surface)
        }
        .unwrap_or_else(|e| {
            log::warn!("Surface format query failed: {:?}", e);
            Vec::new()
        })
    }

    fn present_modes(&self, device: vk::PhysicalDevice) -> Vec<vk::PresentModeKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(device, self.surface)
        }
        .unwrap_or_else(|e| {
            log::warn!("Present mode query failed: {:?}", e);
            Vec::new()
        })
    }
}

// =============================================================================
// QUEUE FAMILIES
// =============================================================================

/// Queue families used for graphics and presentation.
///
/// Both must be found before a logical device is created. They may be the
/// same family or two different ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// `[graphics, present]`
    ///
    /// # Panics
    /// If either family is missing. Callers check `is_complete` first.
    pub fn pair(&self) -> [u32; 2] {
        match (self.graphics, self.present) {
            (Some(graphics), Some(present)) => [graphics, present],
            _ => panic!("queue family indices are incomplete: {:?}", self),
        }
    }

    /// Distinct families, one queue is created per entry
    pub fn unique(&self) -> Vec<u32> {
        let [graphics, present] = self.pair();
        if graphics == present {
            vec![graphics]
        } else {
            vec![graphics, present]
        }
    }
}

/// Scan the device's queue families for graphics and present support.
///
/// Stops at the first family index where both have been found.
pub fn find_queue_families<Q: CapabilityQuery>(
    query: &Q,
    device: vk::PhysicalDevice,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in query.queue_families(device).iter().enumerate() {
        let i = i as u32;

        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(i);
        }

        if query.supports_present(device, i) {
            indices.present = Some(i);
        }

        if indices.is_complete() {
            break;
        }
    }

    if indices.graphics.is_none() {
        log::debug!("No graphics queue family found");
    }

    indices
}

/// Whether every name in `required` is among the device's extensions
pub fn supports_extensions<Q: CapabilityQuery>(
    query: &Q,
    device: vk::PhysicalDevice,
    required: &[&CStr],
) -> bool {
    let available = query.extension_names(device);

    required.iter().all(|name| {
        let name = name.to_string_lossy();
        available.iter().any(|ext| *ext == name)
    })
}

// =============================================================================
// SWAPCHAIN SUPPORT
// =============================================================================

/// Snapshot of what the surface supports on one device
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// `None` when the capabilities themselves cannot be queried
    pub fn query<Q: CapabilityQuery>(query: &Q, device: vk::PhysicalDevice) -> Option<Self> {
        let capabilities = query.surface_capabilities(device)?;

        Some(Self {
            capabilities,
            formats: query.surface_formats(device),
            present_modes: query.present_modes(device),
        })
    }

    /// A swapchain needs at least one format and one present mode
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Prefer 8-bit BGRA sRGB, otherwise whatever the surface lists first.
///
/// `formats` must not be empty (device selection guarantees it).
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if let Some(format) = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    }) {
        return *format;
    }

    log::warn!("Surface has no B8G8R8A8_SRGB/SRGB_NONLINEAR format, using the surface default");
    formats[0]
}

/// FIFO when saving power, else MAILBOX if available, else FIFO.
///
/// FIFO is the only mode the platform guarantees, so it is the only fallback.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], power_saving: bool) -> vk::PresentModeKHR {
    if power_saving {
        return vk::PresentModeKHR::FIFO;
    }

    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Surface extent, or the framebuffer size clamped to the surface limits when
/// the surface leaves it up to us (`current_extent.width == u32::MAX`).
///
/// # Panics
/// If the surface leaves the extent open and the framebuffer has a zero
/// dimension.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, framebuffer: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    assert!(
        framebuffer.width > 0 && framebuffer.height > 0,
        "framebuffer size must be positive, got {}x{}",
        framebuffer.width,
        framebuffer.height
    );

    vk::Extent2D {
        width: framebuffer.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: framebuffer.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}
