// Swapchain - Window presentation
//
// Manages the chain of images presented to the window surface. The plan
// (format, mode, extent, image count, sharing) is worked out from the
// surface capabilities first; the driver is only called once it is settled.

use anyhow::{Context, Result};
use ash::vk;

use super::capabilities::{
    choose_extent, choose_present_mode, choose_surface_format, find_queue_families,
    CapabilityQuery, QueueFamilyIndices, SwapchainSupport,
};

/// One more than the minimum so we never wait on the driver for an image,
/// limited by the maximum when there is one (0 means unbounded).
pub fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count.saturating_add(1);
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

/// How swapchain images are shared between the graphics and present queues
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSharing {
    pub mode: vk::SharingMode,
    /// Empty for exclusive sharing
    pub family_indices: Vec<u32>,
}

impl ImageSharing {
    /// Concurrent across both families when they differ, exclusive otherwise.
    ///
    /// # Panics
    /// If `families` is incomplete.
    pub fn for_families(families: &QueueFamilyIndices) -> Self {
        let [graphics, present] = families.pair();
        if graphics != present {
            Self {
                mode: vk::SharingMode::CONCURRENT,
                family_indices: vec![graphics, present],
            }
        } else {
            Self {
                mode: vk::SharingMode::EXCLUSIVE,
                family_indices: Vec::new(),
            }
        }
    }
}

/// Everything needed to fill in `vk::SwapchainCreateInfoKHR`
#[derive(Debug, Clone, PartialEq)]
pub struct SwapchainPlan {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub sharing: ImageSharing,
}

impl SwapchainPlan {
    /// `None` when the surface offers no format or no present mode
    pub fn new(
        support: &SwapchainSupport,
        families: &QueueFamilyIndices,
        framebuffer: vk::Extent2D,
        power_saving: bool,
    ) -> Option<Self> {
        if !support.is_adequate() {
            return None;
        }

        Some(Self {
            format: choose_surface_format(&support.formats),
            present_mode: choose_present_mode(&support.present_modes, power_saving),
            extent: choose_extent(&support.capabilities, framebuffer),
            image_count: image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
            sharing: ImageSharing::for_families(families),
        })
    }
}

/// Swapchain with its images and one view per image.
///
/// Holds a clone of the device's function table; the owner must drop the
/// swapchain before destroying the device.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    device: ash::Device,
}

impl Swapchain {
    pub fn new<Q: CapabilityQuery>(
        query: &Q,
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        framebuffer: vk::Extent2D,
        power_saving: bool,
    ) -> Result<Self> {
        let support = SwapchainSupport::query(query, physical_device)
            .context("Failed to query surface capabilities")?;

        let families = find_queue_families(query, physical_device);
        anyhow::ensure!(
            families.is_complete(),
            "Queue families no longer support graphics and presentation"
        );

        let plan = SwapchainPlan::new(&support, &families, framebuffer, power_saving)
            .context("Surface offers no format or present mode")?;

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}/{:?}, {:?}, {:?} sharing",
            plan.extent.width,
            plan.extent.height,
            plan.image_count,
            plan.format.format,
            plan.format.color_space,
            plan.present_mode,
            plan.sharing.mode
        );

        let swapchain_loader = ash::extensions::khr::Swapchain::new(instance, device);

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(plan.image_count)
            .image_format(plan.format.format)
            .image_color_space(plan.format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(plan.sharing.mode)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true);
        if !plan.sharing.family_indices.is_empty() {
            create_info = create_info.queue_family_indices(&plan.sharing.family_indices);
        }

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        // From here on the swapchain is ours; release it on any later failure
        let mut this = Self {
            swapchain,
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format: plan.format,
            present_mode: plan.present_mode,
            extent: plan.extent,
            device: device.clone(),
        };

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;

        for &image in &this.images {
            let view = create_image_view(device, image, plan.format.format)?;
            this.image_views.push(view);
        }

        log::info!("Created swapchain with {} images", this.images.len());

        Ok(this)
    }
}

fn create_image_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }.context("Failed to create image view")
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
