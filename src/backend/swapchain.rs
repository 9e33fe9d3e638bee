// Swapchain - Window presentation
//
// Owns the chain of images we render to and present, plus one view per image.
// Created once: the window is not resizable and there is no recreation path.

use anyhow::{Context, Result};
use ash::vk;

use super::device::VulkanDevice;
use super::lifetime::{DeletionQueue, ResourceKind};

/// What the surface supports on a given GPU.
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(
        surface_loader: &ash::khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .context("Failed to query surface capabilities")?,
                formats: surface_loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .context("Failed to query surface formats")?,
                present_modes: surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .context("Failed to query present modes")?,
            })
        }
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Prefer B8G8R8A8_UNORM / SRGB_NONLINEAR.
///
/// A lone UNDEFINED entry means the surface has no preference at all.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(preferred);
        }
    }

    formats
        .iter()
        .copied()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| formats.first().copied())
}

/// The requested mode if available, then MAILBOX > IMMEDIATE > FIFO.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    [preferred, vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO) // FIFO is always supported
}

/// `current_extent`, unless the surface leaves the size up to us.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped when the surface has a maximum.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Outcome of a successful image acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Optimal(u32),
    /// Still usable, but no longer matches the surface exactly.
    Suboptimal(u32),
}

impl Acquired {
    pub fn image_index(self) -> u32 {
        match self {
            Self::Optimal(index) | Self::Suboptimal(index) => index,
        }
    }

    pub fn is_suboptimal(self) -> bool {
        matches!(self, Self::Suboptimal(_))
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    pub fn new(
        device: &VulkanDevice,
        width: u32,
        height: u32,
        preferred_present_mode: vk::PresentModeKHR,
        teardown: &mut DeletionQueue,
    ) -> Result<Self> {
        let support =
            SwapchainSupport::query(&device.surface_loader, device.physical_device, device.surface)?;

        let surface_format =
            choose_surface_format(&support.formats).context("No suitable surface format")?;
        let present_mode = choose_present_mode(&support.present_modes, preferred_present_mode);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = choose_image_count(&support.capabilities);

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}, {} images requested",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            image_count
        );

        let families = device.queue_families;
        let family_indices = [families.graphics, families.present];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        // Images are shared between the two queues when they come from different families
        let create_info = if families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain_loader = ash::khr::swapchain::Device::new(&device.instance, &device.device);
        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;
        {
            let swapchain_loader = swapchain_loader.clone();
            teardown.push(ResourceKind::Swapchain, move || unsafe {
                swapchain_loader.destroy_swapchain(swapchain, None);
            })?;
        }

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;
        if images.is_empty() {
            anyhow::bail!("Swapchain returned no images");
        }

        log::info!("Created swapchain with {} images", images.len());

        let image_views = images
            .iter()
            .map(|&image| Self::create_image_view(device, image, surface_format.format, teardown))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            format: surface_format.format,
            extent,
            present_mode,
        })
    }

    fn create_image_view(
        device: &VulkanDevice,
        image: vk::Image,
        format: vk::Format,
        teardown: &mut DeletionQueue,
    ) -> Result<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
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

        let view = unsafe { device.device.create_image_view(&create_info, None) }
            .context("Failed to create image view")?;

        let owner = device.device.clone();
        teardown.push(ResourceKind::ImageView, move || unsafe {
            owner.destroy_image_view(view, None);
        })?;

        Ok(view)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image, signalling `semaphore` once it is ready.
    ///
    /// Only SUCCESS and SUBOPTIMAL come back as `Ok`; everything else,
    /// out-of-date included, is returned as the raw error.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<Acquired, vk::Result> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }?;

        Ok(if suboptimal {
            Acquired::Suboptimal(index)
        } else {
            Acquired::Optimal(index)
        })
    }

    /// Present rendered image to screen. `Ok(true)` means suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 64, height: 64 },
            max_image_extent: vk::Extent2D { width: 1920, height: 1080 },
            ..Default::default()
        }
    }

    #[test]
    fn undefined_only_format_means_free_choice() {
        let chosen = choose_surface_format(&[format(
            vk::Format::UNDEFINED,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )])
        .unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn preferred_format_wins_over_first() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap(), formats[1]);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap(), formats[0]);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_order() {
        use vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE, M::MAILBOX], M::FIFO), M::FIFO);
        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE, M::MAILBOX], M::FIFO_RELAXED), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE], M::MAILBOX), M::IMMEDIATE);
        assert_eq!(choose_present_mode(&[M::FIFO], M::MAILBOX), M::FIFO);
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(choose_extent(&c, 1280, 720), vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn extent_clamps_window_size() {
        let c = caps(2, 3);
        assert_eq!(choose_extent(&c, 1280, 720), vk::Extent2D { width: 1280, height: 720 });
        assert_eq!(choose_extent(&c, 4000, 10), vk::Extent2D { width: 1920, height: 64 });
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn acquired_exposes_index() {
        assert_eq!(Acquired::Optimal(2).image_index(), 2);
        assert_eq!(Acquired::Suboptimal(1).image_index(), 1);
        assert!(Acquired::Suboptimal(1).is_suboptimal());
        assert!(!Acquired::Optimal(0).is_suboptimal());
    }
}
