// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with the window's surface extensions (+ validation)
// - Debug messenger wired to an injected sink
// - Window surface
// - Physical device selection (graphics + present, swapchain support)
// - Logical device + graphics/present queues
//
// Nothing is destroyed here: every handle goes to the DeletionQueue.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::collections::BTreeSet;
use std::ffi::{CStr, CString};

use super::debug::{self, DebugSink};
use super::lifetime::{DeletionQueue, ResourceKind};
use super::swapchain::SwapchainSupport;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Queue families used for rendering and presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Scan the families in order and stop once both roles are filled.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut present_support: impl FnMut(u32) -> bool,
    ) -> Option<Self> {
        let mut graphics = None;
        let mut present = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if family.queue_count == 0 {
                continue;
            }
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            if present_support(index) {
                present = Some(index);
            }
            if let (Some(graphics), Some(present)) = (graphics, present) {
                return Some(Self { graphics, present });
            }
        }

        None
    }

    /// Distinct families; one queue is created for each.
    pub fn unique(&self) -> Vec<u32> {
        BTreeSet::from([self.graphics, self.present])
            .into_iter()
            .collect()
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Preference for a physical device type, higher wins.
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 1,
    }
}

/// Instance, surface and logical device for one window.
pub struct VulkanDevice {
    pub instance: ash::Instance,
    pub surface_loader: ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,

    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

impl VulkanDevice {
    /// Create the device for `window`.
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `debug_sink` - Receiver for validation output; `None` disables validation
    /// * `verbose_validation` - Also report info and verbose messages
    /// * `teardown` - Takes ownership of every created handle
    pub fn new<W>(
        window: &W,
        app_name: &str,
        debug_sink: Option<DebugSink>,
        verbose_validation: bool,
        teardown: &mut DeletionQueue,
    ) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        // Boxed again so the address handed to Vulkan stays put.
        let debug_sink: Option<Box<DebugSink>> = match debug_sink {
            Some(sink) if Self::validation_layer_available(&entry)? => Some(Box::new(sink)),
            Some(_) => {
                log::warn!(
                    "{} is not installed, continuing without validation",
                    VALIDATION_LAYER.to_string_lossy()
                );
                None
            }
            None => None,
        };
        let mut messenger_info = debug_sink
            .as_deref()
            .map(|sink| debug::messenger_create_info(sink, verbose_validation));

        // Step 2: Create instance
        let instance =
            Self::create_instance(&entry, app_name, display_handle, messenger_info.as_mut())?;
        {
            let entry = entry.clone();
            let instance = instance.clone();
            // Chained into the instance, so the sink must outlive it.
            teardown.push(ResourceKind::Instance, move || unsafe {
                instance.destroy_instance(None);
                drop(debug_sink);
                drop(entry);
            })?;
        }

        // Step 3: Debug messenger
        if let Some(info) = messenger_info {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = unsafe { debug_utils.create_debug_utils_messenger(&info, None) }
                .context("Failed to create debug messenger")?;
            teardown.push(ResourceKind::DebugMessenger, move || unsafe {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            })?;
        }

        // Step 4: Window surface
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface")?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        {
            let surface_loader = surface_loader.clone();
            teardown.push(ResourceKind::Surface, move || unsafe {
                surface_loader.destroy_surface(surface, None);
            })?;
        }

        // Step 5: Pick physical device (GPU)
        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {}",
            properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            queue_families.graphics,
            queue_families.present
        );

        // Step 6: Logical device
        let device = Self::create_logical_device(&instance, physical_device, &queue_families)?;
        {
            let device = device.clone();
            teardown.push(ResourceKind::Device, move || unsafe {
                device.destroy_device(None);
            })?;
        }

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        Ok(Self {
            instance,
            surface_loader,
            surface,
            physical_device,
            device,
            queue_families,
            graphics_queue,
            present_queue,
        })
    }

    fn validation_layer_available(entry: &Entry) -> Result<bool> {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }
            .context("Failed to enumerate instance layers")?;
        Ok(layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER)))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        display_handle: RawDisplayHandle,
        messenger_info: Option<&mut vk::DebugUtilsMessengerCreateInfoEXT<'static>>,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        // Surface extensions for whatever platform the window lives on
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Display has no Vulkan surface support")?
            .to_vec();
        let mut layer_names = Vec::new();

        let validation = messenger_info.is_some();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            layer_names.push(VALIDATION_LAYER.as_ptr());
        }

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);
        if let Some(messenger_info) = messenger_info {
            create_info = create_info.push_next(messenger_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        log::info!(
            "Instance created ({} extensions, validation {})",
            extensions.len(),
            if validation { "on" } else { "off" }
        );
        Ok(instance)
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate GPUs")?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let Some(families) = Self::suitable_queue_families(instance, surface_loader, surface, device)?
            else {
                continue;
            };

            let props = unsafe { instance.get_physical_device_properties(device) };
            let score = device_type_score(props.device_type);
            if score > best_score {
                best_score = score;
                best_device = Some((device, families));
            }
        }

        best_device.context("No GPU can render and present to this window")
    }

    /// Queue families of `device` if it can drive the surface, `None` otherwise.
    fn suitable_queue_families(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> Result<Option<QueueFamilyIndices>> {
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };
        let families = QueueFamilyIndices::find(&queue_families, |index| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .unwrap_or(false)
        });
        let Some(families) = families else {
            return Ok(None);
        };

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .context("Failed to enumerate device extensions")?;
        let has_swapchain = extensions
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(ash::khr::swapchain::NAME));
        if !has_swapchain {
            return Ok(None);
        }

        let support = SwapchainSupport::query(surface_loader, device, surface)?;
        if !support.is_adequate() {
            return Ok(None);
        }

        Ok(Some(families))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: &QueueFamilyIndices,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions = [ash::khr::swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}
