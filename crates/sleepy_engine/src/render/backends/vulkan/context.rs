//! Vulkan instance, physical device selection and logical device
//!
//! Requires Vulkan 1.3: timeline semaphores back the queue fence and dynamic
//! rendering replaces render pass objects.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};

use crate::render::backend::{BackendError, BackendResult};
use crate::window::GlfwWindow;

use super::api_error;

/// Vulkan instance with optional validation layer and debug messenger
pub struct VulkanInstance {
    /// Loaded entry points
    pub entry: Entry,
    /// Instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create the instance with the extensions GLFW needs for presentation
    pub fn new(window: &GlfwWindow, app_name: &str, enable_validation: bool) -> BackendResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| BackendError::Initialization(format!("Failed to load Vulkan: {}", e)))?;

        let app_name = CString::new(app_name)
            .map_err(|_| BackendError::Initialization("application name contains NUL".to_string()))?;
        let engine_name = CString::new("SleepyEngine")
            .map_err(|_| BackendError::Initialization("engine name contains NUL".to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let required = window
            .required_instance_extensions()
            .map_err(|e| BackendError::Initialization(e.to_string()))?;
        let required: Vec<CString> = required
            .into_iter()
            .map(CString::new)
            .collect::<Result<_, _>>()
            .map_err(|_| BackendError::Initialization("extension name contains NUL".to_string()))?;
        let mut extensions: Vec<*const c_char> = required.iter().map(|ext| ext.as_ptr()).collect();

        let validation_layer = CString::new("VK_LAYER_KHRONOS_validation")
            .map_err(|_| BackendError::Initialization("layer name contains NUL".to_string()))?;
        let validation = enable_validation && Self::layer_available(&entry, &validation_layer);
        if enable_validation && !validation {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        let mut layers: Vec<*const c_char> = Vec::new();
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
            layers.push(validation_layer.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| api_error("vkCreateInstance", e))?;

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            log::info!("Vulkan validation layer enabled");
            Some((debug_utils, messenger))
        } else {
            None
        };

        Ok(Self { entry, instance, debug })
    }

    fn layer_available(entry: &Entry, name: &CStr) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers
                    .iter()
                    .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == name)
            })
            .unwrap_or(false)
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> BackendResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(|e| api_error("vkCreateDebugUtilsMessengerEXT", e))
    }

    /// Whether the validation layer is active
    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Routes validation messages into the log
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Window surface with its extension loader
pub struct VulkanSurface {
    /// Surface extension loader
    pub loader: Surface,
    /// Surface handle
    pub surface: vk::SurfaceKHR,
}

impl VulkanSurface {
    /// Create the presentation surface for `window`
    pub fn new(instance: &VulkanInstance, window: &mut GlfwWindow) -> BackendResult<Self> {
        let loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window
            .create_vulkan_surface(instance.instance.handle())
            .map_err(|e| BackendError::Initialization(format!("Surface creation: {}", e)))?;
        Ok(Self { loader, surface })
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

/// Selected GPU and the queue family used for graphics and presentation
pub struct PhysicalDeviceInfo {
    /// Physical device handle
    pub device: vk::PhysicalDevice,
    /// Properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family supporting both graphics and present
    pub queue_family: u32,
}

impl PhysicalDeviceInfo {
    /// Pick the first Vulkan 1.3 device that can render and present to `surface`
    pub fn select(instance: &Instance, surface: &VulkanSurface) -> BackendResult<Self> {
        let devices =
            unsafe { instance.enumerate_physical_devices() }.map_err(|e| api_error("vkEnumeratePhysicalDevices", e))?;

        for device in devices {
            match Self::evaluate(instance, device, surface) {
                Ok(info) => {
                    log::info!("Selected GPU: {}", info.name());
                    return Ok(info);
                }
                Err(reason) => log::debug!("Skipping GPU: {}", reason),
            }
        }

        Err(BackendError::Initialization("No suitable GPU found".to_string()))
    }

    fn evaluate(instance: &Instance, device: vk::PhysicalDevice, surface: &VulkanSurface) -> BackendResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        if properties.api_version < vk::API_VERSION_1_3 {
            return Err(BackendError::Unsupported("Vulkan 1.3 required".to_string()));
        }

        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut features12)
            .push_next(&mut features13);
        unsafe { instance.get_physical_device_features2(device, &mut features) };
        if features12.timeline_semaphore == vk::FALSE || features13.dynamic_rendering == vk::FALSE {
            return Err(BackendError::Unsupported(
                "timeline semaphores and dynamic rendering required".to_string(),
            ));
        }

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let mut queue_family = None;
        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;
            let present = unsafe {
                surface
                    .loader
                    .get_physical_device_surface_support(device, index, surface.surface)
            }
            .map_err(|e| api_error("vkGetPhysicalDeviceSurfaceSupportKHR", e))?;
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present {
                queue_family = Some(index);
                break;
            }
        }
        let queue_family = queue_family
            .ok_or_else(|| BackendError::Unsupported("no queue family with graphics and present".to_string()))?;

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .map_err(|e| api_error("vkEnumerateDeviceExtensionProperties", e))?;
        let has_swapchain = extensions
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == SwapchainLoader::name());
        if !has_swapchain {
            return Err(BackendError::Unsupported("VK_KHR_swapchain missing".to_string()));
        }

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        Ok(Self {
            device,
            properties,
            memory_properties,
            queue_family,
        })
    }

    /// Device name as reported by the driver
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// Index of a memory type allowed by `type_bits` with all `properties`
    pub fn find_memory_type(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> BackendResult<u32> {
        (0..self.memory_properties.memory_type_count)
            .find(|&i| {
                type_bits & (1 << i) != 0
                    && self.memory_properties.memory_types[i as usize]
                        .property_flags
                        .contains(properties)
            })
            .ok_or_else(|| BackendError::Unsupported(format!("no memory type with {:?}", properties)))
    }
}

/// Logical device with its single graphics/present queue
pub struct LogicalDevice {
    /// Device handle
    pub device: Device,
    /// The direct queue
    pub queue: vk::Queue,
    /// Family of `queue`
    pub queue_family: u32,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create the device with timeline semaphores and dynamic rendering enabled
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> BackendResult<Self> {
        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(physical.queue_family)
            .queue_priorities(&priorities)
            .build()];

        let extensions = [SwapchainLoader::name().as_ptr()];
        let mut features12 = vk::PhysicalDeviceVulkan12Features::builder().timeline_semaphore(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder().dynamic_rendering(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut features12)
            .push_next(&mut features13);

        let device = unsafe { instance.create_device(physical.device, &create_info, None) }
            .map_err(|e| api_error("vkCreateDevice", e))?;
        let queue = unsafe { device.get_device_queue(physical.queue_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            queue,
            queue_family: physical.queue_family,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}
