use std::ffi::{CStr, c_void};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::{RenderError, RenderResult};

/// Instance, surface, device and queue. Everything else in the renderer
/// is created from this and must be destroyed before it drops.
pub struct VulkanContext {
    _entry: ash::Entry,
    pub instance: ash::Instance,
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub surface_loader: ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub graphics_queue: vk::Queue,
    pub graphics_family: u32,
}

impl VulkanContext {
    pub fn new<W: HasDisplayHandle + HasWindowHandle>(
        window: &W,
        app_name: &CStr,
        validation: bool,
    ) -> RenderResult<Self> {
        let display_handle = window.display_handle()?.as_raw();
        let window_handle = window.window_handle()?.as_raw();

        unsafe {
            // 1. Instance
            let entry = ash::Entry::load()?;

            let app_info = vk::ApplicationInfo::default()
                .application_name(app_name)
                .application_version(vk::make_api_version(0, 0, 1, 0))
                .engine_name(c"Catalyst")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            let mut extension_names =
                ash_window::enumerate_required_extensions(display_handle)?.to_vec();
            if validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }
            let layer_names = if validation {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                vec![]
            };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);
            let instance = entry.create_instance(&create_info, None)?;

            // 2. Debug messenger
            let debug = if validation {
                let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
                let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(
                        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                    )
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(vulkan_debug_callback));
                let messenger = debug_utils.create_debug_utils_messenger(&debug_info, None)?;
                Some((debug_utils, messenger))
            } else {
                None
            };

            // 3. Surface
            let surface = ash_window::create_surface(
                &entry,
                &instance,
                display_handle,
                window_handle,
                None,
            )?;
            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

            // 4. Physical device + queue family
            let (physical_device, graphics_family) =
                pick_physical_device(&instance, &surface_loader, surface)?;

            let properties = instance.get_physical_device_properties(physical_device);
            let name = properties
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            log::info!(
                "Using GPU {name} ({:?}), graphics queue family {graphics_family}",
                properties.device_type
            );

            // 5. Logical device with the features the renderer relies on
            let queue_priorities = [1.0];
            let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_family)
                .queue_priorities(&queue_priorities)];

            let device_extension_names = [ash::khr::swapchain::NAME.as_ptr()];

            let mut features_11 =
                vk::PhysicalDeviceVulkan11Features::default().shader_draw_parameters(true);
            let mut features_12 = vk::PhysicalDeviceVulkan12Features::default()
                .buffer_device_address(true)
                .descriptor_indexing(true)
                .shader_sampled_image_array_non_uniform_indexing(true)
                .runtime_descriptor_array(true);
            let mut features_13 = vk::PhysicalDeviceVulkan13Features::default()
                .dynamic_rendering(true)
                .synchronization2(true);
            let mut features = vk::PhysicalDeviceFeatures2::default()
                .features(vk::PhysicalDeviceFeatures::default().multi_draw_indirect(true))
                .push_next(&mut features_11)
                .push_next(&mut features_12)
                .push_next(&mut features_13);

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names)
                .push_next(&mut features);

            let device = instance.create_device(physical_device, &device_create_info, None)?;
            let graphics_queue = device.get_device_queue(graphics_family, 0);
            let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

            Ok(Self {
                _entry: entry,
                instance,
                debug,
                surface_loader,
                surface,
                physical_device,
                device,
                swapchain_loader,
                graphics_queue,
                graphics_family,
            })
        }
    }

    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Prefers discrete GPUs, then integrated, then anything else that
/// passes [`supports_renderer`].
unsafe fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> RenderResult<(vk::PhysicalDevice, u32)> {
    let mut rejected = Vec::new();
    let mut best: Option<(u32, vk::PhysicalDevice, u32)> = None;

    for physical_device in unsafe { instance.enumerate_physical_devices()? } {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let family = match unsafe {
            supports_renderer(instance, surface_loader, surface, physical_device)
        } {
            Ok(family) => family,
            Err(reason) => {
                log::debug!("Skipping GPU {name}: {reason}");
                rejected.push(format!("{name}: {reason}"));
                continue;
            }
        };

        let score = match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 3,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
            _ => 0,
        };
        if best.is_none_or(|(best_score, _, _)| score > best_score) {
            best = Some((score, physical_device, family));
        }
    }

    best.map(|(_, device, family)| (device, family))
        .ok_or_else(|| {
            if rejected.is_empty() {
                RenderError::NoSuitableDevice("no Vulkan devices found".to_string())
            } else {
                RenderError::NoSuitableDevice(rejected.join("; "))
            }
        })
}

/// Returns the graphics+present queue family, or why the device is unusable.
unsafe fn supports_renderer(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<u32, String> {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    if properties.api_version < vk::API_VERSION_1_3 {
        return Err("Vulkan 1.3 is not supported".to_string());
    }

    let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .map_err(|e| e.to_string())?;
    let has_swapchain = extensions
        .iter()
        .any(|ext| ext.extension_name_as_c_str() == Ok(ash::khr::swapchain::NAME));
    if !has_swapchain {
        return Err("VK_KHR_swapchain is missing".to_string());
    }

    let mut features_11 = vk::PhysicalDeviceVulkan11Features::default();
    let mut features_12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features_13 = vk::PhysicalDeviceVulkan13Features::default();
    let multi_draw_indirect = {
        let mut features = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut features_11)
            .push_next(&mut features_12)
            .push_next(&mut features_13);
        unsafe { instance.get_physical_device_features2(physical_device, &mut features) };
        features.features.multi_draw_indirect
    };

    let required = [
        ("multiDrawIndirect", multi_draw_indirect),
        ("shaderDrawParameters", features_11.shader_draw_parameters),
        ("bufferDeviceAddress", features_12.buffer_device_address),
        ("descriptorIndexing", features_12.descriptor_indexing),
        (
            "shaderSampledImageArrayNonUniformIndexing",
            features_12.shader_sampled_image_array_non_uniform_indexing,
        ),
        ("runtimeDescriptorArray", features_12.runtime_descriptor_array),
        ("dynamicRendering", features_13.dynamic_rendering),
        ("synchronization2", features_13.synchronization2),
    ];
    let missing: Vec<&str> = required
        .iter()
        .filter(|(_, supported)| *supported == vk::FALSE)
        .map(|(name, _)| *name)
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing features {}", missing.join(", ")));
    }

    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    families
        .iter()
        .enumerate()
        .find(|(index, family)| {
            family.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
                && unsafe {
                    surface_loader.get_physical_device_surface_support(
                        physical_device,
                        *index as u32,
                        surface,
                    )
                }
                .unwrap_or(false)
        })
        .map(|(index, _)| index as u32)
        .ok_or_else(|| "no queue family with graphics, compute and present".to_string())
}

unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = unsafe {
        if callback_data.is_null() || (*callback_data).p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan {message_type:?}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[vulkan {message_type:?}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::debug!("[vulkan {message_type:?}] {message}");
    } else {
        log::trace!("[vulkan {message_type:?}] {message}");
    }

    vk::FALSE
}
