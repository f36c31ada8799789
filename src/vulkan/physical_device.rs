use std::collections::HashMap;
use std::ffi::CStr;

use anyhow::{bail, Context as _, Result};
use ash::vk;
use ash::vk::{Format, FormatFeatureFlags, PhysicalDeviceType, PresentModeKHR, SurfaceFormatKHR};
use crate::vulkan::instance::Instance;
use crate::vulkan::queue::QueueFamily;
use crate::vulkan::surface::Surface;

pub const REQUIRED_EXTENSIONS: [&str; 4] = [
    "VK_KHR_swapchain",
    "VK_KHR_ray_tracing_pipeline",
    "VK_KHR_acceleration_structure",
    "VK_KHR_deferred_host_operations",
];

pub const REQUIRED_DEVICE_FEATURES: [&str; 6] = [
    "shaderInt64",
    "bufferDeviceAddress",
    "scalarBlockLayout",
    "synchronization2",
    "rayTracingPipeline",
    "accelerationStructure",
];

// See https://stackoverflow.com/questions/75094730/why-prefer-non-srgb-format-for-vulkan-swapchain
const RENDER_OUTPUT_FALLBACK_FORMATS: [Format; 4] = [
    Format::B8G8R8A8_UNORM,
    Format::R8G8B8A8_UNORM,
    Format::R8G8B8A8_SNORM,
    Format::R8G8B8A8_UINT,
];

// https://www.reddit.com/r/vulkan/comments/4sbpnz/trying_to_understand_presentation_modes/
const PRESENT_MODE_PRIO: [PresentModeKHR; 4] = [
    PresentModeKHR::FIFO_RELAXED,
    PresentModeKHR::FIFO,
    PresentModeKHR::MAILBOX,
    PresentModeKHR::IMMEDIATE,
];

#[derive(Debug, Clone)]
pub struct PhysicalDevice {
    pub inner: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,

    pub limits: vk::PhysicalDeviceLimits,

    pub graphics_queue_family: QueueFamily,
    pub present_queue_family: QueueFamily,

    pub surface_format: SurfaceFormatKHR,
    pub render_storage_image_format: Format,

    pub present_mode: PresentModeKHR,
}

#[derive(Debug, Clone)]
struct PhysicalDeviceCapabilities {
    inner: vk::PhysicalDevice,
    name: String,
    device_type: vk::PhysicalDeviceType,
    limits: vk::PhysicalDeviceLimits,

    graphics_queues: Vec<QueueFamily>,
    present_queues: Vec<QueueFamily>,

    required_extensions: HashMap<String, bool>,
    required_extensions_ok: bool,

    supported_surface_formats: Vec<SurfaceFormatKHR>,
    supported_surface_formats_with_storage_bit: Vec<SurfaceFormatKHR>,
    render_storage_image_formats: Vec<Format>,

    supported_present_modes: Vec<PresentModeKHR>,

    required_device_features: HashMap<String, bool>,
    required_device_features_ok: bool,
}

impl PhysicalDevice {
    pub(crate) fn select(instance: &Instance, surface: &Surface) -> Result<Self> {
        let physical_devices = unsafe { instance.inner.enumerate_physical_devices()? };

        let capabilities = physical_devices
            .into_iter()
            .map(|pd| PhysicalDeviceCapabilities::new(instance, surface, pd))
            .collect::<Result<Vec<_>>>()?;

        let mut seen_names = Vec::new();
        let mut devices_capabilities: Vec<_> = capabilities
            .iter()
            .filter_map(|device_capabilities| {
                let name = &device_capabilities.name;

                if seen_names.contains(name) {
                    return None;
                }
                seen_names.push(name.to_owned());
                log::info!("Possible Device: {name}");

                let mut ok = true;
                log::info!(" -- Device Type: {:?}", device_capabilities.device_type);
                let minus_points = device_type_penalty(device_capabilities.device_type);
                if minus_points != 0 {
                    log::info!(" ---- {minus_points} Points");
                }

                if device_capabilities.graphics_queues.is_empty() {
                    ok = false;
                    log::info!(" -- No Graphics Queue");
                }

                if device_capabilities.present_queues.is_empty() {
                    ok = false;
                    log::info!(" -- No Present Queue");
                }

                if device_capabilities.supported_surface_formats.is_empty() {
                    ok = false;
                    log::info!(" -- No Supported Surface Format");
                }

                if device_capabilities.supported_surface_formats_with_storage_bit.is_empty() {
                    log::info!(" -- No Supported Surface Format with Storage Bit");
                    if device_capabilities.render_storage_image_formats.is_empty() {
                        ok = false;
                        log::info!(" -- No Supported Render Storage Image Format");
                    }
                }

                if device_capabilities.supported_present_modes.is_empty() {
                    ok = false;
                    log::info!(" -- No Present Mode");
                }

                if !device_capabilities.required_extensions_ok {
                    ok = false;
                    log::info!(" -- Extensions not ok");
                    for (n, b) in device_capabilities.required_extensions.iter() {
                        if !b {
                            log::info!(" ---- {n} missing.");
                        }
                    }
                }

                if !device_capabilities.required_device_features_ok {
                    ok = false;
                    log::info!(" -- Device Features not ok");
                    for (n, b) in device_capabilities.required_device_features.iter() {
                        if !b {
                            log::info!(" ---- {n} missing.");
                        }
                    }
                }

                if ok {
                    log::info!(" -- Ok");
                    return Some((device_capabilities, minus_points));
                }

                None
            }).collect();

        if devices_capabilities.is_empty() {
            bail!("No suitable Device found! Hardware ray tracing support is required.")
        }

        devices_capabilities.sort_by(|(c1, minus_points1), (c2, minus_points2)| {
            minus_points2.cmp(minus_points1).then(c1.limits.max_memory_allocation_count.cmp(&c2.limits.max_memory_allocation_count))
        });

        log::info!("Sorted suitable Devices: ");
        for (c, _) in devices_capabilities.iter() {
            log::info!(" -- {}", c.name);
        }

        let selected = devices_capabilities[0].0;
        log::info!("Selected Physical Device: {}", selected.name);

        let device_type = selected.device_type;
        log::info!(" -- Device Type: {device_type:?}");

        let (surface_format, surface_format_storage_image_support) = match selected.supported_surface_formats_with_storage_bit.first() {
            Some(format) => (*format, true),
            None => (selected.supported_surface_formats[0], false),
        };
        log::info!(" -- Surface format: {:?}  {:?}", surface_format.format, surface_format.color_space);
        log::info!(" ---- {} storage image support", if surface_format_storage_image_support {"✔"} else {"❌"});

        let render_storage_image_format = select_render_storage_image_format(
            &selected.supported_surface_formats_with_storage_bit,
            &selected.render_storage_image_formats,
        ).context("No render storage image format")?;
        log::info!(" -- Render storage image format: {:?}", render_storage_image_format);

        let present_mode = selected.supported_present_modes[0];
        log::info!(" -- Present Mode: {:?} ", present_mode);

        Ok(PhysicalDevice {
            inner: selected.inner,
            name: selected.name.to_owned(),
            device_type,
            limits: selected.limits,
            graphics_queue_family: selected.graphics_queues[0],
            present_queue_family: selected.present_queues[0],
            surface_format,
            render_storage_image_format,
            present_mode,
        })
    }
}

impl PhysicalDeviceCapabilities {
    fn new(
        instance: &Instance,
        surface: &Surface,
        inner: vk::PhysicalDevice,
    ) -> Result<Self> {
        let props = unsafe { instance.inner.get_physical_device_properties(inner) };

        // Name
        let name = unsafe {
            CStr::from_ptr(props.device_name.as_ptr())
                .to_str()?
                .to_owned()
        };

        // Queues
        let queue_family_properties =
            unsafe { instance.inner.get_physical_device_queue_family_properties(inner) };
        let queue_families: Vec<_> = queue_family_properties
            .into_iter()
            .enumerate()
            .map(|(index, p)| {
                let present_support = unsafe {
                    surface.inner.get_physical_device_surface_support(
                        inner,
                        index as _,
                        surface.surface_khr,
                    )?
                };

                Ok(QueueFamily::new(index as _, &p, present_support))
            })
            .collect::<Result<_>>()?;

        let mut graphics = vec![];
        let mut present = vec![];
        for family in &queue_families {
            if family.can_trace() {
                graphics.push(*family);
            }

            if family.can_present() {
                present.push(*family);
            }
        }

        // Extensions
        let extension_properties =
            unsafe { instance.inner.enumerate_device_extension_properties(inner)? };
        let supported_extensions = extension_properties
            .into_iter()
            .map(|p| {
                let name = unsafe { CStr::from_ptr(p.extension_name.as_ptr()) };
                Ok(name.to_str()?.to_owned())
            })
            .collect::<Result<Vec<_>>>()?;

        let mut required_extensions_ok = true;
        let required_extensions = REQUIRED_EXTENSIONS.iter().map(|name| {
            let found = supported_extensions.iter().any(|e| e == name);
            required_extensions_ok &= found;
            (name.to_string(), found)
        }).collect();

        // Surface Formats
        let surface_formats = unsafe {
            surface
                .inner
                .get_physical_device_surface_formats(inner, surface.surface_khr)?
        };

        let supports_storage = |format: Format| unsafe {
            let property = instance.inner.get_physical_device_format_properties(inner, format);
            property.optimal_tiling_features.contains(FormatFeatureFlags::STORAGE_IMAGE)
        };

        let surface_formats_with_storage_bit: Vec<_> = surface_formats
            .iter()
            .copied()
            .filter(|format| supports_storage(format.format))
            .collect();

        let render_storage_image_formats: Vec<_> = RENDER_OUTPUT_FALLBACK_FORMATS
            .into_iter()
            .filter(|format| supports_storage(*format))
            .collect();

        // Present Mode
        let supported_present_modes = unsafe {
            surface
                .inner
                .get_physical_device_surface_present_modes(inner, surface.surface_khr)?
        };

        // Device Features
        let required_device_features = query_required_device_features(instance, inner);
        let required_device_features_ok = required_device_features.values().all(|b| *b);

        Ok(Self {
            inner,
            name,
            device_type: props.device_type,
            limits: props.limits,

            graphics_queues: graphics,
            present_queues: present,

            required_extensions,
            required_extensions_ok,

            supported_surface_formats: surface_formats,
            supported_surface_formats_with_storage_bit: surface_formats_with_storage_bit,
            render_storage_image_formats,

            supported_present_modes: sort_present_modes(&supported_present_modes),

            required_device_features,
            required_device_features_ok,
        })
    }
}

fn query_required_device_features(instance: &Instance, inner: vk::PhysicalDevice) -> HashMap<String, bool> {
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut ray_tracing_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
    let mut acceleration_structure_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();

    let features = {
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut features12)
            .push_next(&mut features13)
            .push_next(&mut ray_tracing_features)
            .push_next(&mut acceleration_structure_features);
        unsafe { instance.inner.get_physical_device_features2(inner, &mut features2) };
        features2.features
    };

    let supported = [
        features.shader_int64,
        features12.buffer_device_address,
        features12.scalar_block_layout,
        features13.synchronization2,
        ray_tracing_features.ray_tracing_pipeline,
        acceleration_structure_features.acceleration_structure,
    ];

    REQUIRED_DEVICE_FEATURES
        .iter()
        .zip(supported)
        .map(|(name, value)| (name.to_string(), value == vk::TRUE))
        .collect()
}

pub(crate) fn device_type_penalty(device_type: PhysicalDeviceType) -> i32 {
    match device_type {
        PhysicalDeviceType::VIRTUAL_GPU => -150,
        PhysicalDeviceType::CPU => -100,
        PhysicalDeviceType::INTEGRATED_GPU => -50,
        PhysicalDeviceType::OTHER => -10,
        _ => 0,
    }
}

pub(crate) fn sort_present_modes(supported: &[PresentModeKHR]) -> Vec<PresentModeKHR> {
    PRESENT_MODE_PRIO
        .into_iter()
        .filter(|mode| supported.contains(mode))
        .collect()
}

/// The render output is copied into the swapchain image, so a surface format that
/// can be written from a shader is preferred over any fallback.
pub(crate) fn select_render_storage_image_format(
    surface_formats_with_storage_bit: &[SurfaceFormatKHR],
    fallback_formats: &[Format],
) -> Option<Format> {
    surface_formats_with_storage_bit
        .first()
        .map(|f| f.format)
        .or_else(|| fallback_formats.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_gpu_has_no_penalty() {
        assert_eq!(device_type_penalty(PhysicalDeviceType::DISCRETE_GPU), 0);
        assert!(device_type_penalty(PhysicalDeviceType::INTEGRATED_GPU) < 0);
        assert!(device_type_penalty(PhysicalDeviceType::CPU) < device_type_penalty(PhysicalDeviceType::INTEGRATED_GPU));
    }

    #[test]
    fn present_modes_follow_priority() {
        let sorted = sort_present_modes(&[
            PresentModeKHR::IMMEDIATE,
            PresentModeKHR::MAILBOX,
            PresentModeKHR::FIFO,
        ]);
        assert_eq!(sorted, vec![PresentModeKHR::FIFO, PresentModeKHR::MAILBOX, PresentModeKHR::IMMEDIATE]);
    }

    #[test]
    fn render_format_prefers_storage_capable_surface_format() {
        let surface = [SurfaceFormatKHR {
            format: Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            select_render_storage_image_format(&surface, &[Format::R8G8B8A8_UNORM]),
            Some(Format::B8G8R8A8_UNORM)
        );
        assert_eq!(
            select_render_storage_image_format(&[], &[Format::R8G8B8A8_UNORM]),
            Some(Format::R8G8B8A8_UNORM)
        );
        assert_eq!(select_render_storage_image_format(&[], &[]), None);
    }
}
