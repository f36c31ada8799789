use std::ffi::{c_char, c_void, CStr, CString};

use anyhow::{bail, Result};
use ash::{
    ext::debug_utils,
    vk::{self, DebugUtilsMessengerEXT},
    Instance as AshInstance,
};
use log::info;
use raw_window_handle::HasDisplayHandle;

use crate::vulkan::entry::Entry;
use crate::vulkan::Version;
use crate::EngineConfig;
use crate::EngineFeatureValue::{Needed, NotUsed};

pub struct Instance {
    pub(crate) inner: AshInstance,
    debug_report_callback: Option<(debug_utils::Instance, DebugUtilsMessengerEXT)>,
    pub(crate) validation_layers: bool,
}

impl Instance {
    pub(crate) fn new(
        entry: &Entry,
        display_handle: &dyn HasDisplayHandle,
        engine_config: &EngineConfig,
    ) -> Result<Self> {
        let version = Version::Vk1_3;
        info!("Using Vulkan Version {:?}", version);

        // Vulkan instance
        let app_name = CString::new(engine_config.name.as_bytes())?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name.as_c_str())
            .api_version(version.make_api_version());

        let mut extension_names =
            ash_window::enumerate_required_extensions(display_handle.display_handle()?.as_raw())?
                .to_vec();

        // Validation Layers
        let mut validation_layers = false;
        let (_layer_names, layer_names_ptrs) = get_validation_layer_names_and_pointers()?;
        if engine_config.validation_layers != NotUsed {
            if entry.check_layer_support(&REQUIRED_DEBUG_LAYERS)? {
                extension_names.push(debug_utils::NAME.as_ptr());
                validation_layers = true;
            } else if engine_config.validation_layers == Needed {
                bail!("Validation Layers are needed but not supported by hardware.")
            }
        }

        let mut instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names);

        if validation_layers {
            instance_create_info = instance_create_info.enabled_layer_names(&layer_names_ptrs);
        }

        // Creating Instance
        let inner = unsafe { entry.inner.create_instance(&instance_create_info, None)? };

        // Validation
        let debug_report_callback = if validation_layers {
            Some(setup_debug_messenger(&entry.inner, &inner)?)
        } else {
            None
        };

        Ok(Self {
            inner,
            debug_report_callback,
            validation_layers,
        })
    }
}


const REQUIRED_DEBUG_LAYERS: [&str; 1] = ["VK_LAYER_KHRONOS_validation"];

/// Get the pointers to the validation layers names.
/// Also return the corresponding `CString` to avoid dangling pointers.
fn get_validation_layer_names_and_pointers() -> Result<(Vec<CString>, Vec<*const c_char>)> {
    let layer_names = REQUIRED_DEBUG_LAYERS
        .iter()
        .map(|name| CString::new(*name))
        .collect::<Result<Vec<_>, _>>()?;
    let layer_names_ptrs = layer_names
        .iter()
        .map(|name| name.as_ptr())
        .collect::<Vec<_>>();
    Ok((layer_names, layer_names_ptrs))
}

unsafe extern "system" fn vulkan_debug_callback(
    flag: vk::DebugUtilsMessageSeverityFlagsEXT,
    typ: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _: *mut c_void,
) -> vk::Bool32 {
    use vk::DebugUtilsMessageSeverityFlagsEXT as Flag;

    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) };
    match flag {
        Flag::VERBOSE => log::trace!("{:?} - {:?}", typ, message),
        Flag::INFO => {
            //log::info!("{:?} - {:?}", typ, message)
        },
        Flag::WARNING => log::warn!("{:?} - {:?}", typ, message),
        _ => log::error!("{:?} - {:?}", typ, message),
    }
    vk::FALSE
}

/// Setup the debug message if validation layers are enabled.
fn setup_debug_messenger(
    entry: &ash::Entry,
    instance: &AshInstance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
        )
        .pfn_user_callback(Some(vulkan_debug_callback));

    let debug_utils = debug_utils::Instance::new(entry, instance);
    let debug_utils_messenger = unsafe {
        debug_utils.create_debug_utils_messenger(&create_info, None)?
    };

    Ok((debug_utils, debug_utils_messenger))
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((utils, messenger)) = self.debug_report_callback.take() {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.inner.destroy_instance(None);
        }
    }
}
