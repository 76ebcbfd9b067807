//! Vulkan instance management.
//!
//! This module handles VkInstance creation, validation layers, and the debug
//! messenger that forwards validation output into `tracing`.
//!
//! # Example
//!
//! ```no_run
//! use venus_rhi::instance::{Instance, InstanceConfig};
//!
//! let instance = InstanceConfig::new("demo")
//!     .validation(cfg!(debug_assertions))
//!     .create()
//!     .expect("Failed to create Vulkan instance");
//! let vk_instance = instance.handle();
//! ```

use std::ffi::{CStr, CString, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

/// The Khronos validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// API version requested when the caller does not pick one.
pub const DEFAULT_API_VERSION: u32 = vk::make_api_version(0, 1, 4, 0);

/// Lowest API version the renderer can run on: dynamic rendering and
/// synchronization2 are core in 1.3.
pub const MIN_API_VERSION: u32 = vk::API_VERSION_1_3;

/// Options for [`Instance`] creation.
#[derive(Clone, Debug)]
pub struct InstanceConfig {
    pub application_name: String,
    pub api_version: u32,
    /// Request the Khronos validation layer and a debug messenger.
    pub validation: bool,
    /// Instance extensions required by the presentation surface.
    pub surface_extensions: Vec<&'static CStr>,
}

impl InstanceConfig {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            api_version: DEFAULT_API_VERSION,
            validation: false,
            surface_extensions: Vec::new(),
        }
    }

    pub fn api_version(mut self, api_version: u32) -> Self {
        self.api_version = api_version;
        self
    }

    pub fn validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }

    /// Adds the platform surface extensions, usually obtained from the display.
    pub fn surface_extensions(mut self, extensions: &[&'static CStr]) -> Self {
        self.surface_extensions.extend_from_slice(extensions);
        self
    }

    /// Loads the Vulkan library and creates the instance.
    pub fn create(self) -> RhiResult<Instance> {
        Instance::new(self)
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self::new("Venus")
    }
}

/// Vulkan instance wrapper with optional validation layer support.
///
/// The instance outlives every device child. Dropping it destroys the debug
/// messenger first, then the instance itself.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    api_version: u32,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The Vulkan library cannot be loaded
    /// - A required surface extension is not available
    /// - Instance creation fails
    /// - Debug messenger setup fails (when validation is enabled)
    pub fn new(config: InstanceConfig) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let loader_version = unsafe { entry.try_enumerate_instance_version()? }
            .unwrap_or(vk::API_VERSION_1_0);
        let api_version = negotiate_api_version(config.api_version, loader_version)?;
        if api_version != config.api_version {
            warn!(
                "Vulkan loader supports API {}.{}, falling back from {}.{}",
                vk::api_version_major(loader_version),
                vk::api_version_minor(loader_version),
                vk::api_version_major(config.api_version),
                vk::api_version_minor(config.api_version),
            );
        }

        let available = unsafe { entry.enumerate_instance_extension_properties(None)? };
        for required in &config.surface_extensions {
            let present = available.iter().any(|ext| {
                ext.extension_name_as_c_str()
                    .is_ok_and(|name| name == *required)
            });
            if !present {
                return Err(RhiError::MissingExtension(
                    required.to_string_lossy().into_owned(),
                ));
            }
        }

        let validation_available =
            config.validation && Self::is_validation_layer_available(&entry)?;
        if config.validation && !validation_available {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|_| RhiError::InvalidInput("application name contains NUL".into()))?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Venus")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(api_version);

        let mut extensions: Vec<*const c_char> = config
            .surface_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();
        if validation_available {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!(
            "Vulkan instance created (API {}.{}, {} extension(s))",
            vk::api_version_major(api_version),
            vk::api_version_minor(api_version),
            extensions.len()
        );

        let (debug_utils, debug_messenger) = if validation_available {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => {
                    info!("Validation layers enabled");
                    (Some(debug_utils), Some(messenger))
                }
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            api_version,
            debug_utils,
            debug_messenger,
        })
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    #[inline]
    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// Returns whether validation layers are enabled.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// Enumerates the physical devices visible to this instance.
    pub fn enumerate_physical_devices(&self) -> RhiResult<Vec<vk::PhysicalDevice>> {
        Ok(unsafe { self.instance.enumerate_physical_devices()? })
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
        Ok(available_layers.iter().any(|layer| {
            layer
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
        }))
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        Ok(unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Forwards validation layer messages to `tracing`.
///
/// # Safety
///
/// Called by the Vulkan loader with a valid (or null) callback data pointer.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "general",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!(target: "vulkan", kind, "{message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!(target: "vulkan", kind, "{message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!(target: "vulkan", kind, "{message}"),
        _ => debug!(target: "vulkan", kind, "{message}"),
    }

    vk::FALSE
}

/// Picks the instance API version: the requested one, lowered to what the
/// loader supports, but never below [`MIN_API_VERSION`].
fn negotiate_api_version(requested: u32, loader: u32) -> RhiResult<u32> {
    let version = requested.min(loader);
    if version < MIN_API_VERSION {
        return Err(RhiError::VulkanError(vk::Result::ERROR_INCOMPATIBLE_DRIVER));
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = InstanceConfig::default();
        assert_eq!(config.application_name, "Venus");
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
        assert_eq!(vk::api_version_minor(config.api_version), 4);
        assert!(!config.validation);
        assert!(config.surface_extensions.is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = InstanceConfig::new("test")
            .validation(true)
            .api_version(vk::API_VERSION_1_2)
            .surface_extensions(&[ash::khr::surface::NAME]);
        assert!(config.validation);
        assert_eq!(config.api_version, vk::API_VERSION_1_2);
        assert_eq!(config.surface_extensions, vec![ash::khr::surface::NAME]);
    }

    #[test]
    fn test_api_version_falls_back_to_loader() {
        let v1_4 = vk::make_api_version(0, 1, 4, 0);
        assert_eq!(negotiate_api_version(v1_4, v1_4).unwrap(), v1_4);
        assert_eq!(
            negotiate_api_version(v1_4, vk::make_api_version(0, 1, 3, 280)).unwrap(),
            vk::make_api_version(0, 1, 3, 280)
        );
        assert_eq!(
            negotiate_api_version(vk::API_VERSION_1_3, v1_4).unwrap(),
            vk::API_VERSION_1_3
        );
    }

    #[test]
    fn test_api_version_below_minimum_is_incompatible() {
        let err = negotiate_api_version(DEFAULT_API_VERSION, vk::API_VERSION_1_2).unwrap_err();
        assert!(matches!(
            err,
            RhiError::VulkanError(vk::Result::ERROR_INCOMPATIBLE_DRIVER)
        ));
        assert!(negotiate_api_version(vk::API_VERSION_1_1, DEFAULT_API_VERSION).is_err());
    }

    #[test]
    fn test_headless_instance_creation() {
        match InstanceConfig::new("test").create() {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(RhiError::LoadingError(_))
            | Err(RhiError::VulkanError(vk::Result::ERROR_INCOMPATIBLE_DRIVER)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    #[test]
    fn test_missing_surface_extension_is_rejected() {
        let bogus: &'static CStr = c"VK_VENUS_not_a_real_extension";
        match InstanceConfig::new("test").surface_extensions(&[bogus]).create() {
            Err(RhiError::MissingExtension(name)) => {
                assert_eq!(name, "VK_VENUS_not_a_real_extension");
            }
            Err(RhiError::LoadingError(_)) => eprintln!("Skipping test: Vulkan not available"),
            Err(e) => panic!("Unexpected error: {:?}", e),
            Ok(_) => panic!("bogus extension must not be accepted"),
        }
    }
}
