//! Vulkan logical device and queue management.
//!
//! The [`Device`] owns the `VkDevice`, the graphics queue and the present
//! queue. Every other wrapper in this crate holds an `Arc<Device>` so the
//! device is destroyed only after all of its children.
//!
//! # Example
//!
//! ```no_run
//! use venus_rhi::device::Device;
//! use venus_rhi::instance::InstanceConfig;
//! use venus_rhi::physical_device::select_physical_device;
//!
//! let instance = InstanceConfig::new("demo").create().expect("Failed to create instance");
//! let info = select_physical_device(instance.handle(), None).expect("No suitable GPU found");
//! let device = Device::new_headless(&instance, &info).expect("Failed to create device");
//! device.wait_idle().expect("wait idle");
//! ```

use std::ffi::{CStr, c_char};
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Extensions enabled when the device presents to a surface.
const PRESENT_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device wrapper.
pub struct Device {
    device: ash::Device,
    info: PhysicalDeviceInfo,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    swapchain_enabled: bool,
}

impl Device {
    /// Creates a device able to present (the swapchain extension is enabled).
    pub fn new(instance: &Instance, info: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        Self::create(instance, info, PRESENT_EXTENSIONS)
    }

    /// Creates a device without presentation support, for offscreen work and tests.
    pub fn new_headless(instance: &Instance, info: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        Self::create(instance, info, &[])
    }

    fn create(
        instance: &Instance,
        info: &PhysicalDeviceInfo,
        extensions: &[&CStr],
    ) -> RhiResult<Arc<Self>> {
        let queue_families = info.queue_families;
        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default()
            .buffer_device_address(true)
            .descriptor_indexing(true)
            .descriptor_binding_partially_bound(true)
            .runtime_descriptor_array(true);

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(info.features.sampler_anisotropy == vk::TRUE);

        let extension_names: Vec<*const c_char> =
            extensions.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(info.device, &create_info, None)?
        };

        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_family, queue_families.present_family)
        else {
            unsafe { device.destroy_device(None) };
            return Err(RhiError::NoSuitableGpu);
        };

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        info!(
            "Logical device created on '{}' (graphics family {}, present family {}, {} extension(s))",
            info.device_name(),
            graphics_family,
            present_family,
            extensions.len()
        );

        Ok(Arc::new(Self {
            device,
            info: info.clone(),
            graphics_queue,
            present_queue,
            swapchain_enabled: !extensions.is_empty(),
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.info.device
    }

    /// Properties and limits of the physical device.
    #[inline]
    pub fn info(&self) -> &PhysicalDeviceInfo {
        &self.info
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.info.queue_families
    }

    /// Graphics queue family index.
    #[inline]
    pub fn graphics_family(&self) -> u32 {
        self.info.queue_families.graphics_family.unwrap_or_default()
    }

    /// Whether the swapchain extension was enabled at creation.
    #[inline]
    pub fn supports_present(&self) -> bool {
        self.swapchain_enabled
    }

    /// Blocks until all queues are idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Blocks until the graphics queue is idle.
    pub fn graphics_queue_wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.queue_wait_idle(self.graphics_queue)? };
        Ok(())
    }

    /// Submits work to the graphics queue with synchronization2 submit infos.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - All command buffers are valid and fully recorded
    /// - Semaphores are in the correct state for the requested waits and signals
    /// - The fence (if not null) is unsignaled and not in use
    pub unsafe fn submit_graphics(
        &self,
        submits: &[vk::SubmitInfo2<'_>],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit2(self.graphics_queue, submits, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device is Send + Sync; queues and the physical device are
// plain handles. Queue access is externally synchronized by the single
// frame-loop thread.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_extensions_defined() {
        assert_eq!(PRESENT_EXTENSIONS, &[ash::khr::swapchain::NAME]);
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
