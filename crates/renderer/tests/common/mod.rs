//! Headless Vulkan context shared by the GPU tests.

use std::sync::Arc;

use venus_renderer::ImmediateSubmit;
use venus_rhi::device::Device;
use venus_rhi::instance::{Instance, InstanceConfig};
use venus_rhi::memory::MemoryAllocator;
use venus_rhi::physical_device::select_physical_device;

pub struct Headless {
    // Drop order: submit context, allocator, device, instance.
    pub immediate: ImmediateSubmit,
    pub allocator: Arc<MemoryAllocator>,
    pub device: Arc<Device>,
    pub instance: Instance,
}

/// Builds a headless context, or `None` when no loader or GPU is present.
pub fn headless() -> Option<Headless> {
    let instance = match InstanceConfig::new("venus-tests").validation(false).create() {
        Ok(instance) => instance,
        Err(e) => {
            println!("Skipping test: no Vulkan instance ({})", e);
            return None;
        }
    };
    let physical = match select_physical_device(instance.handle(), None) {
        Ok(physical) => physical,
        Err(e) => {
            println!("Skipping test: no suitable GPU ({})", e);
            return None;
        }
    };
    let device = Device::new_headless(&instance, &physical).expect("Failed to create device");
    let allocator =
        MemoryAllocator::new(&instance, device.clone()).expect("Failed to create allocator");
    let immediate = ImmediateSubmit::new(device.clone()).expect("Failed to create submit context");

    Some(Headless {
        immediate,
        allocator,
        device,
        instance,
    })
}
