//! Memory allocator behavior on a real device.

use std::sync::Arc;

use venus_core::ErrorCode;
use venus_rhi::device::Device;
use venus_rhi::instance::{Instance, InstanceConfig};
use venus_rhi::memory::{MemoryAllocator, MemoryPolicy};
use venus_rhi::physical_device::select_physical_device;
use venus_rhi::{vk, RhiError};

struct Headless {
    // Drop order: allocator, device, instance.
    allocator: Arc<MemoryAllocator>,
    _device: Arc<Device>,
    _instance: Instance,
}

fn headless() -> Option<Headless> {
    let instance = match InstanceConfig::new("venus-rhi-tests").validation(false).create() {
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
    Some(Headless {
        allocator,
        _device: device,
        _instance: instance,
    })
}

#[test]
fn test_allocate_host_coherent_buffer() {
    let Some(ctx) = headless() else {
        return;
    };

    let buffer = ctx
        .allocator
        .allocate_buffer(
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            256,
            MemoryPolicy::HostCoherent,
        )
        .unwrap();
    assert_eq!(buffer.size(), 256);
    assert_eq!(buffer.policy(), MemoryPolicy::HostCoherent);

    let mut map = buffer.map().unwrap();
    map.write(16, &[1u32, 2, 3, 4]).unwrap();
    let bytes = map.read(16, 16).unwrap();
    assert_eq!(le_words(&bytes), vec![1, 2, 3, 4]);
}

#[test]
fn test_second_map_is_rejected_until_guard_drops() {
    let Some(ctx) = headless() else {
        return;
    };

    let buffer = ctx
        .allocator
        .allocate_buffer(
            vk::BufferUsageFlags::STORAGE_BUFFER,
            64,
            MemoryPolicy::HostCoherent,
        )
        .unwrap();

    let first = buffer.map().unwrap();
    match buffer.map() {
        Err(e) => {
            assert!(matches!(e, RhiError::AlreadyMapped(_)));
            assert_eq!(e.code(), ErrorCode::CHECK_ERROR);
        }
        Ok(_) => panic!("buffer mapped twice"),
    }

    drop(first);
    let again = buffer.map().unwrap();
    assert_eq!(again.len(), 64);
}

#[test]
fn test_device_local_memory_cannot_be_mapped() {
    let Some(ctx) = headless() else {
        return;
    };

    let buffer = ctx
        .allocator
        .allocate_buffer(
            vk::BufferUsageFlags::STORAGE_BUFFER,
            64,
            MemoryPolicy::DeviceLocal,
        )
        .unwrap();
    // Integrated GPUs may expose device-local memory as host visible.
    if let Err(e) = buffer.map() {
        assert_eq!(e.code(), ErrorCode::CHECK_ERROR);
    }
}

#[test]
fn test_allocate_device_local_image() {
    let Some(ctx) = headless() else {
        return;
    };

    let extent = vk::Extent2D {
        width: 64,
        height: 32,
    };
    let image = ctx
        .allocator
        .allocate_image(
            extent,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            MemoryPolicy::DeviceLocal,
        )
        .unwrap();
    assert_eq!(image.extent(), extent);
    assert_eq!(image.format(), vk::Format::R8G8B8A8_UNORM);
    assert_eq!(image.mip_levels(), 1);
    assert_ne!(image.handle(), vk::Image::null());
    assert_ne!(image.view(), vk::ImageView::null());
}

fn le_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
