//! GPU buffer management.
//!
//! Buffers are created through [`BufferConfig`] (or the [`BufferUsage`]
//! presets) and own their memory. Host-visible buffers are written through
//! [`Buffer::map`]; device-local buffers are filled by staging uploads.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use venus_rhi::buffer::{Buffer, BufferUsage};
//! use venus_rhi::memory::MemoryAllocator;
//!
//! # fn example(allocator: &Arc<MemoryAllocator>) -> venus_rhi::RhiResult<()> {
//! let uniforms = Buffer::new(allocator, BufferUsage::Uniform, 256)?;
//! uniforms.write_data(0, &[1.0f32, 0.0, 0.0, 1.0])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::memory::{DeviceMemory, MemoryAllocator, MemoryPolicy, ScopedMap};

/// Common buffer roles with their usage flags and memory policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex data read by shaders through its device address.
    Vertex,
    /// Index data.
    Index,
    /// Uniform data rewritten by the CPU every frame.
    Uniform,
    /// Device-local storage data.
    Storage,
    /// Upload source for staging transfers.
    Staging,
    /// Download target for reading device data back.
    Readback,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Memory policy used for this role.
    pub fn memory_policy(self) -> MemoryPolicy {
        match self {
            BufferUsage::Vertex | BufferUsage::Index | BufferUsage::Storage => {
                MemoryPolicy::DeviceLocal
            }
            BufferUsage::Uniform | BufferUsage::Staging => MemoryPolicy::HostCoherent,
            BufferUsage::Readback => MemoryPolicy::HostNonCoherent,
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
            BufferUsage::Readback => "readback",
        }
    }
}

/// Every option a [`Buffer`] supports.
#[derive(Clone, Debug)]
pub struct BufferConfig {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub policy: MemoryPolicy,
    pub name: String,
}

impl BufferConfig {
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self {
            size,
            usage,
            policy: MemoryPolicy::DeviceLocal,
            name: "buffer".to_owned(),
        }
    }

    /// Starts from a preset role.
    pub fn preset(usage: BufferUsage, size: vk::DeviceSize) -> Self {
        Self::new(size, usage.to_vk_usage())
            .policy(usage.memory_policy())
            .name(usage.name())
    }

    pub fn policy(mut self, policy: MemoryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn create(&self, allocator: &Arc<MemoryAllocator>) -> RhiResult<Buffer> {
        Buffer::from_config(allocator, self)
    }
}

/// GPU buffer with owned memory.
pub struct Buffer {
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    address: Option<vk::DeviceAddress>,
    // Dropped after `buffer` is destroyed in `Drop`.
    memory: DeviceMemory,
}

impl Buffer {
    /// Creates a buffer for a preset role.
    pub fn new(
        allocator: &Arc<MemoryAllocator>,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        BufferConfig::preset(usage, size).create(allocator)
    }

    /// Creates a host-visible buffer and fills it with `data`.
    pub fn new_with_data<T: Pod>(
        allocator: &Arc<MemoryAllocator>,
        usage: BufferUsage,
        data: &[T],
    ) -> RhiResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = Self::new(allocator, usage, bytes.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    fn from_config(allocator: &Arc<MemoryAllocator>, config: &BufferConfig) -> RhiResult<Self> {
        if config.size == 0 {
            return Err(RhiError::InvalidInput(format!(
                "buffer '{}' must not be empty",
                config.name
            )));
        }

        let device = allocator.device();
        let buffer_info = vk::BufferCreateInfo::default()
            .size(config.size)
            .usage(config.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let memory = match allocator.allocate(&config.name, requirements, config.policy, true) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let (device_memory, offset) = memory.binding();
        if let Err(e) = unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, device_memory, offset)
        } {
            unsafe { device.handle().destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        let address = config
            .usage
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
            .then(|| unsafe {
                device
                    .handle()
                    .get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
            });

        debug!(
            "Created buffer '{}': {} bytes ({:?})",
            config.name, config.size, config.policy
        );

        Ok(Self {
            buffer,
            size: config.size,
            usage: config.usage,
            address,
            memory,
        })
    }

    /// Maps the buffer memory. See [`DeviceMemory::map`].
    pub fn map(&self) -> RhiResult<ScopedMap<'_>> {
        self.memory.map()
    }

    /// Writes `data` at byte `offset` and flushes the written range.
    pub fn write_data<T: Pod>(&self, offset: vk::DeviceSize, data: &[T]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let len = std::mem::size_of_val(data) as vk::DeviceSize;
        if offset.checked_add(len).is_none_or(|end| end > self.size) {
            return Err(RhiError::InvalidInput(format!(
                "write of {len} bytes at {offset} exceeds buffer size {}",
                self.size
            )));
        }
        let mut mapping = self.map()?;
        mapping.write(offset as usize, data)?;
        mapping.flush(offset, len)
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    #[inline]
    pub fn policy(&self) -> MemoryPolicy {
        self.memory.policy()
    }

    /// GPU address, present when created with `SHADER_DEVICE_ADDRESS`.
    #[inline]
    pub fn device_address(&self) -> Option<vk::DeviceAddress> {
        self.address
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.memory
                .allocator()
                .device()
                .handle()
                .destroy_buffer(self.buffer, None);
        }
        debug!("Destroyed buffer '{}'", self.memory.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert!(
            BufferUsage::Staging
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_SRC)
        );
        assert!(
            BufferUsage::Readback
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_DST)
        );
    }

    #[test]
    fn test_buffer_usage_memory_policy() {
        assert_eq!(BufferUsage::Vertex.memory_policy(), MemoryPolicy::DeviceLocal);
        assert_eq!(BufferUsage::Index.memory_policy(), MemoryPolicy::DeviceLocal);
        assert_eq!(BufferUsage::Uniform.memory_policy(), MemoryPolicy::HostCoherent);
        assert_eq!(BufferUsage::Staging.memory_policy(), MemoryPolicy::HostCoherent);
        assert_eq!(BufferUsage::Readback.memory_policy(), MemoryPolicy::HostNonCoherent);
    }

    #[test]
    fn test_preset_config() {
        let config = BufferConfig::preset(BufferUsage::Staging, 64);
        assert_eq!(config.size, 64);
        assert_eq!(config.name, "staging");
        assert_eq!(config.policy, MemoryPolicy::HostCoherent);
        assert_eq!(config.usage, vk::BufferUsageFlags::TRANSFER_SRC);
    }

    #[test]
    fn test_config_defaults_to_device_local() {
        let config = BufferConfig::new(16, vk::BufferUsageFlags::STORAGE_BUFFER);
        assert_eq!(config.policy, MemoryPolicy::DeviceLocal);
    }
}
