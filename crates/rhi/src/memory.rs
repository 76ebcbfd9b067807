//! Device memory allocation.
//!
//! [`MemoryAllocator`] sub-allocates device memory for buffers and images
//! through gpu-allocator. Callers choose a [`MemoryPolicy`] per resource;
//! host-visible memory is accessed through a [`ScopedMap`] guard obtained
//! from [`DeviceMemory::map`].
//!
//! # Mapping
//!
//! Each allocation admits one live `ScopedMap` at a time. A second `map`
//! while the first guard is alive fails with [`RhiError::AlreadyMapped`].
//! Non-coherent memory must be flushed after CPU writes and invalidated
//! before CPU reads; for coherent memory both are no-ops.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use tracing::{debug, error, info};

use crate::buffer::{Buffer, BufferConfig};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, ImageConfig};
use crate::instance::Instance;

/// Where a resource's memory lives and how the CPU may touch it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MemoryPolicy {
    /// GPU-only memory; reachable from the CPU only through staging transfers.
    #[default]
    DeviceLocal,
    /// CPU-writable memory that needs no explicit flush.
    HostCoherent,
    /// CPU-cached memory; requires `flush`/`invalidate` around CPU access.
    HostNonCoherent,
}

impl MemoryPolicy {
    /// The gpu-allocator location implementing this policy.
    pub fn location(self) -> MemoryLocation {
        match self {
            MemoryPolicy::DeviceLocal => MemoryLocation::GpuOnly,
            MemoryPolicy::HostCoherent => MemoryLocation::CpuToGpu,
            MemoryPolicy::HostNonCoherent => MemoryLocation::GpuToCpu,
        }
    }

    #[inline]
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryPolicy::DeviceLocal)
    }
}

/// Sub-allocator for device memory, shared by every buffer and image.
///
/// Resources keep an `Arc<MemoryAllocator>` and return their allocation on
/// drop, so the allocator (and the device it holds) outlives them.
pub struct MemoryAllocator {
    allocator: Mutex<Allocator>,
    device: Arc<Device>,
}

impl MemoryAllocator {
    /// Creates an allocator for `device` with buffer device address support.
    pub fn new(instance: &Instance, device: Arc<Device>) -> RhiResult<Arc<Self>> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.handle().clone(),
            physical_device: device.physical_device(),
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            allocator: Mutex::new(allocator),
            device,
        }))
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn lock(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a buffer of `size` bytes.
    ///
    /// On failure nothing is leaked: the partially created buffer and its
    /// allocation are released before the error is returned.
    pub fn allocate_buffer(
        self: &Arc<Self>,
        usage: vk::BufferUsageFlags,
        size: vk::DeviceSize,
        policy: MemoryPolicy,
    ) -> RhiResult<Buffer> {
        BufferConfig::new(size, usage).policy(policy).create(self)
    }

    /// Creates a 2D image with one view covering all mip levels.
    pub fn allocate_image(
        self: &Arc<Self>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        policy: MemoryPolicy,
    ) -> RhiResult<Image> {
        ImageConfig::new(extent, format)
            .usage(usage)
            .policy(policy)
            .create(self)
    }

    /// Allocates memory satisfying `requirements`.
    pub(crate) fn allocate(
        self: &Arc<Self>,
        name: &str,
        requirements: vk::MemoryRequirements,
        policy: MemoryPolicy,
        linear: bool,
    ) -> RhiResult<DeviceMemory> {
        let allocation = self
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: policy.location(),
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| RhiError::BadAllocation(format!("'{name}': {e}")))?;

        debug!(
            "Allocated {} bytes for '{}' ({:?})",
            allocation.size(),
            name,
            policy
        );

        Ok(DeviceMemory {
            allocator: Arc::clone(self),
            allocation: Some(allocation),
            policy,
            name: name.to_owned(),
            mapped: AtomicBool::new(false),
        })
    }

    fn free(&self, allocation: Allocation) {
        if let Err(e) = self.lock().free(allocation) {
            error!("Failed to free allocation: {:?}", e);
        }
    }
}

/// One sub-allocation, returned to the allocator on drop.
pub struct DeviceMemory {
    allocator: Arc<MemoryAllocator>,
    allocation: Option<Allocation>,
    policy: MemoryPolicy,
    name: String,
    mapped: AtomicBool,
}

impl DeviceMemory {
    #[inline]
    pub fn policy(&self) -> MemoryPolicy {
        self.policy
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn allocator(&self) -> &Arc<MemoryAllocator> {
        &self.allocator
    }

    /// Size of the sub-allocation in bytes.
    pub fn size(&self) -> vk::DeviceSize {
        self.allocation.as_ref().map_or(0, Allocation::size)
    }

    /// Backing `VkDeviceMemory` and the offset into it.
    pub fn binding(&self) -> (vk::DeviceMemory, vk::DeviceSize) {
        self.allocation.as_ref().map_or(
            (vk::DeviceMemory::null(), 0),
            // Safety: the memory is only used for binding, never freed here.
            |allocation| (unsafe { allocation.memory() }, allocation.offset()),
        )
    }

    fn is_coherent(&self) -> bool {
        self.allocation.as_ref().is_some_and(|allocation| {
            allocation
                .memory_properties()
                .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        })
    }

    /// Maps the allocation for CPU access.
    ///
    /// # Errors
    ///
    /// - [`RhiError::AlreadyMapped`] if another `ScopedMap` is alive
    /// - [`RhiError::InvalidInput`] if the memory is not host visible
    pub fn map(&self) -> RhiResult<ScopedMap<'_>> {
        let ptr = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| {
                RhiError::InvalidInput(format!("'{}' is not host visible", self.name))
            })?;

        if self
            .mapped
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(RhiError::AlreadyMapped(self.name.clone()));
        }

        Ok(ScopedMap {
            memory: self,
            ptr: ptr.cast::<u8>(),
            len: self.size() as usize,
        })
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.allocator.free(allocation);
            debug!("Freed allocation '{}'", self.name);
        }
    }
}

/// CPU view of a mapped allocation. Releases the mapping on drop.
pub struct ScopedMap<'a> {
    memory: &'a DeviceMemory,
    ptr: NonNull<u8>,
    len: usize,
}

impl ScopedMap<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // Safety: the mapping is exclusive while this guard lives.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: the mapping is exclusive while this guard lives.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Copies `data` into the mapping at byte `offset`.
    pub fn write<T: Pod>(&mut self, offset: usize, data: &[T]) -> RhiResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let end = checked_end(offset, bytes.len(), self.len)?;
        self.as_mut_slice()[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copies `len` bytes starting at `offset` out of the mapping.
    pub fn read(&self, offset: usize, len: usize) -> RhiResult<Vec<u8>> {
        let end = checked_end(offset, len, self.len)?;
        Ok(self.as_slice()[offset..end].to_vec())
    }

    /// Makes CPU writes in `[offset, offset + size)` visible to the device.
    pub fn flush(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> RhiResult<()> {
        if self.memory.is_coherent() {
            return Ok(());
        }
        let range = self.mapped_range(offset, size);
        unsafe {
            self.memory
                .allocator
                .device()
                .handle()
                .flush_mapped_memory_ranges(&[range])?;
        }
        Ok(())
    }

    /// Makes device writes in `[offset, offset + size)` visible to the CPU.
    pub fn invalidate(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> RhiResult<()> {
        if self.memory.is_coherent() {
            return Ok(());
        }
        let range = self.mapped_range(offset, size);
        unsafe {
            self.memory
                .allocator
                .device()
                .handle()
                .invalidate_mapped_memory_ranges(&[range])?;
        }
        Ok(())
    }

    fn mapped_range(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> vk::MappedMemoryRange<'static> {
        let (memory, base) = self.memory.binding();
        let atom = self
            .memory
            .allocator
            .device()
            .info()
            .non_coherent_atom_size();
        let (offset, size) = atom_aligned_range(base, self.len as u64, offset, size, atom);
        vk::MappedMemoryRange::default()
            .memory(memory)
            .offset(offset)
            .size(size)
    }
}

impl Drop for ScopedMap<'_> {
    fn drop(&mut self) {
        self.memory.mapped.store(false, Ordering::Release);
    }
}

fn checked_end(offset: usize, len: usize, capacity: usize) -> RhiResult<usize> {
    offset
        .checked_add(len)
        .filter(|&end| end <= capacity)
        .ok_or_else(|| {
            RhiError::InvalidInput(format!(
                "range {offset}+{len} exceeds mapped size {capacity}"
            ))
        })
}

/// Expands `[offset, offset + size)` inside an allocation starting at `base`
/// to `atom` boundaries, clamped to the allocation.
///
/// `size == vk::WHOLE_SIZE` covers the rest of the allocation. Returns the
/// absolute offset into the `VkDeviceMemory` and the range size.
pub fn atom_aligned_range(
    base: u64,
    allocation_size: u64,
    offset: u64,
    size: u64,
    atom: u64,
) -> (u64, u64) {
    let atom = atom.max(1);
    let start = base + offset.min(allocation_size);
    let end = if size == vk::WHOLE_SIZE {
        base + allocation_size
    } else {
        base + offset.saturating_add(size).min(allocation_size)
    };
    let aligned_start = start / atom * atom;
    let aligned_end = end.div_ceil(atom) * atom;
    (aligned_start, aligned_end - aligned_start)
}
