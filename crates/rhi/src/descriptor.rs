//! Descriptor set layouts and pools.
//!
//! - [`DescriptorLayoutBuilder`] collects bindings and creates a [`DescriptorSetLayout`]
//! - [`DescriptorPool`] is a fixed-capacity pool; growth across pools lives in
//!   [`crate::descriptor_allocator`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use venus_rhi::vk;
//! use venus_rhi::device::Device;
//! use venus_rhi::descriptor::{DescriptorLayoutBuilder, DescriptorPool};
//!
//! # fn example(device: Arc<Device>) -> venus_rhi::RhiResult<()> {
//! let layout = DescriptorLayoutBuilder::new()
//!     .uniform_buffer(0)
//!     .build(device.clone(), vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)?;
//!
//! let pool_size = vk::DescriptorPoolSize::default()
//!     .ty(vk::DescriptorType::UNIFORM_BUFFER)
//!     .descriptor_count(10);
//! let pool = DescriptorPool::new(device, 10, &[pool_size])?;
//!
//! let set = pool.allocate(layout.handle())?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Descriptor set layout wrapper.
///
/// The layout is immutable after creation and can be shared between threads
/// when wrapped in `Arc`.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<(u32, vk::DescriptorType)>,
}

impl DescriptorSetLayout {
    /// Creates a new descriptor set layout from raw bindings.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self {
            device,
            layout,
            bindings: bindings
                .iter()
                .map(|b| (b.binding, b.descriptor_type))
                .collect(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// `(binding, type)` pairs this layout was created with.
    #[inline]
    pub fn bindings(&self) -> &[(u32, vk::DescriptorType)] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Accumulates single-descriptor bindings; the stage mask is applied at build time.
#[derive(Clone, Debug, Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding of `count` descriptors of type `ty`.
    pub fn binding(mut self, binding: u32, ty: vk::DescriptorType, count: u32) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(count),
        );
        self
    }

    pub fn uniform_buffer(self, binding: u32) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1)
    }

    pub fn storage_buffer(self, binding: u32) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1)
    }

    pub fn combined_image_sampler(self, binding: u32) -> Self {
        self.binding(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1)
    }

    pub fn storage_image(self, binding: u32) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_IMAGE, 1)
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// The bindings with `stages` applied.
    pub fn bindings(
        &self,
        stages: vk::ShaderStageFlags,
    ) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings
            .iter()
            .map(|b| b.stage_flags(b.stage_flags | stages))
            .collect()
    }

    pub fn build(
        &self,
        device: Arc<Device>,
        stages: vk::ShaderStageFlags,
    ) -> RhiResult<DescriptorSetLayout> {
        DescriptorSetLayout::new(device, &self.bindings(stages))
    }
}

/// Fixed-capacity descriptor pool.
///
/// Sets are never freed individually; the whole pool is reset at once.
/// Pool operations are not thread-safe.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a new descriptor pool.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Allocates one descriptor set with `layout`.
    ///
    /// # Errors
    ///
    /// Pool exhaustion surfaces as `ERROR_OUT_OF_POOL_MEMORY` or
    /// `ERROR_FRAGMENTED_POOL` (see [`crate::RhiError::is_pool_exhausted`]).
    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        Ok(sets[0])
    }

    /// Returns every set allocated from this pool.
    ///
    /// The caller must ensure no set from this pool is still referenced by
    /// pending GPU work.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool (max_sets={})", self.max_sets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_builder_applies_stages() {
        let builder = DescriptorLayoutBuilder::new()
            .uniform_buffer(0)
            .combined_image_sampler(1);
        let bindings = builder.bindings(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        for binding in &bindings {
            assert_eq!(binding.descriptor_count, 1);
            assert!(binding.stage_flags.contains(vk::ShaderStageFlags::VERTEX));
            assert!(binding.stage_flags.contains(vk::ShaderStageFlags::FRAGMENT));
        }
    }

    #[test]
    fn test_layout_builder_array_binding() {
        let bindings = DescriptorLayoutBuilder::new()
            .binding(3, vk::DescriptorType::STORAGE_IMAGE, 4)
            .bindings(vk::ShaderStageFlags::COMPUTE);
        assert_eq!(bindings[0].binding, 3);
        assert_eq!(bindings[0].descriptor_count, 4);
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_layout_builder_clear() {
        let mut builder = DescriptorLayoutBuilder::new().storage_buffer(0).storage_image(1);
        builder.clear();
        assert!(builder.bindings(vk::ShaderStageFlags::ALL).is_empty());
    }
}
