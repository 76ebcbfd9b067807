//! Growable descriptor set allocation.
//!
//! A [`DescriptorAllocator`] owns a chain of [`DescriptorPool`]s built from a
//! common size-ratio vector. Pools that run dry move from the *ready* list to
//! the *full* list and a larger replacement is created on demand; `reset`
//! returns every pool to *ready* at once. The growth arithmetic is kept in
//! free functions so it can be checked without a device.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::descriptor::DescriptorPool;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Hard cap on the number of sets a single pool is sized for.
pub const MAX_SETS_PER_POOL: u32 = 4092;

/// Multiplier applied to the pool size each time a pool is created.
pub const GROWTH_FACTOR: f32 = 1.5;

/// Descriptors of type `ty` reserved per set, as a fraction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolSizeRatio {
    pub ty: vk::DescriptorType,
    pub ratio: f32,
}

impl PoolSizeRatio {
    pub const fn new(ty: vk::DescriptorType, ratio: f32) -> Self {
        Self { ty, ratio }
    }
}

/// Pool sizes for `set_count` sets: `round(ratio * set_count)` per type.
///
/// Types that round to zero are omitted since Vulkan rejects empty pool sizes.
pub fn pool_sizes(ratios: &[PoolSizeRatio], set_count: u32) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|r| {
            vk::DescriptorPoolSize::default()
                .ty(r.ty)
                .descriptor_count((r.ratio * set_count as f32).round() as u32)
        })
        .filter(|size| size.descriptor_count > 0)
        .collect()
}

/// `maxSets` of a pool: the sum of its pool sizes.
pub fn max_sets(sizes: &[vk::DescriptorPoolSize]) -> u32 {
    sizes.iter().map(|s| s.descriptor_count).sum::<u32>().max(1)
}

/// Sets-per-pool used for the first pool created after the initial one.
pub fn initial_sets_per_pool(initial_set_count: u32) -> u32 {
    ((initial_set_count as f32 * GROWTH_FACTOR).ceil() as u32).clamp(1, MAX_SETS_PER_POOL)
}

/// `min(floor(current * 1.5), 4092)`.
pub fn next_sets_per_pool(current: u32) -> u32 {
    ((current as f32 * GROWTH_FACTOR).floor() as u32).min(MAX_SETS_PER_POOL)
}

/// Growable chain of descriptor pools.
///
/// Not thread-safe; one allocator per frame slot (or per thread) is the
/// expected usage.
pub struct DescriptorAllocator {
    device: Arc<Device>,
    ratios: Vec<PoolSizeRatio>,
    sets_per_pool: u32,
    ready: Vec<DescriptorPool>,
    full: Vec<DescriptorPool>,
    pools_created: usize,
}

impl DescriptorAllocator {
    /// Creates the allocator and its first pool, sized for `initial_set_count` sets.
    pub fn new(
        device: Arc<Device>,
        initial_set_count: u32,
        ratios: &[PoolSizeRatio],
    ) -> RhiResult<Self> {
        if ratios.is_empty() {
            return Err(RhiError::InvalidInput(
                "descriptor allocator needs at least one pool size ratio".to_string(),
            ));
        }

        let mut allocator = Self {
            device,
            ratios: ratios.to_vec(),
            sets_per_pool: initial_sets_per_pool(initial_set_count),
            ready: Vec::new(),
            full: Vec::new(),
            pools_created: 0,
        };
        let first = allocator.create_pool(initial_set_count.max(1))?;
        allocator.ready.push(first);
        Ok(allocator)
    }

    fn create_pool(&mut self, set_count: u32) -> RhiResult<DescriptorPool> {
        let sizes = pool_sizes(&self.ratios, set_count);
        let pool = DescriptorPool::new(self.device.clone(), max_sets(&sizes), &sizes)?;
        self.pools_created += 1;
        debug!(
            "Descriptor allocator created pool #{} for {} sets",
            self.pools_created, set_count
        );
        Ok(pool)
    }

    /// Pops a ready pool, creating a new (larger) one when none is left.
    fn take_pool(&mut self) -> RhiResult<DescriptorPool> {
        if let Some(pool) = self.ready.pop() {
            return Ok(pool);
        }
        let set_count = self.sets_per_pool;
        let pool = self.create_pool(set_count)?;
        self.sets_per_pool = next_sets_per_pool(set_count);
        Ok(pool)
    }

    /// Allocates one set with `layout`.
    ///
    /// An exhausted pool is retired to the full list and the allocation is
    /// retried once on another pool.
    ///
    /// # Errors
    ///
    /// Every failure is reported as a bad allocation.
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        let pool = self.take_pool()?;
        match pool.allocate(layout) {
            Ok(set) => {
                self.ready.push(pool);
                Ok(set)
            }
            Err(e) if e.is_pool_exhausted() => {
                self.full.push(pool);
                let retry_pool = self.take_pool()?;
                match retry_pool.allocate(layout) {
                    Ok(set) => {
                        self.ready.push(retry_pool);
                        Ok(set)
                    }
                    Err(e) => {
                        warn!("Descriptor allocation failed on a fresh pool: {}", e);
                        if e.is_pool_exhausted() {
                            self.full.push(retry_pool);
                        } else {
                            self.ready.push(retry_pool);
                        }
                        Err(bad_allocation(e))
                    }
                }
            }
            Err(e) => {
                self.ready.push(pool);
                Err(bad_allocation(e))
            }
        }
    }

    /// Host-resets every pool and moves all of them back to the ready list.
    ///
    /// Invalidates every set previously returned by [`Self::allocate`].
    pub fn reset(&mut self) -> RhiResult<()> {
        for pool in self.ready.iter().chain(self.full.iter()) {
            pool.reset()?;
        }
        self.ready.append(&mut self.full);
        Ok(())
    }

    /// Destroys every pool. The next allocation creates a fresh one.
    pub fn destroy_pools(&mut self) {
        self.ready.clear();
        self.full.clear();
    }

    #[inline]
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    #[inline]
    pub fn full_count(&self) -> usize {
        self.full.len()
    }

    /// Total pools created over the allocator's lifetime.
    #[inline]
    pub fn pools_created(&self) -> usize {
        self.pools_created
    }

    /// Set count the next new pool will be sized for.
    #[inline]
    pub fn sets_per_pool(&self) -> u32 {
        self.sets_per_pool
    }
}

fn bad_allocation(error: RhiError) -> RhiError {
    RhiError::BadAllocation(format!("descriptor set allocation failed: {}", error))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIFORM_SAMPLER_RATIOS: [PoolSizeRatio; 2] = [
        PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0),
        PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1.0),
    ];

    #[test]
    fn test_pool_sizes_round_ratios() {
        let ratios = [
            PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0),
            PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 0.5),
            PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 0.25),
        ];
        let sizes = pool_sizes(&ratios, 10);

        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes[0].descriptor_count, 10);
        assert_eq!(sizes[1].descriptor_count, 5);
        // 2.5 rounds away from zero.
        assert_eq!(sizes[2].descriptor_count, 3);
        assert_eq!(max_sets(&sizes), 18);
    }

    #[test]
    fn test_pool_sizes_drop_empty_types() {
        let ratios = [
            PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0),
            PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 0.1),
        ];
        let sizes = pool_sizes(&ratios, 2);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
    }

    #[test]
    fn test_sets_per_pool_growth() {
        assert_eq!(initial_sets_per_pool(2), 3);
        assert_eq!(initial_sets_per_pool(16), 24);
        assert_eq!(initial_sets_per_pool(0), 1);

        assert_eq!(next_sets_per_pool(3), 4);
        assert_eq!(next_sets_per_pool(4), 6);
        assert_eq!(next_sets_per_pool(13), 19);
        assert_eq!(next_sets_per_pool(4000), MAX_SETS_PER_POOL);
        assert_eq!(next_sets_per_pool(MAX_SETS_PER_POOL), MAX_SETS_PER_POOL);
    }

    /// Replays the allocator's pool policy against pools whose capacity for a
    /// one-uniform-buffer layout is their uniform buffer count.
    fn simulate_pools_for(allocations: u32, initial: u32, ratios: &[PoolSizeRatio]) -> usize {
        let uniform_capacity = |set_count: u32| {
            pool_sizes(ratios, set_count)
                .iter()
                .find(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER)
                .map_or(0, |s| s.descriptor_count)
        };

        let mut pools = 1;
        let mut remaining = uniform_capacity(initial);
        let mut sets_per_pool = initial_sets_per_pool(initial);
        for _ in 0..allocations {
            if remaining == 0 {
                pools += 1;
                remaining = uniform_capacity(sets_per_pool);
                sets_per_pool = next_sets_per_pool(sets_per_pool);
            }
            assert!(remaining > 0, "a fresh pool must satisfy the retry");
            remaining -= 1;
        }
        pools
    }

    #[test]
    fn test_descriptor_growth_pool_bound() {
        let pools = simulate_pools_for(100, 2, &UNIFORM_SAMPLER_RATIOS);
        let bound = ((100.0f64 / 3.0).ln() / 1.5f64.ln()).ceil() as usize + 1;

        assert_eq!(bound, 10);
        assert!(pools <= bound, "{} pools exceeds bound {}", pools, bound);
        assert!(pools > 1);
    }

    #[test]
    fn test_descriptor_growth_caps_pool_size() {
        let mut sets = initial_sets_per_pool(3000);
        for _ in 0..10 {
            sets = next_sets_per_pool(sets);
            assert!(sets <= MAX_SETS_PER_POOL);
        }
        assert_eq!(sets, MAX_SETS_PER_POOL);
    }
}
