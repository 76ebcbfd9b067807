//! Device images with an owned view.
//!
//! [`ImageConfig`] enumerates every option an [`Image`] supports. The image
//! view always covers all mip levels; the aspect is derived from the format
//! unless set explicitly.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::memory::{DeviceMemory, MemoryAllocator, MemoryPolicy};

/// Number of levels in a full mip chain: `floor(log2(max(w, h))) + 1`.
pub fn mip_level_count(extent: vk::Extent2D) -> u32 {
    let largest = extent.width.max(extent.height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Extent of mip `level`, never smaller than 1×1.
pub fn mip_extent(extent: vk::Extent2D, level: u32) -> vk::Extent2D {
    vk::Extent2D {
        width: (extent.width >> level).max(1),
        height: (extent.height >> level).max(1),
    }
}

/// Returns `true` for formats with a depth component.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspect mask implied by a format.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    if is_depth_format(format) {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Every option an [`Image`] supports.
#[derive(Clone, Debug)]
pub struct ImageConfig {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    /// `None` means a full mip chain.
    pub mip_levels: Option<u32>,
    pub aspect: Option<vk::ImageAspectFlags>,
    pub tiling: vk::ImageTiling,
    pub policy: MemoryPolicy,
    pub name: String,
}

impl ImageConfig {
    /// A single-level, device-local, sampled image.
    pub fn new(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::SAMPLED,
            mip_levels: Some(1),
            aspect: None,
            tiling: vk::ImageTiling::OPTIMAL,
            policy: MemoryPolicy::DeviceLocal,
            name: "image".to_owned(),
        }
    }

    pub fn usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = Some(levels.max(1));
        self
    }

    /// Requests a full mip chain.
    pub fn mipmapped(mut self) -> Self {
        self.mip_levels = None;
        self
    }

    pub fn aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = Some(aspect);
        self
    }

    pub fn tiling(mut self, tiling: vk::ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }

    pub fn policy(mut self, policy: MemoryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Resolved level count.
    pub fn level_count(&self) -> u32 {
        self.mip_levels
            .unwrap_or_else(|| mip_level_count(self.extent))
    }

    /// Resolved aspect.
    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        self.aspect
            .unwrap_or_else(|| aspect_for_format(self.format))
    }

    pub fn create(&self, allocator: &Arc<MemoryAllocator>) -> RhiResult<Image> {
        Image::from_config(allocator, self)
    }
}

/// A device image, its memory and a view over every mip level.
pub struct Image {
    image: vk::Image,
    view: vk::ImageView,
    extent: vk::Extent2D,
    format: vk::Format,
    mip_levels: u32,
    aspect: vk::ImageAspectFlags,
    usage: vk::ImageUsageFlags,
    memory: DeviceMemory,
}

impl Image {
    fn from_config(allocator: &Arc<MemoryAllocator>, config: &ImageConfig) -> RhiResult<Self> {
        if config.extent.width == 0 || config.extent.height == 0 {
            return Err(RhiError::InvalidInput(format!(
                "image '{}' must have a non-zero extent",
                config.name
            )));
        }

        let device = allocator.device();
        let mip_levels = config.level_count();
        let aspect = config.aspect_mask();

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(config.format)
            .extent(vk::Extent3D {
                width: config.extent.width,
                height: config.extent.height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(config.tiling)
            .usage(config.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let linear = config.tiling == vk::ImageTiling::LINEAR;
        let memory = match allocator.allocate(&config.name, requirements, config.policy, linear) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        let (device_memory, offset) = memory.binding();
        let view = unsafe {
            device
                .handle()
                .bind_image_memory(image, device_memory, offset)
                .and_then(|()| {
                    let view_info = vk::ImageViewCreateInfo::default()
                        .image(image)
                        .view_type(vk::ImageViewType::TYPE_2D)
                        .format(config.format)
                        .subresource_range(full_range(aspect, mip_levels));
                    device.handle().create_image_view(&view_info, None)
                })
        };
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e.into());
            }
        };

        debug!(
            "Created image '{}': {}x{} {:?}, {} level(s)",
            config.name, config.extent.width, config.extent.height, config.format, mip_levels
        );

        Ok(Self {
            image,
            view,
            extent: config.extent,
            format: config.format,
            mip_levels,
            aspect,
            usage: config.usage,
            memory,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    #[inline]
    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    /// Subresource range covering every level.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        full_range(self.aspect, self.mip_levels)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let device = self.memory.allocator().device().handle();
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
        }
        debug!("Destroyed image '{}'", self.memory.name());
    }
}

/// Subresource range over `levels` mips of the first layer.
pub fn full_range(aspect: vk::ImageAspectFlags, levels: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(levels)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(extent(1, 1)), 1);
        assert_eq!(mip_level_count(extent(16, 16)), 5);
        assert_eq!(mip_level_count(extent(17, 3)), 5);
        assert_eq!(mip_level_count(extent(1024, 512)), 11);
        assert_eq!(mip_level_count(extent(0, 0)), 1);
    }

    #[test]
    fn test_mip_extent_clamps_to_one() {
        assert_eq!(mip_extent(extent(16, 4), 0), extent(16, 4));
        assert_eq!(mip_extent(extent(16, 4), 2), extent(4, 1));
        assert_eq!(mip_extent(extent(16, 4), 4), extent(1, 1));
    }

    #[test]
    fn test_aspect_from_format() {
        assert_eq!(aspect_for_format(vk::Format::D16_UNORM), vk::ImageAspectFlags::DEPTH);
        assert_eq!(aspect_for_format(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for_format(vk::Format::R8G8B8A8_UNORM),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn test_config_resolution() {
        let config = ImageConfig::new(extent(16, 16), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(config.level_count(), 1);
        assert_eq!(config.mipmapped().level_count(), 5);

        let depth = ImageConfig::new(extent(8, 8), vk::Format::D16_UNORM);
        assert_eq!(depth.aspect_mask(), vk::ImageAspectFlags::DEPTH);
        assert_eq!(depth.policy, MemoryPolicy::DeviceLocal);
        assert_eq!(depth.tiling, vk::ImageTiling::OPTIMAL);
    }

    #[test]
    fn test_mip_levels_never_zero() {
        let config = ImageConfig::new(extent(4, 4), vk::Format::R8G8B8A8_UNORM).mip_levels(0);
        assert_eq!(config.level_count(), 1);
    }

    #[test]
    fn test_full_range() {
        let range = full_range(vk::ImageAspectFlags::COLOR, 3);
        assert_eq!(range.level_count, 3);
        assert_eq!(range.layer_count, 1);
        assert_eq!(range.base_mip_level, 0);
    }
}
