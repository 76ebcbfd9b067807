//! Swapchain management.
//!
//! This module handles VkSwapchainKHR creation, image acquisition, and presentation.
//!
//! # Overview
//!
//! The [`Swapchain`] struct provides a safe abstraction over the Vulkan swapchain,
//! including:
//! - Surface capability querying
//! - Format, present mode and extent selection
//! - Color image views plus a companion depth image
//! - Recreation for resize handling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use venus_rhi::memory::MemoryAllocator;
//! use venus_rhi::swapchain::SwapchainConfig;
//! use venus_rhi::vk;
//!
//! # fn run(
//! #     instance: &venus_rhi::instance::Instance,
//! #     allocator: &Arc<MemoryAllocator>,
//! #     surface: vk::SurfaceKHR,
//! #     semaphore: vk::Semaphore,
//! # ) -> venus_rhi::RhiResult<()> {
//! let swapchain = SwapchainConfig::new(vk::Extent2D { width: 1024, height: 1024 })
//!     .present_mode(vk::PresentModeKHR::FIFO)
//!     .create(instance, allocator, surface)?;
//!
//! let index = swapchain.acquire_next(semaphore, vk::Fence::null())?;
//! // ... render to swapchain.image(index as usize) ...
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, ImageConfig};
use crate::instance::Instance;
use crate::memory::MemoryAllocator;

/// Upper bound on the number of swapchain images (and therefore frames in flight).
pub const MAX_SWAPCHAIN_IMAGE_COUNT: u32 = 3;

/// Swapchain surface support details.
///
/// Contains information about what the surface supports for swapchain creation.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Every option a [`Swapchain`] supports.
#[derive(Clone, Debug)]
pub struct SwapchainConfig {
    /// Requested extent; only used when the surface leaves its extent undefined.
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub depth_format: vk::Format,
    pub image_usage: vk::ImageUsageFlags,
}

impl SwapchainConfig {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            present_mode: vk::PresentModeKHR::FIFO,
            surface_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            depth_format: vk::Format::D16_UNORM,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST,
        }
    }

    pub fn extent(mut self, extent: vk::Extent2D) -> Self {
        self.extent = extent;
        self
    }

    pub fn present_mode(mut self, mode: vk::PresentModeKHR) -> Self {
        self.present_mode = mode;
        self
    }

    pub fn surface_format(mut self, format: vk::Format, color_space: vk::ColorSpaceKHR) -> Self {
        self.surface_format = vk::SurfaceFormatKHR {
            format,
            color_space,
        };
        self
    }

    pub fn depth_format(mut self, format: vk::Format) -> Self {
        self.depth_format = format;
        self
    }

    pub fn image_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.image_usage = usage;
        self
    }

    pub fn create(
        self,
        instance: &Instance,
        allocator: &Arc<MemoryAllocator>,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<Swapchain> {
        Swapchain::new(instance, allocator, surface, self)
    }
}

/// Everything a single swapchain generation owns.
struct Generation {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth: Image,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

/// Vulkan swapchain wrapper.
///
/// Owns the swapchain handle, one view per presentable image, and a depth
/// image matching the swapchain extent. The surface itself is owned by the
/// caller and must outlive the swapchain.
///
/// The swapchain is not thread-safe. Only one thread should interact with it
/// at a time.
pub struct Swapchain {
    context: SwapchainContext,
    current: Generation,
}

/// Loaders and settings shared by every generation.
struct SwapchainContext {
    device: Arc<Device>,
    allocator: Arc<MemoryAllocator>,
    swapchain_loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    config: SwapchainConfig,
}

impl Swapchain {
    /// Creates a new swapchain for `surface`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The device was created without the swapchain extension
    /// - Surface queries fail
    /// - Neither the requested present mode nor FIFO is supported
    /// - Swapchain, view or depth image creation fails
    pub fn new(
        instance: &Instance,
        allocator: &Arc<MemoryAllocator>,
        surface: vk::SurfaceKHR,
        config: SwapchainConfig,
    ) -> RhiResult<Self> {
        let device = allocator.device().clone();
        if !device.supports_present() {
            return Err(RhiError::SwapchainError(
                "device was created without the swapchain extension".to_string(),
            ));
        }

        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let context = SwapchainContext {
            device,
            allocator: allocator.clone(),
            swapchain_loader,
            surface_loader,
            surface,
            config,
        };
        let current = context.create_generation(vk::SwapchainKHR::null())?;
        Ok(Self { context, current })
    }

    /// Recreates the swapchain for a new size.
    ///
    /// The current swapchain is handed to the driver as `oldSwapchain`, then
    /// its views, depth image and handle are destroyed. Passing it as
    /// `oldSwapchain` retires it even when creation fails: it can no longer
    /// acquire images, so a failed recreate must be retried or treated as fatal.
    ///
    /// The caller must ensure no submitted work still references the current
    /// images (typically by waiting for the device to be idle).
    pub fn recreate(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        info!(
            "Recreating swapchain for new size: {}x{}",
            extent.width, extent.height
        );

        self.context.config.extent = extent;
        let next = self.context.create_generation(self.current.swapchain)?;
        let old = std::mem::replace(&mut self.current, next);
        self.context.destroy_generation(old);
        Ok(())
    }

    /// Acquires the next swapchain image, signalling `semaphore` and/or `fence`.
    ///
    /// A suboptimal swapchain is still a success.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::OutOfDate`] when the swapchain must be recreated.
    pub fn acquire_next(&self, semaphore: vk::Semaphore, fence: vk::Fence) -> RhiResult<u32> {
        let result = unsafe {
            self.context
                .swapchain_loader
                .acquire_next_image(self.current.swapchain, u64::MAX, semaphore, fence)
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    debug!("Acquired image {} from a suboptimal swapchain", index);
                }
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RhiError::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Presents `image_index` on `queue` after `wait_semaphore` is signalled.
    ///
    /// Returns true if the swapchain is suboptimal.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::OutOfDate`] when the swapchain must be recreated.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<bool> {
        let swapchains = [self.current.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.context.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RhiError::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.current.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.current.surface_format.format
    }

    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.current.surface_format.color_space
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.current.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.current.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.current.images.len() as u32
    }

    /// Returns the swapchain image at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image(&self, index: usize) -> vk::Image {
        self.current.images[index]
    }

    /// Returns the image view at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.current.image_views[index]
    }

    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.current.images
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.current.image_views
    }

    /// The depth image shared by every swapchain image.
    #[inline]
    pub fn depth(&self) -> &Image {
        &self.current.depth
    }

    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.current.depth.format()
    }

}

impl SwapchainContext {
    fn create_generation(&self, old_swapchain: vk::SwapchainKHR) -> RhiResult<Generation> {
        let support = SwapchainSupportDetails::query(
            self.device.physical_device(),
            self.surface,
            &self.surface_loader,
        )?;

        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let present_mode = choose_present_mode(&support.present_modes, self.config.present_mode)?;
        let surface_format = choose_surface_format(&support.formats, self.config.surface_format);
        let extent = choose_extent(&support.capabilities, self.config.extent);
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::SwapchainError(
                "surface has a zero extent (window minimized?)".to_string(),
            ));
        }
        let image_count = determine_image_count(&support.capabilities)?;
        let pre_transform = choose_pre_transform(&support.capabilities);
        let composite_alpha = choose_composite_alpha(&support.capabilities);

        info!(
            "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count
        );

        let queue_families = self.device.queue_families();
        let graphics_family = queue_families.graphics_family.unwrap_or_default();
        let present_family = queue_families.present_family.unwrap_or(graphics_family);
        let queue_family_indices = [graphics_family, present_family];

        let (sharing_mode, queue_family_indices_slice) = if graphics_family != present_family {
            debug!(
                "Using CONCURRENT sharing mode between graphics ({}) and present ({}) queues",
                graphics_family, present_family
            );
            (vk::SharingMode::CONCURRENT, queue_family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(self.config.image_usage)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(queue_family_indices_slice)
            .pre_transform(pre_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };

        // Everything below rolls the new swapchain back on failure.
        let built = (|| {
            let images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? };
            check_image_count(images.len())?;
            let image_views = create_image_views(&self.device, &images, surface_format.format)?;
            let depth = ImageConfig::new(extent, self.config.depth_format)
                .usage(
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                )
                .name("swapchain depth")
                .create(&self.allocator);
            match depth {
                Ok(depth) => Ok((images, image_views, depth)),
                Err(e) => {
                    destroy_image_views(&self.device, &image_views);
                    Err(e)
                }
            }
        })();

        let (images, image_views, depth) = match built {
            Ok(parts) => parts,
            Err(e) => {
                unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        info!("Swapchain created with {} images", images.len());

        Ok(Generation {
            swapchain,
            images,
            image_views,
            depth,
            surface_format,
            extent,
            present_mode,
        })
    }

    fn destroy_generation(&self, generation: Generation) {
        destroy_image_views(&self.device, &generation.image_views);
        if generation.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(generation.swapchain, None);
            }
        }
        debug!(
            "Destroyed swapchain generation ({}x{}, {} images)",
            generation.extent.width,
            generation.extent.height,
            generation.images.len()
        );
        // The depth image drops with `generation`.
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        destroy_image_views(&self.context.device, &self.current.image_views);
        self.current.image_views.clear();

        if self.current.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.context
                    .swapchain_loader
                    .destroy_swapchain(self.current.swapchain, None);
            }
            info!(
                "Swapchain destroyed (was {}x{}, {} images)",
                self.current.extent.width,
                self.current.extent.height,
                self.current.images.len()
            );
        }
    }
}

/// Picks the requested present mode, else FIFO.
fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    requested: vk::PresentModeKHR,
) -> RhiResult<vk::PresentModeKHR> {
    if available.contains(&requested) {
        debug!("Selected requested present mode {:?}", requested);
        return Ok(requested);
    }
    if available.contains(&vk::PresentModeKHR::FIFO) {
        warn!("Present mode {:?} unsupported, falling back to FIFO", requested);
        return Ok(vk::PresentModeKHR::FIFO);
    }
    Err(RhiError::NotFound(format!(
        "present mode {:?} (and FIFO) not supported by the surface",
        requested
    )))
}

/// Exact `{format, colorSpace}` match, else the format with the first color
/// space offered for it, else the first candidate.
fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    requested: vk::SurfaceFormatKHR,
) -> vk::SurfaceFormatKHR {
    if let Some(&exact) = formats
        .iter()
        .find(|f| f.format == requested.format && f.color_space == requested.color_space)
    {
        return exact;
    }

    if let Some(&same_format) = formats.iter().find(|f| f.format == requested.format) {
        warn!(
            "Surface format {:?} only available with color space {:?}",
            requested.format, same_format.color_space
        );
        return same_format;
    }

    let first = formats.first().copied().unwrap_or(requested);
    warn!(
        "Surface format {:?} unsupported, using {:?}",
        requested.format, first.format
    );
    first
}

/// Uses the surface's current extent unless it is the undefined sentinel, in
/// which case the request is clamped to the supported range.
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, bounded by the surface maximum and
/// [`MAX_SWAPCHAIN_IMAGE_COUNT`], never below the surface minimum.
///
/// # Errors
///
/// [`RhiError::SwapchainError`] if the surface needs more images than
/// [`MAX_SWAPCHAIN_IMAGE_COUNT`].
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> RhiResult<u32> {
    if capabilities.min_image_count > MAX_SWAPCHAIN_IMAGE_COUNT {
        return Err(RhiError::SwapchainError(format!(
            "surface needs at least {} images, more than the supported {}",
            capabilities.min_image_count, MAX_SWAPCHAIN_IMAGE_COUNT
        )));
    }

    let mut count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count = count.min(capabilities.max_image_count);
    }
    Ok(count
        .min(MAX_SWAPCHAIN_IMAGE_COUNT)
        .max(capabilities.min_image_count)
        .max(1))
}

/// The driver may hand back more images than requested; the frame ring has
/// one slot per image and is bounded by [`MAX_SWAPCHAIN_IMAGE_COUNT`].
fn check_image_count(count: usize) -> RhiResult<()> {
    if count == 0 || count > MAX_SWAPCHAIN_IMAGE_COUNT as usize {
        return Err(RhiError::SwapchainError(format!(
            "swapchain returned {} images, expected 1..={}",
            count, MAX_SWAPCHAIN_IMAGE_COUNT
        )));
    }
    Ok(())
}

fn choose_pre_transform(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

fn choose_composite_alpha(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&alpha| capabilities.supported_composite_alpha.contains(alpha))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Creates image views for swapchain images, destroying the partial set on failure.
fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut image_views = Vec::with_capacity(images.len());

    for (i, &image) in images.iter().enumerate() {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(crate::image::full_range(vk::ImageAspectFlags::COLOR, 1));

        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => image_views.push(view),
            Err(e) => {
                destroy_image_views(device, &image_views);
                return Err(RhiError::SwapchainError(format!(
                    "Failed to create image view {}: {:?}",
                    i, e
                )));
            }
        }
    }

    debug!("Created {} image views", image_views.len());
    Ok(image_views)
}

fn destroy_image_views(device: &Device, views: &[vk::ImageView]) {
    for &view in views {
        unsafe { device.handle().destroy_image_view(view, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn undefined_extent_caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: min,
                height: min,
            },
            max_image_extent: vk::Extent2D {
                width: max,
                height: max,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_choose_surface_format_exact_match() {
        let formats = vec![
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let requested =
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR);

        assert_eq!(choose_surface_format(&formats, requested), formats[1]);
    }

    #[test]
    fn test_choose_surface_format_pairs_first_color_space() {
        let formats = vec![
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::HDR10_ST2084_EXT),
        ];
        let requested =
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR);

        let selected = choose_surface_format(&formats, requested);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(selected.color_space, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT);
    }

    #[test]
    fn test_choose_surface_format_fallback_to_first() {
        let formats = vec![
            surface_format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let requested =
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR);

        assert_eq!(choose_surface_format(&formats, requested), formats[0]);
    }

    #[test]
    fn test_choose_present_mode_requested() {
        let modes = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let selected = choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX).unwrap();
        assert_eq!(selected, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_choose_present_mode_fallback_to_fifo() {
        let modes = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        let selected = choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX).unwrap();
        assert_eq!(selected, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_present_mode_without_fifo_is_not_found() {
        let modes = vec![vk::PresentModeKHR::IMMEDIATE];
        let err = choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX).unwrap_err();
        assert_eq!(err.code(), venus_core::ErrorCode::NOT_FOUND);
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..undefined_extent_caps(1, 4096)
        };

        let extent = choose_extent(&capabilities, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(extent, vk::Extent2D { width: 1920, height: 1080 });
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = undefined_extent_caps(100, 2000);

        let extent = choose_extent(&capabilities, vk::Extent2D { width: 3000, height: 3000 });
        assert_eq!(extent, vk::Extent2D { width: 2000, height: 2000 });

        let extent = choose_extent(&capabilities, vk::Extent2D { width: 50, height: 50 });
        assert_eq!(extent, vk::Extent2D { width: 100, height: 100 });

        let extent = choose_extent(&capabilities, vk::Extent2D { width: 640, height: 480 });
        assert_eq!(extent, vk::Extent2D { width: 640, height: 480 });
    }

    #[test]
    fn test_choose_extent_always_within_limits() {
        let capabilities = undefined_extent_caps(64, 1024);
        for width in [0, 1, 63, 64, 500, 1024, 1025, u32::MAX - 1] {
            for height in [0, 64, 700, 4096] {
                let extent = choose_extent(&capabilities, vk::Extent2D { width, height });
                assert!((64..=1024).contains(&extent.width));
                assert!((64..=1024).contains(&extent.height));
            }
        }
    }

    #[test]
    fn test_determine_image_count() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities).unwrap(), 3);

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities).unwrap(), 2);

        // Capped by the engine limit while it stays above the surface minimum.
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(
            determine_image_count(&capabilities).unwrap(),
            MAX_SWAPCHAIN_IMAGE_COUNT
        );

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 0,
            max_image_count: 1,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities).unwrap(), 1);
    }

    #[test]
    fn test_image_count_never_below_surface_minimum() {
        for min in 0..=MAX_SWAPCHAIN_IMAGE_COUNT {
            for max in [0, min, min + 1, 8] {
                let capabilities = vk::SurfaceCapabilitiesKHR {
                    min_image_count: min,
                    max_image_count: max,
                    ..Default::default()
                };
                let count = determine_image_count(&capabilities).unwrap();
                assert!(count >= min, "count {} below surface min {}", count, min);
                assert!((1..=MAX_SWAPCHAIN_IMAGE_COUNT).contains(&count));
            }
        }
    }

    #[test]
    fn test_surface_minimum_above_limit_is_rejected() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 4,
            max_image_count: 8,
            ..Default::default()
        };
        let err = determine_image_count(&capabilities).unwrap_err();
        assert!(matches!(err, RhiError::SwapchainError(_)));
    }

    #[test]
    fn test_returned_image_count_is_bounded() {
        assert!(check_image_count(0).is_err());
        assert!(check_image_count(1).is_ok());
        assert!(check_image_count(MAX_SWAPCHAIN_IMAGE_COUNT as usize).is_ok());
        assert!(check_image_count(MAX_SWAPCHAIN_IMAGE_COUNT as usize + 1).is_err());
    }

    #[test]
    fn test_choose_pre_transform_prefers_identity() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY
                | vk::SurfaceTransformFlagsKHR::ROTATE_90,
            current_transform: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            ..Default::default()
        };
        assert_eq!(
            choose_pre_transform(&capabilities),
            vk::SurfaceTransformFlagsKHR::IDENTITY
        );

        let capabilities = vk::SurfaceCapabilitiesKHR {
            supported_transforms: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            current_transform: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            ..Default::default()
        };
        assert_eq!(
            choose_pre_transform(&capabilities),
            vk::SurfaceTransformFlagsKHR::ROTATE_90
        );
    }

    #[test]
    fn test_choose_composite_alpha_order() {
        let caps = |flags| vk::SurfaceCapabilitiesKHR {
            supported_composite_alpha: flags,
            ..Default::default()
        };

        assert_eq!(
            choose_composite_alpha(&caps(
                vk::CompositeAlphaFlagsKHR::OPAQUE | vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
            )),
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
        );
        assert_eq!(
            choose_composite_alpha(&caps(
                vk::CompositeAlphaFlagsKHR::INHERIT | vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
            )),
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
        );
        assert_eq!(
            choose_composite_alpha(&caps(
                vk::CompositeAlphaFlagsKHR::OPAQUE | vk::CompositeAlphaFlagsKHR::INHERIT
            )),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
        assert_eq!(
            choose_composite_alpha(&caps(vk::CompositeAlphaFlagsKHR::OPAQUE)),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
    }

    #[test]
    fn test_swapchain_config_defaults() {
        let config = SwapchainConfig::new(vk::Extent2D { width: 1024, height: 1024 });
        assert_eq!(config.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(config.depth_format, vk::Format::D16_UNORM);
        assert!(config
            .image_usage
            .contains(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn test_swapchain_support_details_is_adequate() {
        let adequate = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(adequate.is_adequate());

        let no_formats = SwapchainSupportDetails {
            formats: vec![],
            ..adequate.clone()
        };
        assert!(!no_formats.is_adequate());

        let no_modes = SwapchainSupportDetails {
            present_modes: vec![],
            ..adequate
        };
        assert!(!no_modes.is_adequate());
    }
}
