//! The graphics device facade.
//!
//! [`GraphicsDevice`] composes the logical device, the memory allocator, the
//! swapchain, the frame ring and the immediate-submit context. It is the one
//! object most callers hold.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use venus_platform::Surface;
use venus_rhi::command::CommandBuffer;
use venus_rhi::device::Device;
use venus_rhi::instance::Instance;
use venus_rhi::memory::MemoryAllocator;
use venus_rhi::physical_device::{select_physical_device, PresentTarget};
use venus_rhi::swapchain::{Swapchain, SwapchainConfig};

use crate::error::RenderResult;
use crate::frame_ring::FrameRing;
use crate::immediate::ImmediateSubmit;

/// Options for [`GraphicsDevice::new`].
#[derive(Clone, Copy, Debug)]
pub struct GraphicsDeviceConfig {
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub depth_format: vk::Format,
    pub diagnostic: bool,
}

impl Default for GraphicsDeviceConfig {
    fn default() -> Self {
        Self {
            extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            present_mode: vk::PresentModeKHR::FIFO,
            depth_format: vk::Format::D16_UNORM,
            diagnostic: false,
        }
    }
}

pub struct GraphicsDevice {
    // Field order is drop order: frame slots, immediate context, swapchain,
    // allocator, then the device itself.
    frame_ring: FrameRing,
    immediate: ImmediateSubmit,
    swapchain: Swapchain,
    allocator: Arc<MemoryAllocator>,
    device: Arc<Device>,
    diagnostic: bool,
}

impl GraphicsDevice {
    /// Picks a GPU that can present to `surface` and builds everything on it.
    ///
    /// `instance` and `surface` must outlive the returned device.
    pub fn new(
        instance: &Instance,
        surface: &Surface,
        config: GraphicsDeviceConfig,
    ) -> RenderResult<Self> {
        let target = PresentTarget {
            surface: surface.handle(),
            loader: surface.loader(),
        };
        let physical = select_physical_device(instance.handle(), Some(target))?;
        let device = Device::new(instance, &physical)?;
        let allocator = MemoryAllocator::new(instance, device.clone())?;

        let swapchain = SwapchainConfig::new(config.extent)
            .present_mode(config.present_mode)
            .depth_format(config.depth_format)
            .create(instance, &allocator, surface.handle())?;

        let frame_ring = FrameRing::new(device.clone(), swapchain.image_count(), config.diagnostic)?;
        let immediate = ImmediateSubmit::new(device.clone())?;

        info!(
            "Graphics device ready: {} swapchain image(s), {}x{}",
            swapchain.image_count(),
            swapchain.extent().width,
            swapchain.extent().height
        );

        Ok(Self {
            frame_ring,
            immediate,
            swapchain,
            allocator,
            device,
            diagnostic: config.diagnostic,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn allocator(&self) -> &Arc<MemoryAllocator> {
        &self.allocator
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    #[inline]
    pub fn frame_ring(&self) -> &FrameRing {
        &self.frame_ring
    }

    #[inline]
    pub fn immediate(&self) -> &ImmediateSubmit {
        &self.immediate
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    #[inline]
    pub fn current_slot_index(&self) -> usize {
        self.frame_ring.current_index()
    }

    /// Color image and view acquired by the last `prepare`.
    pub fn current_image(&self) -> (vk::Image, vk::ImageView) {
        let index = self.frame_ring.current().image_index() as usize;
        (self.swapchain.image(index), self.swapchain.image_view(index))
    }

    #[inline]
    pub fn depth_view(&self) -> vk::ImageView {
        self.swapchain.depth().view()
    }

    /// See [`FrameRing::prepare`].
    pub fn prepare(&mut self) -> RenderResult<u32> {
        self.frame_ring.prepare(&self.swapchain)
    }

    pub fn begin_record(&mut self, flags: vk::CommandBufferUsageFlags) -> RenderResult<()> {
        self.frame_ring.begin_record(flags)
    }

    pub fn record<R>(&mut self, f: impl FnOnce(&CommandBuffer) -> R) -> RenderResult<R> {
        self.frame_ring.record(f)
    }

    pub fn end_record(&mut self) -> RenderResult<()> {
        self.frame_ring.end_record()
    }

    pub fn submit(&mut self) -> RenderResult<()> {
        self.frame_ring.submit()
    }

    /// Presents; returns `true` if the swapchain should be rebuilt.
    pub fn finish(&mut self) -> RenderResult<bool> {
        self.frame_ring.finish(&self.swapchain)
    }

    /// Presents the current frame's image without its commands after a
    /// mid-frame failure. See [`FrameRing::abandon`].
    pub fn abandon(&mut self) -> RenderResult<bool> {
        self.frame_ring.abandon(&self.swapchain)
    }

    /// Rebuilds the swapchain for `extent`.
    ///
    /// Frame slots are kept unless the image count changed. A zero extent
    /// (minimized window) is ignored.
    pub fn resize(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        if extent.width == 0 || extent.height == 0 {
            debug!("Ignoring resize to zero extent");
            return Ok(());
        }

        self.device.wait_idle()?;
        let previous_count = self.swapchain.image_count();
        self.swapchain.recreate(extent)?;

        let count = self.swapchain.image_count();
        if count != previous_count {
            warn!(
                "Swapchain image count changed {} -> {}; rebuilding frame slots",
                previous_count, count
            );
            self.frame_ring = FrameRing::new(self.device.clone(), count, self.diagnostic)?;
        }
        Ok(())
    }

    pub fn wait_idle(&self) -> RenderResult<()> {
        Ok(self.device.wait_idle()?)
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to wait for device idle during shutdown: {}", e);
        }
        info!("Destroying graphics device");
    }
}
