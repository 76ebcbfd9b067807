//! Synchronous one-shot command submission.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use venus_rhi::command::{CommandBuffer, CommandPool};
use venus_rhi::device::Device;
use venus_rhi::sync::Fence;

use crate::error::RenderResult;

/// A dedicated pool, command buffer and fence for blocking uploads and
/// layout transitions.
///
/// Not for use inside a frame's `record` callback; upload before `prepare`
/// or after `finish`.
pub struct ImmediateSubmit {
    device: Arc<Device>,
    command_buffer: CommandBuffer,
    fence: Fence,
    // Dropped after the command buffer it allocated.
    pool: CommandPool,
}

impl ImmediateSubmit {
    pub fn new(device: Arc<Device>) -> RenderResult<Self> {
        let pool = CommandPool::new_transient(device.clone(), device.graphics_family())?;
        let command_buffer = pool.allocate_command_buffer()?;
        let fence = Fence::new(device.clone(), true)?;
        debug!("Immediate submit context created");
        Ok(Self {
            device,
            command_buffer,
            fence,
            pool,
        })
    }

    /// Records `f`, submits it to the graphics queue and blocks until it completes.
    pub fn submit<R>(&self, f: impl FnOnce(&CommandBuffer) -> R) -> RenderResult<R> {
        self.fence.reset()?;
        self.command_buffer.reset()?;
        self.command_buffer
            .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        let result = f(&self.command_buffer);

        self.command_buffer.end()?;
        let commands = [self.command_buffer.submit_info()];
        let submit = vk::SubmitInfo2::default().command_buffer_infos(&commands);

        // SAFETY: the command buffer was just recorded and the fence was reset
        // above; nothing else submits with this fence.
        unsafe {
            self.device
                .submit_graphics(&[submit], self.fence.handle())?
        };
        self.fence.wait(u64::MAX)?;

        Ok(result)
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn pool(&self) -> &CommandPool {
        &self.pool
    }
}
