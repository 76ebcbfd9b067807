//! Per-swapchain-image frame resources and the frame protocol.
//!
//! The ring holds one [`FrameSlot`] per swapchain image. Frame `n` uses slot
//! `n % slot_count`, and every slot steps through:
//!
//! ```text
//! IDLE --prepare--> ACQUIRED --begin_record--> RECORDING
//!                                                  |
//!                                              end_record
//!                                                  v
//!                 SUBMITTED <--submit--           READY
//!                     |
//!               finish (present)
//!                     v
//!                   IDLE
//! ```
//!
//! # Synchronization
//!
//! ```text
//! 1. prepare: wait on in_flight (GPU is done with this slot's previous use),
//!    acquire an image signalling image_acquired, then reset in_flight
//! 2. record into the slot's primary command buffer
//! 3. submit: wait image_acquired @ COLOR_ATTACHMENT_OUTPUT,
//!    signal render_finished @ ALL_GRAPHICS, signal in_flight
//! 4. finish: present waiting on render_finished
//! ```
//!
//! An `OUT_OF_DATE` acquire leaves the fence signalled so the caller can
//! rebuild the swapchain and call `prepare` again.
//!
//! A frame that fails between `prepare` and `finish` is abandoned: the
//! acquired image is still submitted (as a bare transition to
//! `PRESENT_SRC_KHR`) and presented, so it returns to the presentation engine.

use std::fmt;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use venus_rhi::command::{transition_barrier, CommandBuffer, CommandPool};
use venus_rhi::device::Device;
use venus_rhi::image::full_range;
use venus_rhi::swapchain::Swapchain;
use venus_rhi::sync::{Fence, Semaphore};
use venus_rhi::{RhiError, RhiResult};

use crate::error::{RenderError, RenderResult};

/// Where a slot is in the frame protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameState {
    Idle,
    Acquired,
    Recording,
    Ready,
    Submitted,
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameState::Idle => "IDLE",
            FrameState::Acquired => "ACQUIRED",
            FrameState::Recording => "RECORDING",
            FrameState::Ready => "READY",
            FrameState::Submitted => "SUBMITTED",
        };
        f.write_str(name)
    }
}

/// A frame protocol call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameOp {
    Prepare,
    BeginRecord,
    Record,
    EndRecord,
    Submit,
    Finish,
}

impl fmt::Display for FrameOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameOp::Prepare => "prepare",
            FrameOp::BeginRecord => "begin_record",
            FrameOp::Record => "record",
            FrameOp::EndRecord => "end_record",
            FrameOp::Submit => "submit",
            FrameOp::Finish => "finish",
        };
        f.write_str(name)
    }
}

impl FrameState {
    /// The state after `op`, or an error if `op` is not allowed here.
    ///
    /// `Record` is only legal while recording and does not change the state.
    pub fn advance(self, op: FrameOp) -> RenderResult<FrameState> {
        let next = match (self, op) {
            (FrameState::Idle, FrameOp::Prepare) => FrameState::Acquired,
            (FrameState::Acquired, FrameOp::BeginRecord) => FrameState::Recording,
            (FrameState::Recording, FrameOp::Record) => FrameState::Recording,
            (FrameState::Recording, FrameOp::EndRecord) => FrameState::Ready,
            (FrameState::Ready, FrameOp::Submit) => FrameState::Submitted,
            (FrameState::Submitted, FrameOp::Finish) => FrameState::Idle,
            (state, op) => return Err(RenderError::InvalidFrameState { op, state }),
        };
        Ok(next)
    }
}

/// Resources owned by one in-flight frame.
pub struct FrameSlot {
    command_buffers: Vec<CommandBuffer>,
    image_acquired: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
    state: FrameState,
    image_index: u32,
    // Dropped after the command buffers it allocated.
    command_pool: CommandPool,
}

impl FrameSlot {
    fn new(device: Arc<Device>) -> RenderResult<Self> {
        let command_pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let command_buffers = vec![command_pool.allocate_command_buffer()?];
        let image_acquired = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        // Signalled so the first prepare does not block forever.
        let in_flight = Fence::new(device, true)?;

        Ok(Self {
            command_buffers,
            image_acquired,
            render_finished,
            in_flight,
            state: FrameState::Idle,
            image_index: 0,
            command_pool,
        })
    }

    /// The primary command buffer recorded each frame.
    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffers[0]
    }

    #[inline]
    pub fn command_buffers(&self) -> &[CommandBuffer] {
        &self.command_buffers
    }

    #[inline]
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    #[inline]
    pub fn image_acquired(&self) -> &Semaphore {
        &self.image_acquired
    }

    #[inline]
    pub fn render_finished(&self) -> &Semaphore {
        &self.render_finished
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Swapchain image acquired by the last `prepare`.
    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    fn step(&mut self, op: FrameOp) -> RenderResult<()> {
        self.state = self.state.advance(op)?;
        Ok(())
    }

    fn expect(&self, op: FrameOp) -> RenderResult<()> {
        self.state.advance(op).map(|_| ())
    }
}

/// Ring of frame slots driven through the frame protocol.
///
/// # Thread Safety
///
/// Not thread-safe; every call must come from the thread that owns the device.
pub struct FrameRing {
    device: Arc<Device>,
    slots: Vec<FrameSlot>,
    frame_counter: u64,
    diagnostic: bool,
}

impl FrameRing {
    /// Creates `slot_count` slots, one per swapchain image.
    pub fn new(device: Arc<Device>, slot_count: u32, diagnostic: bool) -> RenderResult<Self> {
        if slot_count == 0 {
            return Err(RhiError::InvalidInput("frame ring needs at least one slot".into()).into());
        }

        let slots = (0..slot_count)
            .map(|_| FrameSlot::new(device.clone()))
            .collect::<RenderResult<Vec<_>>>()?;

        info!(
            "Frame ring created with {} slot(s){}",
            slot_count,
            if diagnostic { " (diagnostic)" } else { "" }
        );

        Ok(Self {
            device,
            slots,
            frame_counter: 0,
            diagnostic,
        })
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Frames finished so far.
    #[inline]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Index of the slot the current frame uses.
    #[inline]
    pub fn current_index(&self) -> usize {
        slot_index(self.frame_counter, self.slots.len())
    }

    #[inline]
    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current_index()]
    }

    #[inline]
    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    fn current_mut(&mut self) -> &mut FrameSlot {
        let index = self.current_index();
        &mut self.slots[index]
    }

    /// Waits for the slot to retire, then acquires the next swapchain image.
    ///
    /// # Errors
    ///
    /// [`RenderError::ResizeRequested`] when the swapchain is out of date; the
    /// fence stays signalled and the slot stays idle, so a retry after a
    /// rebuild is cheap.
    pub fn prepare(&mut self, swapchain: &Swapchain) -> RenderResult<u32> {
        let slot = self.current_mut();
        slot.expect(FrameOp::Prepare)?;

        slot.in_flight.wait(u64::MAX)?;

        let acquired = swapchain.acquire_next(slot.image_acquired.handle(), vk::Fence::null());
        let (next, image_index) =
            settle_acquire(slot.state, acquired, || Ok(slot.in_flight.reset()?))?;
        slot.image_index = image_index;
        slot.state = next;
        Ok(image_index)
    }

    /// Resets the primary command buffer and begins recording.
    pub fn begin_record(&mut self, flags: vk::CommandBufferUsageFlags) -> RenderResult<()> {
        let slot = self.current_mut();
        slot.expect(FrameOp::BeginRecord)?;
        slot.command_buffer().reset()?;
        slot.command_buffer().begin(flags)?;
        slot.step(FrameOp::BeginRecord)
    }

    /// Runs `f` with the recording command buffer.
    pub fn record<R>(&mut self, f: impl FnOnce(&CommandBuffer) -> R) -> RenderResult<R> {
        let slot = self.current();
        slot.expect(FrameOp::Record)?;
        Ok(f(slot.command_buffer()))
    }

    pub fn end_record(&mut self) -> RenderResult<()> {
        let slot = self.current_mut();
        slot.expect(FrameOp::EndRecord)?;
        slot.command_buffer().end()?;
        slot.step(FrameOp::EndRecord)
    }

    /// Submits the recorded commands to the graphics queue.
    pub fn submit(&mut self) -> RenderResult<()> {
        let device = self.device.clone();
        let slot = self.current_mut();
        slot.expect(FrameOp::Submit)?;

        let wait = [slot
            .image_acquired
            .submit_info(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)];
        let signal = [slot
            .render_finished
            .submit_info(vk::PipelineStageFlags2::ALL_GRAPHICS)];
        let commands = [slot.command_buffer().submit_info()];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait)
            .command_buffer_infos(&commands)
            .signal_semaphore_infos(&signal);

        // SAFETY: the command buffer is fully recorded, image_acquired has a
        // pending signal from prepare, and in_flight was reset in prepare.
        unsafe { device.submit_graphics(&[submit], slot.in_flight.handle())? };

        slot.step(FrameOp::Submit)
    }

    /// Presents the acquired image and advances to the next slot.
    ///
    /// Returns `true` when the swapchain should be rebuilt (suboptimal or out
    /// of date). The frame counts as finished either way.
    pub fn finish(&mut self, swapchain: &Swapchain) -> RenderResult<bool> {
        let present_queue = self.device.present_queue();
        let slot = self.current_mut();
        slot.expect(FrameOp::Finish)?;

        let present = swapchain.present(
            present_queue,
            slot.image_index,
            slot.render_finished.handle(),
        );
        slot.step(FrameOp::Finish)?;
        self.frame_counter += 1;

        let needs_resize = match present {
            Ok(suboptimal) => suboptimal,
            Err(e) if e.is_out_of_date() => {
                debug!("Swapchain out of date on present");
                true
            }
            Err(e) => return Err(e.into()),
        };

        if self.diagnostic {
            self.device.graphics_queue_wait_idle()?;
        }

        Ok(needs_resize)
    }

    /// Gives up on the current frame after a failure between `prepare` and
    /// `finish`.
    ///
    /// Whatever was recorded is discarded. The acquired image is transitioned
    /// to `PRESENT_SRC_KHR`, submitted with the slot's semaphores and fence,
    /// and presented with undefined contents, so the swapchain gets it back
    /// and the slot can be prepared again. Returns what [`Self::finish`]
    /// returns.
    pub fn abandon(&mut self, swapchain: &Swapchain) -> RenderResult<bool> {
        let state = self.current().state;
        let recovery = recovery_for(state);
        if recovery == Recovery::Nothing {
            return Ok(false);
        }
        warn!("Abandoning frame {} in state {}", self.frame_counter, state);

        if recovery == Recovery::RecordAndPresent {
            let image = swapchain.image(self.current().image_index as usize);
            let slot = self.current_mut();
            let cmd = slot.command_buffer();
            cmd.reset()?;
            cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
            // Source stage matches the image-acquired wait.
            cmd.image_barriers(&[transition_barrier(
                image,
                full_range(vk::ImageAspectFlags::COLOR, 1),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::PRESENT_SRC_KHR,
            )
            .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)]);
            cmd.end()?;
            slot.state = FrameState::Ready;
            self.submit()?;
        }

        self.finish(swapchain)
    }
}

impl Drop for FrameRing {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to wait for device idle before destroying frame ring: {}", e);
        }
        debug!("Destroying frame ring with {} slot(s)", self.slots.len());
    }
}

/// Applies an acquire result to a slot in `state`.
///
/// `reset_fence` runs only once an image was acquired. On `OUT_OF_DATE` the
/// fence stays signalled and the slot keeps its state.
fn settle_acquire(
    state: FrameState,
    acquired: RhiResult<u32>,
    reset_fence: impl FnOnce() -> RenderResult<()>,
) -> RenderResult<(FrameState, u32)> {
    let image_index = match acquired {
        Ok(index) => index,
        Err(e) if e.is_out_of_date() => {
            debug!("Swapchain out of date on acquire");
            return Err(RenderError::ResizeRequested);
        }
        Err(e) => return Err(e.into()),
    };
    let next = state.advance(FrameOp::Prepare)?;
    reset_fence()?;
    Ok((next, image_index))
}

/// Work needed to hand an abandoned frame's image back for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Recovery {
    /// No image is held.
    Nothing,
    /// Commands were submitted; only the present is missing.
    Present,
    /// Record a bare layout transition, submit it, then present.
    RecordAndPresent,
}

fn recovery_for(state: FrameState) -> Recovery {
    match state {
        FrameState::Idle => Recovery::Nothing,
        FrameState::Submitted => Recovery::Present,
        FrameState::Acquired | FrameState::Recording | FrameState::Ready => {
            Recovery::RecordAndPresent
        }
    }
}

/// Slot used by frame `frame_counter` in a ring of `slot_count` slots.
#[inline]
pub fn slot_index(frame_counter: u64, slot_count: usize) -> usize {
    (frame_counter % slot_count as u64) as usize
}
