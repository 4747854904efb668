// SPDX-License-Identifier: CEPL-1.0
//! Frame loop: acquire, record, submit, present over a ring of frame slots.
//!
//! The loop only owns the current slot index. Semaphores, fences, command
//! buffers and the swapchain live behind [`FrameBackend`], which lets the
//! ordering rules below be exercised without a GPU.

use anyhow::{bail, Result};
use bitflags::bitflags;
use tracing::{debug, info};

use crate::{DrawItem, RenderSize, SurfaceProvider};

/// Depth of the slot ring: at most this many submissions are outstanding.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

bitflags! {
    /// Why a swapchain recreation was requested.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RecreateCause: u8 {
        const OUT_OF_DATE = 1 << 0;
        const SUBOPTIMAL = 1 << 1;
        const RESIZED = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and handed to the presentation engine.
    /// `recreated` is empty unless the swapchain was rebuilt afterwards; a
    /// rebuild deferred by a zero-sized surface does not count.
    Presented {
        image_index: u32,
        recreated: RecreateCause,
    },
    /// Acquire reported out-of-date; the swapchain was rebuilt (or deferred)
    /// and nothing was recorded or submitted.
    Skipped,
    /// The surface has a zero dimension.
    Paused,
}

/// GPU-side operations the frame loop sequences. `slot` is always in
/// `0..MAX_FRAMES_IN_FLIGHT` (or the depth the synchronizer was built with).
pub trait FrameBackend {
    /// Number of frame slots (fence + semaphores + command buffer) it owns.
    fn frame_slots(&self) -> usize;
    /// Blocks until the slot's in-flight fence is signaled.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;
    /// Requests the next image, signaling the slot's image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;
    fn reset_slot_fence(&mut self, slot: usize) -> Result<()>;
    /// Resets and re-records the slot's command buffer against `image_index`.
    fn record(&mut self, slot: usize, image_index: u32, draws: &[DrawItem]) -> Result<()>;
    /// Submits the slot's command buffer with its in-flight fence.
    fn submit(&mut self, slot: usize) -> Result<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;
    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()>;
    fn wait_idle(&mut self) -> Result<()>;
}

#[derive(Debug)]
pub struct FrameSynchronizer {
    frames_in_flight: usize,
    current_frame: usize,
    deferred: RecreateCause,
}

impl Default for FrameSynchronizer {
    fn default() -> Self {
        Self::new(MAX_FRAMES_IN_FLIGHT)
    }
}

impl FrameSynchronizer {
    pub fn new(frames_in_flight: usize) -> Self {
        FrameSynchronizer {
            frames_in_flight: frames_in_flight.max(1),
            current_frame: 0,
            deferred: RecreateCause::empty(),
        }
    }

    /// A ring exactly as deep as the backend's slot count.
    pub fn for_backend<B: FrameBackend + ?Sized>(backend: &B) -> Self {
        Self::new(backend.frame_slots())
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Recreation requested while the surface was zero-sized.
    pub fn deferred_recreate(&self) -> RecreateCause {
        self.deferred
    }

    // STRICT PER-FRAME ORDER:
    // 1) wait slot fence -> acquire (signals image-available)
    //    out-of-date: recreate and return WITHOUT touching the fence or index
    // 2) reset fence (only once we will submit) -> record
    // 3) submit: wait image-available @ COLOR_ATTACHMENT_OUTPUT,
    //    signal render-finished + slot fence
    // 4) present (waits render-finished); out-of-date/suboptimal/resize -> recreate
    // 5) advance slot index
    pub fn draw_frame<B, S>(
        &mut self,
        backend: &mut B,
        surface: &mut S,
        draws: &[DrawItem],
    ) -> Result<FrameStatus>
    where
        B: FrameBackend + ?Sized,
        S: SurfaceProvider + ?Sized,
    {
        let slots = backend.frame_slots();
        if self.frames_in_flight > slots {
            bail!(
                "frame ring is {} deep but the backend has {} slots",
                self.frames_in_flight,
                slots
            );
        }

        let size = surface.drawable_size();
        if size.is_empty() {
            if surface.was_resized() {
                surface.clear_resized();
                self.deferred |= RecreateCause::RESIZED;
            }
            return Ok(FrameStatus::Paused);
        }

        if !self.deferred.is_empty() {
            let cause = std::mem::take(&mut self.deferred);
            self.recreate(backend, surface, cause)?;
        }

        let slot = self.current_frame;

        // 1) Acquire
        backend.wait_for_slot(slot)?;
        let image_index = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    debug!(slot, image_index, "acquire: suboptimal, presenting anyway");
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                debug!(slot, "acquire: surface out of date, frame skipped");
                self.recreate(backend, surface, RecreateCause::OUT_OF_DATE)?;
                return Ok(FrameStatus::Skipped);
            }
        };

        // 2) Record
        backend.reset_slot_fence(slot)?;
        backend.record(slot, image_index, draws)?;

        // 3) Submit
        backend.submit(slot)?;

        // 4) Present
        let mut cause = match backend.present(slot, image_index)? {
            PresentOutcome::Presented => RecreateCause::empty(),
            PresentOutcome::Suboptimal => RecreateCause::SUBOPTIMAL,
            PresentOutcome::OutOfDate => RecreateCause::OUT_OF_DATE,
        };
        if surface.was_resized() {
            cause |= RecreateCause::RESIZED;
        }
        let recreated = if !cause.is_empty() && self.recreate(backend, surface, cause)? {
            cause
        } else {
            RecreateCause::empty()
        };

        self.current_frame = (slot + 1) % self.frames_in_flight;

        Ok(FrameStatus::Presented {
            image_index,
            recreated,
        })
    }

    /// Waits for the device to drain. Call before dropping per-frame objects.
    pub fn shutdown<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<()> {
        backend.wait_idle()
    }

    /// Returns false when the surface is zero-sized and the cause was
    /// deferred instead.
    fn recreate<B, S>(&mut self, backend: &mut B, surface: &mut S, cause: RecreateCause) -> Result<bool>
    where
        B: FrameBackend + ?Sized,
        S: SurfaceProvider + ?Sized,
    {
        surface.clear_resized();
        let size = surface.drawable_size();
        if size.is_empty() {
            debug!(?cause, "surface is zero-sized, deferring swapchain recreation");
            self.deferred |= cause;
            return Ok(false);
        }

        info!(
            ?cause,
            "recreating swapchain at {}x{}", size.width, size.height
        );
        backend.recreate_swapchain(size)?;
        Ok(true)
    }
}
