// SPDX-License-Identifier: CEPL-1.0
mod draw;
mod frame;

pub use draw::{DrawItem, MaterialPass, MeshId, Vertex};
pub use frame::{
    AcquireOutcome, FrameBackend, FrameStatus, FrameSynchronizer, PresentOutcome, RecreateCause,
    MAX_FRAMES_IN_FLIGHT,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        RenderSize { width, height }
    }

    /// A minimized window reports a zero dimension; nothing can be presented to it.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// The window side of the frame loop: live drawable size plus a sticky resize flag.
pub trait SurfaceProvider {
    fn drawable_size(&self) -> RenderSize;
    fn was_resized(&self) -> bool;
    fn clear_resized(&mut self);
}
