// SPDX-License-Identifier: CEPL-1.0
//! Window side of the engine: a winit window plus the surface state the frame
//! loop polls (drawable size, sticky resize flag, close request, input).
mod input;
mod window;

pub use input::{InputState, KeyCode, MouseButton};
pub use window::{PlatformWindow, SurfaceState};

pub use winit;
