// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use tracing::{debug, info};
use vela_render::{RenderSize, SurfaceProvider};
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::ActiveEventLoop,
    keyboard::PhysicalKey,
    window::{Window, WindowId},
};

use crate::input::InputState;

/// Everything the app learns from window events, independent of the window
/// object itself. Size is not kept here: the window is asked directly.
#[derive(Debug, Default)]
pub struct SurfaceState {
    resized: bool,
    close_requested: bool,
    pub input: InputState,
}

impl SurfaceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sticky until [`clear_resized`](Self::clear_resized).
    pub fn was_resized(&self) -> bool {
        self.resized
    }

    pub fn clear_resized(&mut self) {
        self.resized = false;
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    /// Folds one window event into the state. Returns true when the event
    /// was consumed here.
    pub fn apply(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::Resized(new_size) => {
                self.resized = true;
                debug!("Resized → {}x{}", new_size.width, new_size.height);
                true
            }
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close_requested = true;
                true
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        ..
                    },
                ..
            } => {
                match state {
                    ElementState::Pressed => self.input.on_key_pressed(*code),
                    ElementState::Released => self.input.on_key_released(*code),
                }
                true
            }
            WindowEvent::MouseInput { state, button, .. } => {
                match state {
                    ElementState::Pressed => self.input.on_mouse_pressed((*button).into()),
                    ElementState::Released => self.input.on_mouse_released((*button).into()),
                }
                true
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.input
                    .on_cursor_moved(position.x as f32, position.y as f32);
                true
            }
            _ => false,
        }
    }
}

/// The OS window plus its [`SurfaceState`]. Drawable size is read from the
/// window on every query so it is never staler than the last event.
pub struct PlatformWindow {
    window: Window,
    pub state: SurfaceState,
}

impl PlatformWindow {
    pub fn new(event_loop: &ActiveEventLoop, title: &str, width: u32, height: u32) -> Result<Self> {
        let attrs = Window::default_attributes()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);
        let window = event_loop.create_window(attrs)?;

        let size = window.inner_size();
        info!("window created: {}x{}", size.width, size.height);

        Ok(PlatformWindow {
            window,
            state: SurfaceState::new(),
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn id(&self) -> WindowId {
        self.window.id()
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl SurfaceProvider for PlatformWindow {
    fn drawable_size(&self) -> RenderSize {
        let size = self.window.inner_size();
        RenderSize::new(size.width, size.height)
    }

    fn was_resized(&self) -> bool {
        self.state.was_resized()
    }

    fn clear_resized(&mut self) {
        self.state.clear_resized();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_sets_sticky_flag() {
        let mut state = SurfaceState::new();
        assert!(!state.was_resized());

        assert!(state.apply(&WindowEvent::Resized(PhysicalSize::new(1024, 0))));
        assert!(state.was_resized());

        state.apply(&WindowEvent::Focused(true));
        assert!(state.was_resized());

        state.clear_resized();
        assert!(!state.was_resized());
    }

    #[test]
    fn close_request_is_latched() {
        let mut state = SurfaceState::new();
        assert!(state.apply(&WindowEvent::CloseRequested));
        assert!(state.close_requested());
        state.apply(&WindowEvent::Focused(true));
        assert!(state.close_requested());
    }

    #[test]
    fn close_can_be_requested_from_code() {
        let mut state = SurfaceState::new();
        assert!(!state.close_requested());
        state.request_close();
        assert!(state.close_requested());
    }

    #[test]
    fn unrelated_events_are_not_consumed() {
        let mut state = SurfaceState::new();
        assert!(!state.apply(&WindowEvent::Focused(false)));
        assert!(!state.close_requested());
    }
}
