// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other(u16),
}

impl From<winit::event::MouseButton> for MouseButton {
    fn from(button: winit::event::MouseButton) -> Self {
        use winit::event::MouseButton as W;
        match button {
            W::Left => MouseButton::Left,
            W::Right => MouseButton::Right,
            W::Middle => MouseButton::Middle,
            W::Back => MouseButton::Other(3),
            W::Forward => MouseButton::Other(4),
            W::Other(n) => MouseButton::Other(n),
        }
    }
}

/// Held keys and buttons plus edge-triggered presses since the last
/// [`begin_frame`](InputState::begin_frame).
#[derive(Debug, Default)]
pub struct InputState {
    held_keys: HashSet<KeyCode>,
    pressed_keys: HashSet<KeyCode>,
    held_buttons: HashSet<MouseButton>,
    cursor: (f32, f32),
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_frame(&mut self) {
        self.pressed_keys.clear();
    }

    pub fn on_key_pressed(&mut self, key: KeyCode) {
        // key repeat arrives as further presses while held
        if self.held_keys.insert(key) {
            self.pressed_keys.insert(key);
        }
    }

    pub fn on_key_released(&mut self, key: KeyCode) {
        self.held_keys.remove(&key);
    }

    pub fn on_mouse_pressed(&mut self, button: MouseButton) {
        self.held_buttons.insert(button);
    }

    pub fn on_mouse_released(&mut self, button: MouseButton) {
        self.held_buttons.remove(&button);
    }

    pub fn on_cursor_moved(&mut self, x: f32, y: f32) {
        self.cursor = (x, y);
    }

    pub fn is_key_held(&self, key: KeyCode) -> bool {
        self.held_keys.contains(&key)
    }

    pub fn was_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    pub fn is_mouse_held(&self, button: MouseButton) -> bool {
        self.held_buttons.contains(&button)
    }

    pub fn cursor(&self) -> (f32, f32) {
        self.cursor
    }
}
