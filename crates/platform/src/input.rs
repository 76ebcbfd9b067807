//! Input handling for keyboard and mouse.

use std::collections::HashSet;
use std::hash::Hash;

pub use winit::keyboard::KeyCode;

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
    Other(u16),
}

impl From<winit::event::MouseButton> for MouseButton {
    fn from(button: winit::event::MouseButton) -> Self {
        match button {
            winit::event::MouseButton::Left => Self::Left,
            winit::event::MouseButton::Right => Self::Right,
            winit::event::MouseButton::Middle => Self::Middle,
            winit::event::MouseButton::Back => Self::Back,
            winit::event::MouseButton::Forward => Self::Forward,
            winit::event::MouseButton::Other(id) => Self::Other(id),
        }
    }
}

/// Whether a key or button went down or up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Press,
    Release,
}

impl From<winit::event::ElementState> for ButtonAction {
    fn from(state: winit::event::ElementState) -> Self {
        match state {
            winit::event::ElementState::Pressed => Self::Press,
            winit::event::ElementState::Released => Self::Release,
        }
    }
}

/// Held / pressed-this-frame / released-this-frame sets for one kind of button.
#[derive(Debug)]
struct ButtonSet<T> {
    held: HashSet<T>,
    pressed: HashSet<T>,
    released: HashSet<T>,
}

impl<T> Default for ButtonSet<T> {
    fn default() -> Self {
        Self {
            held: HashSet::new(),
            pressed: HashSet::new(),
            released: HashSet::new(),
        }
    }
}

impl<T: Copy + Eq + Hash> ButtonSet<T> {
    fn apply(&mut self, button: T, action: ButtonAction) {
        match action {
            // Key repeat re-sends Press; only the first one counts.
            ButtonAction::Press => {
                if self.held.insert(button) {
                    self.pressed.insert(button);
                }
            }
            ButtonAction::Release => {
                if self.held.remove(&button) {
                    self.released.insert(button);
                }
            }
        }
    }

    fn begin_frame(&mut self) {
        self.pressed.clear();
        self.released.clear();
    }
}

/// Accumulated keyboard and mouse state, fed by the display's event pump.
#[derive(Debug, Default)]
pub struct InputState {
    keys: ButtonSet<KeyCode>,
    buttons: ButtonSet<MouseButton>,
    cursor: (f64, f64),
    cursor_delta: (f64, f64),
    scroll: (f64, f64),
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears per-frame state. Call once per frame before pumping events.
    pub fn begin_frame(&mut self) {
        self.keys.begin_frame();
        self.buttons.begin_frame();
        self.cursor_delta = (0.0, 0.0);
        self.scroll = (0.0, 0.0);
    }

    pub fn on_key(&mut self, key: KeyCode, action: ButtonAction) {
        self.keys.apply(key, action);
    }

    pub fn on_mouse_button(&mut self, button: MouseButton, action: ButtonAction) {
        self.buttons.apply(button, action);
    }

    /// Records a cursor position; the delta accumulates across the frame.
    pub fn on_cursor_pos(&mut self, x: f64, y: f64) {
        self.cursor_delta.0 += x - self.cursor.0;
        self.cursor_delta.1 += y - self.cursor.1;
        self.cursor = (x, y);
    }

    pub fn on_scroll(&mut self, dx: f64, dy: f64) {
        self.scroll.0 += dx;
        self.scroll.1 += dy;
    }

    pub fn is_key_down(&self, key: KeyCode) -> bool {
        self.keys.held.contains(&key)
    }

    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.keys.pressed.contains(&key)
    }

    pub fn is_key_released(&self, key: KeyCode) -> bool {
        self.keys.released.contains(&key)
    }

    pub fn is_mouse_down(&self, button: MouseButton) -> bool {
        self.buttons.held.contains(&button)
    }

    pub fn is_mouse_pressed(&self, button: MouseButton) -> bool {
        self.buttons.pressed.contains(&button)
    }

    pub fn cursor_position(&self) -> (f64, f64) {
        self.cursor
    }

    pub fn cursor_delta(&self) -> (f64, f64) {
        self.cursor_delta
    }

    pub fn scroll_delta(&self) -> (f64, f64) {
        self.scroll
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_press_and_release_edges() {
        let mut input = InputState::new();
        input.on_key(KeyCode::KeyW, ButtonAction::Press);
        assert!(input.is_key_down(KeyCode::KeyW));
        assert!(input.is_key_pressed(KeyCode::KeyW));

        input.begin_frame();
        // Repeat while held does not count as a new press.
        input.on_key(KeyCode::KeyW, ButtonAction::Press);
        assert!(input.is_key_down(KeyCode::KeyW));
        assert!(!input.is_key_pressed(KeyCode::KeyW));

        input.on_key(KeyCode::KeyW, ButtonAction::Release);
        assert!(!input.is_key_down(KeyCode::KeyW));
        assert!(input.is_key_released(KeyCode::KeyW));
    }

    #[test]
    fn test_release_without_press_is_ignored() {
        let mut input = InputState::new();
        input.on_mouse_button(MouseButton::Left, ButtonAction::Release);
        assert!(!input.is_mouse_down(MouseButton::Left));
        input.on_mouse_button(MouseButton::Left, ButtonAction::Press);
        assert!(input.is_mouse_pressed(MouseButton::Left));
    }

    #[test]
    fn test_cursor_and_scroll_accumulate() {
        let mut input = InputState::new();
        input.on_cursor_pos(10.0, 10.0);
        input.begin_frame();
        input.on_cursor_pos(15.0, 12.0);
        input.on_cursor_pos(20.0, 8.0);
        input.on_scroll(0.0, 1.0);
        input.on_scroll(0.0, 2.0);

        assert_eq!(input.cursor_position(), (20.0, 8.0));
        assert_eq!(input.cursor_delta(), (10.0, -2.0));
        assert_eq!(input.scroll_delta(), (0.0, 3.0));

        input.begin_frame();
        assert_eq!(input.cursor_delta(), (0.0, 0.0));
        assert_eq!(input.scroll_delta(), (0.0, 0.0));
    }

    #[test]
    fn test_mouse_button_conversion() {
        assert_eq!(
            MouseButton::from(winit::event::MouseButton::Other(7)),
            MouseButton::Other(7)
        );
        assert_eq!(
            ButtonAction::from(winit::event::ElementState::Released),
            ButtonAction::Release
        );
    }
}
