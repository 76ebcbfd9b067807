//! The display capability consumed by the engine.

use std::ffi::CStr;

use ash::vk;

use crate::error::PlatformResult;
use crate::input::{ButtonAction, InputState, KeyCode, MouseButton};
use crate::surface::Surface;

type CursorPosFn = Box<dyn FnMut(f64, f64)>;
type MouseButtonFn = Box<dyn FnMut(MouseButton, ButtonAction)>;
type ScrollFn = Box<dyn FnMut(f64, f64)>;
type KeyFn = Box<dyn FnMut(KeyCode, ButtonAction)>;

/// Optional input callbacks invoked while events are pumped.
#[derive(Default)]
pub struct DisplayCallbacks {
    pub on_cursor_pos: Option<CursorPosFn>,
    pub on_mouse_button: Option<MouseButtonFn>,
    pub on_scroll: Option<ScrollFn>,
    pub on_key: Option<KeyFn>,
}

impl DisplayCallbacks {
    pub fn cursor_pos(&mut self, x: f64, y: f64) {
        if let Some(callback) = self.on_cursor_pos.as_mut() {
            callback(x, y);
        }
    }

    pub fn mouse_button(&mut self, button: MouseButton, action: ButtonAction) {
        if let Some(callback) = self.on_mouse_button.as_mut() {
            callback(button, action);
        }
    }

    pub fn scroll(&mut self, dx: f64, dy: f64) {
        if let Some(callback) = self.on_scroll.as_mut() {
            callback(dx, dy);
        }
    }

    pub fn key(&mut self, key: KeyCode, action: ButtonAction) {
        if let Some(callback) = self.on_key.as_mut() {
            callback(key, action);
        }
    }
}

/// A window the engine can present to.
pub trait Display {
    /// Opens the window.
    fn init(&mut self, title: &str, extent: vk::Extent2D) -> PlatformResult<()>;

    /// Instance extensions needed to create a surface for this display.
    fn required_extensions(&self) -> PlatformResult<Vec<&'static CStr>>;

    /// Creates a presentation surface. The instance must outlive it.
    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance)
    -> PlatformResult<Surface>;

    fn should_close(&self) -> bool;

    /// Processes pending window events without blocking.
    fn poll_events(&mut self);

    /// Current drawable size in pixels.
    fn resolution(&self) -> vk::Extent2D;

    fn callbacks_mut(&mut self) -> &mut DisplayCallbacks;

    fn input(&self) -> &InputState;

    /// Returns true once after the drawable size changed.
    fn take_resized(&mut self) -> bool {
        false
    }
}
