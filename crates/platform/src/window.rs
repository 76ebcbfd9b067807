//! Winit-backed display.
//!
//! The engine owns the frame loop, so events are pumped with
//! `pump_app_events` instead of handing control to `EventLoop::run_app`.

use std::ffi::CStr;
use std::time::Duration;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowId};

use crate::display::{Display, DisplayCallbacks};
use crate::error::{PlatformError, PlatformResult};
use crate::input::{ButtonAction, InputState, MouseButton};
use crate::surface::{self, Surface};

/// Pump attempts while waiting for the platform to hand us a window.
const INIT_PUMP_ATTEMPTS: u32 = 200;
const INIT_PUMP_TIMEOUT: Duration = Duration::from_millis(5);

/// State mutated by winit callbacks.
struct DisplayState {
    title: String,
    requested: vk::Extent2D,
    window: Option<Window>,
    resolution: vk::Extent2D,
    resized: bool,
    should_close: bool,
    error: Option<String>,
    input: InputState,
    callbacks: DisplayCallbacks,
}

impl DisplayState {
    fn new() -> Self {
        Self {
            title: String::new(),
            requested: vk::Extent2D::default(),
            window: None,
            resolution: vk::Extent2D::default(),
            resized: false,
            should_close: false,
            error: None,
            input: InputState::new(),
            callbacks: DisplayCallbacks::default(),
        }
    }
}

impl ApplicationHandler for DisplayState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs = Window::default_attributes()
            .with_title(self.title.as_str())
            .with_inner_size(PhysicalSize::new(self.requested.width, self.requested.height))
            .with_resizable(true);

        match event_loop.create_window(attrs) {
            Ok(window) => {
                let size = window.inner_size();
                self.resolution = vk::Extent2D {
                    width: size.width,
                    height: size.height,
                };
                tracing::info!("Window created: {}x{}", size.width, size.height);
                self.window = Some(window);
            }
            Err(e) => {
                self.error = Some(e.to_string());
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                tracing::info!("Close requested");
                self.should_close = true;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                let extent = vk::Extent2D {
                    width: size.width,
                    height: size.height,
                };
                if extent != self.resolution {
                    tracing::debug!("Window resized: {}x{}", size.width, size.height);
                    self.resolution = extent;
                    self.resized = true;
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    let action = ButtonAction::from(event.state);
                    self.input.on_key(code, action);
                    self.callbacks.key(code, action);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.input.on_cursor_pos(position.x, position.y);
                self.callbacks.cursor_pos(position.x, position.y);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let button = MouseButton::from(button);
                let action = ButtonAction::from(state);
                self.input.on_mouse_button(button, action);
                self.callbacks.mouse_button(button, action);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let (dx, dy) = match delta {
                    MouseScrollDelta::LineDelta(x, y) => (x as f64, y as f64),
                    MouseScrollDelta::PixelDelta(pos) => (pos.x, pos.y),
                };
                self.input.on_scroll(dx, dy);
                self.callbacks.scroll(dx, dy);
            }
            _ => {}
        }
    }
}

/// A resizable desktop window driven by winit.
pub struct WinitDisplay {
    event_loop: Option<EventLoop<()>>,
    state: DisplayState,
}

impl WinitDisplay {
    pub fn new() -> Self {
        Self {
            event_loop: None,
            state: DisplayState::new(),
        }
    }

    pub fn window(&self) -> Option<&Window> {
        self.state.window.as_ref()
    }

    fn pump(&mut self, timeout: Duration) {
        let Some(event_loop) = self.event_loop.as_mut() else {
            return;
        };
        if let PumpStatus::Exit(code) = event_loop.pump_app_events(Some(timeout), &mut self.state) {
            tracing::debug!("Event loop exited with code {}", code);
            self.state.should_close = true;
        }
    }
}

impl Default for WinitDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for WinitDisplay {
    fn init(&mut self, title: &str, extent: vk::Extent2D) -> PlatformResult<()> {
        if self.event_loop.is_some() {
            return Ok(());
        }

        let event_loop = EventLoop::new().map_err(|e| PlatformError::EventLoop(e.to_string()))?;
        self.event_loop = Some(event_loop);
        self.state.title = title.to_owned();
        self.state.requested = extent;

        for _ in 0..INIT_PUMP_ATTEMPTS {
            self.pump(INIT_PUMP_TIMEOUT);
            if let Some(e) = self.state.error.take() {
                return Err(PlatformError::Window(e));
            }
            if self.state.window.is_some() {
                return Ok(());
            }
            if self.state.should_close {
                break;
            }
        }

        Err(PlatformError::Window(
            "event loop never resumed; no window was created".to_string(),
        ))
    }

    fn required_extensions(&self) -> PlatformResult<Vec<&'static CStr>> {
        let event_loop = self.event_loop.as_ref().ok_or(PlatformError::NotInitialized)?;
        surface::required_extensions(event_loop.display_handle()?.as_raw())
    }

    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> PlatformResult<Surface> {
        let window = self.state.window.as_ref().ok_or(PlatformError::NotInitialized)?;
        let display = window.display_handle()?.as_raw();
        let handle = window.window_handle()?.as_raw();

        // SAFETY: the window lives in self, and the engine destroys the
        // surface before the display.
        unsafe { Surface::from_raw(entry, instance, display, handle) }
    }

    fn should_close(&self) -> bool {
        self.state.should_close
    }

    fn poll_events(&mut self) {
        self.state.input.begin_frame();
        self.pump(Duration::ZERO);
    }

    fn resolution(&self) -> vk::Extent2D {
        self.state.resolution
    }

    fn callbacks_mut(&mut self) -> &mut DisplayCallbacks {
        &mut self.state.callbacks
    }

    fn input(&self) -> &InputState {
        &self.state.input
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_display() {
        let mut display = WinitDisplay::new();
        assert!(!display.should_close());
        assert!(display.window().is_none());
        assert_eq!(display.resolution(), vk::Extent2D::default());
        assert!(!display.take_resized());
        assert!(matches!(
            display.required_extensions(),
            Err(PlatformError::NotInitialized)
        ));
        // Pumping without an event loop is a no-op.
        display.poll_events();
    }
}
