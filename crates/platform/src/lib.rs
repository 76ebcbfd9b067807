//! Display capability for the Venus engine.
//!
//! - [`Display`]: the trait the engine drives (window, surface, events)
//! - [`WinitDisplay`]: desktop implementation on winit
//! - [`Surface`]: RAII Vulkan surface
//! - [`InputState`]: keyboard and mouse state fed by the event pump

mod display;
mod error;
mod input;
mod surface;
mod window;

pub use display::{Display, DisplayCallbacks};
pub use error::{PlatformError, PlatformResult};
pub use input::{ButtonAction, InputState, KeyCode, MouseButton};
pub use surface::{required_extensions, Surface};
pub use window::WinitDisplay;
