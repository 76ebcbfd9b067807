//! Frame orchestration for Venus.
//!
//! - [`FrameRing`]: per-slot synchronization and the frame state machine
//! - [`GraphicsDevice`]: device, allocator, swapchain and frame ring together
//! - [`ImmediateSubmit`], [`BufferWriter`], [`ImageWriter`]: blocking uploads
//! - [`Rasterizer`]: material-sorted draw recording
//! - [`Engine`]: the process-wide engine driven by a [`venus_platform::Display`]

pub mod config;
pub mod engine;
pub mod error;
pub mod frame_ring;
pub mod graphics_device;
pub mod immediate;
pub mod material;
pub mod rasterizer;
pub mod render_object;
pub mod staging;

pub use config::EngineConfig;
pub use engine::{checkerboard, Engine, Frame, Globals, SceneData};
pub use error::{RenderError, RenderResult};
pub use frame_ring::{slot_index, FrameOp, FrameRing, FrameSlot, FrameState};
pub use graphics_device::{GraphicsDevice, GraphicsDeviceConfig};
pub use immediate::ImmediateSubmit;
pub use material::{Material, MaterialInstance};
pub use rasterizer::{RasterCommand, RasterMaterial, RasterObject, Rasterizer};
pub use render_object::{Bounds, MeshPushConstants, PushConstantBlock, RenderObject};
pub use staging::{
    create_buffer_with_data, download_buffer, download_image_level, BufferWriter, ImageWriter,
};
