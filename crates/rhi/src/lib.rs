//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides RAII wrappers over Vulkan using the `ash` crate.
//! It handles:
//! - Instance, physical device and logical device creation
//! - Memory allocation with scoped mapping
//! - Swapchain management
//! - Command buffer recording and synchronization primitives
//! - Buffers, images and samplers
//! - Descriptor layouts, growable descriptor allocation and batched writes
//! - Shader loading and graphics pipelines for dynamic rendering

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod descriptor_allocator;
pub mod descriptor_writer;
pub mod device;
pub mod image;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod rendering;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{vk_result_code, RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
