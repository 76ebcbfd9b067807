//! RHI-specific error types.

use ash::vk;
use thiserror::Error;
use venus_core::{BaseKind, ErrorCode, SubKind};

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No physical device satisfies the requirements
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// A requested mode, format, layer or file is not available
    #[error("Not found: {0}")]
    NotFound(String),

    /// A required instance layer or extension is missing
    #[error("Missing extension: {0}")]
    MissingExtension(String),

    /// Reading a file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed SPIR-V or shader module creation failure
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// The allocation is already mapped by a live `ScopedMap`
    #[error("Allocation '{0}' is already mapped")]
    AlreadyMapped(String),

    /// Memory could not be obtained for a resource
    #[error("Bad allocation: {0}")]
    BadAllocation(String),

    /// The swapchain no longer matches the surface and must be recreated
    #[error("Swapchain is out of date")]
    OutOfDate,

    /// Surface creation or query error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain creation error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid argument or handle
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// A classified failure without further detail
    #[error("{0}")]
    Code(#[from] ErrorCode),
}

impl RhiError {
    /// Classifies this error in the engine-wide taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::VulkanError(result) => vk_result_code(*result),
            Self::LoadingError(_) => ErrorCode::new(BaseKind::Unknown, SubKind::IncompatibleApi),
            Self::AllocatorError(_) | Self::BadAllocation(_) => ErrorCode::BAD_ALLOCATION,
            Self::NoSuitableGpu => ErrorCode::new(BaseKind::Unknown, SubKind::NotFound),
            Self::NotFound(_) => ErrorCode::NOT_FOUND,
            Self::MissingExtension(_) => ErrorCode::new(BaseKind::Unknown, SubKind::ExtError),
            Self::Io(_) | Self::ShaderError(_) => ErrorCode::IO_ERROR,
            Self::AlreadyMapped(_) | Self::InvalidInput(_) => ErrorCode::CHECK_ERROR,
            Self::OutOfDate => ErrorCode::new(BaseKind::Custom, SubKind::VkError),
            Self::SurfaceError(_) | Self::SwapchainError(_) | Self::PipelineError(_) => {
                ErrorCode::new(BaseKind::Unknown, SubKind::VkError)
            }
            Self::Code(code) => *code,
        }
    }

    /// Returns `true` for the recoverable "recreate the swapchain" condition.
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self,
            Self::OutOfDate | Self::VulkanError(vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }

    /// Returns `true` if a descriptor pool ran dry and another pool may succeed.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(
            self,
            Self::VulkanError(vk::Result::ERROR_FRAGMENTED_POOL)
                | Self::VulkanError(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
        )
    }
}

/// Maps a raw Vulkan result onto the taxonomy.
pub fn vk_result_code(result: vk::Result) -> ErrorCode {
    match result {
        vk::Result::SUCCESS => ErrorCode::OK,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY
        | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        | vk::Result::ERROR_FRAGMENTED_POOL
        | vk::Result::ERROR_OUT_OF_POOL_MEMORY
        | vk::Result::ERROR_FRAGMENTATION
        | vk::Result::ERROR_TOO_MANY_OBJECTS => ErrorCode::BAD_ALLOCATION,
        vk::Result::ERROR_INCOMPATIBLE_DRIVER => {
            ErrorCode::new(BaseKind::Unknown, SubKind::IncompatibleApi)
        }
        vk::Result::ERROR_LAYER_NOT_PRESENT | vk::Result::ERROR_EXTENSION_NOT_PRESENT => {
            ErrorCode::new(BaseKind::Unknown, SubKind::ExtError)
        }
        vk::Result::ERROR_FORMAT_NOT_SUPPORTED | vk::Result::ERROR_FEATURE_NOT_PRESENT => {
            ErrorCode::NOT_FOUND
        }
        vk::Result::ERROR_OUT_OF_DATE_KHR => ErrorCode::new(BaseKind::Custom, SubKind::VkError),
        _ => ErrorCode::new(BaseKind::Unknown, SubKind::VkError),
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
