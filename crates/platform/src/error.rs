//! Platform error types.

use ash::vk;
use thiserror::Error;
use venus_core::{BaseKind, ErrorCode, SubKind};

#[derive(Error, Debug)]
pub enum PlatformError {
    /// The winit event loop could not be created or pumped
    #[error("Event loop error: {0}")]
    EventLoop(String),

    /// Window creation failed
    #[error("Window error: {0}")]
    Window(String),

    /// The display was used before `init`
    #[error("Display is not initialized")]
    NotInitialized,

    /// Raw window or display handle unavailable
    #[error("Window handle error: {0}")]
    Handle(#[from] raw_window_handle::HandleError),

    /// Surface creation or extension enumeration failed
    #[error("Surface error: {0}")]
    Surface(#[from] vk::Result),

    /// A classified failure without further detail
    #[error("{0}")]
    Code(#[from] ErrorCode),
}

impl PlatformError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::EventLoop(_) | Self::Window(_) => ErrorCode::new(BaseKind::Unknown, SubKind::None),
            Self::NotInitialized => ErrorCode::CHECK_ERROR,
            Self::Handle(_) => ErrorCode::new(BaseKind::Unknown, SubKind::NotFound),
            Self::Surface(vk::Result::ERROR_EXTENSION_NOT_PRESENT) => {
                ErrorCode::new(BaseKind::Unknown, SubKind::ExtError)
            }
            Self::Surface(_) => ErrorCode::new(BaseKind::Unknown, SubKind::VkError),
            Self::Code(code) => *code,
        }
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_error_codes() {
        assert_eq!(PlatformError::NotInitialized.code(), ErrorCode::CHECK_ERROR);
        assert_eq!(
            PlatformError::Surface(vk::Result::ERROR_EXTENSION_NOT_PRESENT).code().sub,
            SubKind::ExtError
        );
        assert_eq!(
            PlatformError::Surface(vk::Result::ERROR_SURFACE_LOST_KHR).code().sub,
            SubKind::VkError
        );
    }

    #[test]
    fn test_code_round_trips() {
        fn fails() -> PlatformResult<()> {
            Err(ErrorCode::NOT_FOUND)?
        }
        assert_eq!(fails().unwrap_err().code(), ErrorCode::NOT_FOUND);
    }
}
