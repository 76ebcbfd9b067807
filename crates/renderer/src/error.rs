//! Renderer error types.

use thiserror::Error;
use venus_core::{BaseKind, ErrorCode, SubKind};
use venus_platform::PlatformError;
use venus_rhi::RhiError;

use crate::frame_ring::{FrameOp, FrameState};

#[derive(Error, Debug)]
pub enum RenderError {
    /// Error from the Vulkan abstraction layer
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// The swapchain no longer matches the surface and must be rebuilt
    #[error("Swapchain out of date; resize requested")]
    ResizeRequested,

    /// A frame protocol call arrived in the wrong state
    #[error("{op} called in frame state {state}")]
    InvalidFrameState { op: FrameOp, state: FrameState },

    /// Error from the display
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RenderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Rhi(e) => e.code(),
            Self::ResizeRequested => ErrorCode::new(BaseKind::Custom, SubKind::VkError),
            Self::InvalidFrameState { .. } => ErrorCode::CHECK_ERROR,
            Self::Platform(e) => e.code(),
            Self::Config(_) => ErrorCode::new(BaseKind::InvalidInput, SubKind::CheckError),
        }
    }

    /// True for conditions a resize recovers from.
    pub fn is_resize(&self) -> bool {
        match self {
            Self::ResizeRequested => true,
            Self::Rhi(e) => e.is_out_of_date(),
            _ => false,
        }
    }
}

impl From<ErrorCode> for RenderError {
    fn from(code: ErrorCode) -> Self {
        Self::Rhi(RhiError::Code(code))
    }
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_error_codes() {
        assert_eq!(
            RenderError::InvalidFrameState {
                op: FrameOp::Submit,
                state: FrameState::Idle
            }
            .code(),
            ErrorCode::CHECK_ERROR
        );
        assert_eq!(
            RenderError::Rhi(RhiError::NotFound("mesh.vert.spv".into())).code(),
            ErrorCode::NOT_FOUND
        );
    }

    #[test]
    fn test_resize_detection() {
        assert!(RenderError::ResizeRequested.is_resize());
        assert!(RenderError::Rhi(RhiError::OutOfDate).is_resize());
        assert!(!RenderError::Config("bad".into()).is_resize());
    }

    #[test]
    fn test_error_code_converts() {
        let custom = ErrorCode::new(BaseKind::Custom, SubKind::CheckError);
        let result: RenderResult<()> = custom.into_result(());
        assert!(result.is_err());

        let err = RenderError::from(custom);
        assert_eq!(err.code(), custom);
    }

    #[test]
    fn test_invalid_state_message() {
        let err = RenderError::InvalidFrameState {
            op: FrameOp::EndRecord,
            state: FrameState::Acquired,
        };
        assert_eq!(err.to_string(), "end_record called in frame state ACQUIRED");
    }
}
