//! The engine-wide error taxonomy.
//!
//! Every failure in Venus can be classified as a `(base, sub)` pair. Crate
//! error enums carry the concrete cause and expose a `code()` that maps it
//! onto an [`ErrorCode`]; the code is what gets logged and what callers match
//! on when they only care about the category.

use std::fmt;

use thiserror::Error;

/// Broad category of a failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BaseKind {
    /// Success.
    #[default]
    NoError,
    /// Cause could not be classified.
    Unknown,
    /// Host, device or pool memory could not be obtained.
    BadAllocation,
    /// The caller passed something the operation cannot accept.
    InvalidInput,
    /// Engine-defined condition (out-of-date swapchain, resize request, ...).
    Custom,
}

/// Refinement of a [`BaseKind`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SubKind {
    #[default]
    None,
    /// A Vulkan call returned an error code.
    VkError,
    /// Loader or driver does not provide the required API version.
    IncompatibleApi,
    /// A required object, file, mode or device was not found.
    NotFound,
    /// A required layer or extension is missing.
    ExtError,
    /// A precondition check failed.
    CheckError,
    /// Reading or parsing external data failed.
    IoError,
}

impl BaseKind {
    /// Short uppercase name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoError => "NO_ERROR",
            Self::Unknown => "UNKNOWN",
            Self::BadAllocation => "BAD_ALLOCATION",
            Self::InvalidInput => "INVALID_INPUT",
            Self::Custom => "CUSTOM",
        }
    }
}

impl SubKind {
    /// Short uppercase name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::VkError => "VK_ERROR",
            Self::IncompatibleApi => "INCOMPATIBLE_API",
            Self::NotFound => "NOT_FOUND",
            Self::ExtError => "EXT_ERROR",
            Self::CheckError => "CHECK_ERROR",
            Self::IoError => "IO_ERROR",
        }
    }
}

/// A `(base, sub)` error classification.
///
/// `ErrorCode::OK` is the only value that converts to `true`.
///
/// ```
/// use venus_core::{BaseKind, ErrorCode, SubKind};
///
/// let code = ErrorCode::new(BaseKind::InvalidInput, SubKind::IoError);
/// assert!(!bool::from(code));
/// assert!(code.check().is_err());
/// assert!(ErrorCode::OK.check().is_ok());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Error)]
#[error("{base}/{sub}")]
pub struct ErrorCode {
    pub base: BaseKind,
    pub sub: SubKind,
}

impl ErrorCode {
    pub const OK: Self = Self::new(BaseKind::NoError, SubKind::None);
    pub const BAD_ALLOCATION: Self = Self::new(BaseKind::BadAllocation, SubKind::VkError);
    pub const NOT_FOUND: Self = Self::new(BaseKind::InvalidInput, SubKind::NotFound);
    pub const IO_ERROR: Self = Self::new(BaseKind::InvalidInput, SubKind::IoError);
    pub const CHECK_ERROR: Self = Self::new(BaseKind::InvalidInput, SubKind::CheckError);

    pub const fn new(base: BaseKind, sub: SubKind) -> Self {
        Self { base, sub }
    }

    /// Returns `true` if this code represents success.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.base == BaseKind::NoError
    }

    /// Converts the code into a `Result`, failing for anything but [`ErrorCode::OK`].
    pub fn check(self) -> Result<(), ErrorCode> {
        if self.is_ok() { Ok(()) } else { Err(self) }
    }

    /// Converts the code into `Ok(value)` on success, or into the caller's
    /// error type otherwise.
    pub fn into_result<T, E: From<ErrorCode>>(self, value: T) -> Result<T, E> {
        if self.is_ok() {
            Ok(value)
        } else {
            Err(E::from(self))
        }
    }
}

impl From<ErrorCode> for bool {
    fn from(code: ErrorCode) -> Self {
        code.is_ok()
    }
}

impl fmt::Display for BaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for SubKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_converts_to_true() {
        assert!(bool::from(ErrorCode::OK));
        assert!(ErrorCode::default().is_ok());
    }

    #[test]
    fn test_any_error_converts_to_false() {
        for base in [
            BaseKind::Unknown,
            BaseKind::BadAllocation,
            BaseKind::InvalidInput,
            BaseKind::Custom,
        ] {
            let code = ErrorCode::new(base, SubKind::None);
            assert!(!bool::from(code), "{base} should be an error");
        }
    }

    #[test]
    fn test_check() {
        assert_eq!(ErrorCode::OK.check(), Ok(()));
        assert_eq!(
            ErrorCode::NOT_FOUND.check(),
            Err(ErrorCode::new(BaseKind::InvalidInput, SubKind::NotFound))
        );
    }

    #[test]
    fn test_into_result() {
        let ok: Result<u32, ErrorCode> = ErrorCode::OK.into_result(7);
        assert_eq!(ok, Ok(7));

        let err: Result<u32, ErrorCode> = ErrorCode::IO_ERROR.into_result(7);
        assert_eq!(err, Err(ErrorCode::IO_ERROR));
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorCode::BAD_ALLOCATION.to_string(), "BAD_ALLOCATION/VK_ERROR");
        assert_eq!(ErrorCode::OK.to_string(), "NO_ERROR/NONE");
    }
}
