//! Core error types
//!
//! Two result-code families: `GsError` for the buffer exchange side and
//! `DmError` for screen/display management. `Ok(..)` plays the role of the
//! `OK` code; every other outcome is one of these variants.

use thiserror::Error;

/// Buffer queue / surface errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GsError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("No buffer available")]
    NoBuffer,

    #[error("No entry: {0}")]
    NoEntry(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Invalid operation: {0}")]
    InvalidOperating(String),

    #[error("No consumer registered")]
    NoConsumer,

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Api failed: {0}")]
    ApiFailed(String),

    #[error("Platform error {code}: {message}")]
    Platform { code: i32, message: String },
}

impl GsError {
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    pub fn no_entry(msg: impl Into<String>) -> Self {
        Self::NoEntry(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    pub fn invalid_operating(msg: impl Into<String>) -> Self {
        Self::InvalidOperating(msg.into())
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    pub fn api_failed(msg: impl Into<String>) -> Self {
        Self::ApiFailed(msg.into())
    }

    pub fn platform(code: i32, msg: impl Into<String>) -> Self {
        Self::Platform { code, message: msg.into() }
    }

    /// Stable numeric code. `0` is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            GsError::InvalidArguments(_) => 40001000,
            GsError::NoBuffer => 40601000,
            GsError::NoEntry(_) => 40602000,
            GsError::OutOfRange(_) => 40603000,
            GsError::InvalidOperating(_) => 41001000,
            GsError::NoConsumer => 41002000,
            GsError::TypeError(_) => 41004000,
            GsError::ApiFailed(_) => 50001000,
            GsError::Platform { code, .. } => *code,
        }
    }

    /// Errors the caller can reasonably retry later (next frame, after a release).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GsError::NoBuffer | GsError::NoConsumer)
    }
}

impl From<std::io::Error> for GsError {
    fn from(err: std::io::Error) -> Self {
        GsError::platform(err.raw_os_error().unwrap_or(-1), err.to_string())
    }
}

/// Display management errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DmError {
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Null object: {0}")]
    NullPtr(String),

    #[error("Render service failed: {0}")]
    RenderServiceFailed(String),

    #[error("Invalid mode id: {0}")]
    InvalidModeId(u32),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Invalid calling or handle: {0}")]
    InvalidCalling(String),
}

impl DmError {
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }

    pub fn null_ptr(msg: impl Into<String>) -> Self {
        Self::NullPtr(msg.into())
    }

    pub fn render_service_failed(msg: impl Into<String>) -> Self {
        Self::RenderServiceFailed(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    pub fn code(&self) -> i32 {
        match self {
            DmError::NullPtr(_) => 120,
            DmError::InvalidParam(_) => 130,
            DmError::InvalidModeId(_) => 160,
            DmError::RenderServiceFailed(_) => 180,
            DmError::InvalidCalling(_) => 200,
            DmError::NotSupported(_) => 801,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, DmError::RenderServiceFailed(_))
    }
}

/// Result type for buffer operations
pub type GsResult<T> = std::result::Result<T, GsError>;

/// Result type for display management operations
pub type DmResult<T> = std::result::Result<T, DmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gs_error_codes() {
        assert_eq!(GsError::NoBuffer.code(), 40601000);
        assert_eq!(GsError::invalid_arguments("x").code(), 40001000);
        assert_eq!(GsError::platform(-12, "alloc").code(), -12);
    }

    #[test]
    fn test_gs_error_recoverable() {
        assert!(GsError::NoBuffer.is_recoverable());
        assert!(GsError::NoConsumer.is_recoverable());
        assert!(!GsError::invalid_arguments("bad seq").is_recoverable());
    }

    #[test]
    fn test_dm_error_display() {
        let err = DmError::invalid_param("screen 3");
        assert_eq!(err.to_string(), "Invalid parameter: screen 3");
        assert_eq!(err.code(), 130);
    }
}
