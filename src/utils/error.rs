//! Error types and handling
//!
//! Common error types used across the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::capture::SourceKind;

/// Stage of a conversion that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversionStage {
    Trim,
    Crop,
    Transcode,
    FrameSample,
    Download,
}

impl fmt::Display for ConversionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversionStage::Trim => "trim",
            ConversionStage::Crop => "crop",
            ConversionStage::Transcode => "transcode",
            ConversionStage::FrameSample => "frame sample",
            ConversionStage::Download => "download",
        };
        f.write_str(name)
    }
}

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Device absent: {0}")]
    DeviceAbsent(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("Timed out acquiring {kind} after {timeout_ms}ms")]
    AcquisitionTimeout { kind: SourceKind, timeout_ms: u64 },

    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Encoding failed: {0}")]
    EncodeFailure(String),

    #[error("Conversion failed during {stage}: {reason}")]
    ConversionFailure {
        stage: ConversionStage,
        reason: String,
    },

    #[error("Invalid edit parameters: {0}")]
    InvalidEditParameters(String),

    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Flat error classification shared with the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    DeviceAbsent,
    PermissionDenied,
    DeviceBusy,
    AcquisitionTimeout,
    UnsupportedEncoding,
    EncodeFailure,
    ConversionFailure,
    InvalidEditParameters,
    PreconditionViolation,
    Io,
}

impl AppError {
    pub fn conversion(stage: ConversionStage, reason: impl Into<String>) -> Self {
        AppError::ConversionFailure {
            stage,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::DeviceAbsent(_) => ErrorKind::DeviceAbsent,
            AppError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            AppError::DeviceBusy(_) => ErrorKind::DeviceBusy,
            AppError::AcquisitionTimeout { .. } => ErrorKind::AcquisitionTimeout,
            AppError::UnsupportedEncoding(_) => ErrorKind::UnsupportedEncoding,
            AppError::EncodeFailure(_) => ErrorKind::EncodeFailure,
            AppError::ConversionFailure { .. } => ErrorKind::ConversionFailure,
            AppError::InvalidEditParameters(_) => ErrorKind::InvalidEditParameters,
            AppError::PreconditionViolation(_) => ErrorKind::PreconditionViolation,
            AppError::Io(_) | AppError::Serialization(_) => ErrorKind::Io,
        }
    }

    /// Capture failures can be retried with the same capture spec.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DeviceAbsent
                | ErrorKind::PermissionDenied
                | ErrorKind::DeviceBusy
                | ErrorKind::AcquisitionTimeout
        )
    }
}

/// Error response for the host
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match error.kind() {
            ErrorKind::DeviceAbsent => "DEVICE_ABSENT",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::DeviceBusy => "DEVICE_BUSY",
            ErrorKind::AcquisitionTimeout => "ACQUISITION_TIMEOUT",
            ErrorKind::UnsupportedEncoding => "UNSUPPORTED_ENCODING",
            ErrorKind::EncodeFailure => "ENCODE_FAILURE",
            ErrorKind::ConversionFailure => "CONVERSION_FAILURE",
            ErrorKind::InvalidEditParameters => "INVALID_EDIT_PARAMETERS",
            ErrorKind::PreconditionViolation => "PRECONDITION_VIOLATION",
            ErrorKind::Io => "IO_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            retryable: error.is_retryable(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
