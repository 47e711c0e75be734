//! Error types for tagbox-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use std::path::PathBuf;
use std::time::Duration;
use tagbox_common::FailureKind;
use thiserror::Error;

use crate::bus::BusError;

/// Main error type for tagbox-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared configuration/IO errors from tagbox-common
    #[error(transparent)]
    Common(#[from] tagbox_common::Error),

    /// File I/O errors outside the medium
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bus driver errors
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Removable medium not present or not mounted
    #[error("Storage medium unavailable")]
    MediumUnavailable,

    /// Track could not be opened on the medium
    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Track path rejected before reaching the medium
    #[error("Invalid track path: {0}")]
    InvalidPath(String),

    /// Read failure on a present medium
    #[error("Read error on {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Decoder never raised its data-request line
    #[error("Decoder not ready after {waited:?} during {operation}")]
    DecoderTimeout {
        operation: &'static str,
        waited: Duration,
    },

    /// Decoder answered with an implausible status register
    #[error("Decoder not responding (status register {status:#06x})")]
    DecoderNotResponding { status: u16 },

    /// Library root missing on the host
    #[error("Library root not found: {0}")]
    LibraryRoot(PathBuf),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify for status reporting
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::MediumUnavailable => FailureKind::MediumUnavailable,
            Error::OpenFailed { .. } | Error::InvalidPath(_) => FailureKind::OpenFailed,
            Error::Read { .. } => FailureKind::ReadFailed,
            Error::DecoderTimeout { .. } | Error::DecoderNotResponding { .. } => {
                FailureKind::DecoderTimeout
            }
            _ => FailureKind::Transport,
        }
    }
}

/// Convenience Result type using tagbox-ap Error
pub type Result<T> = std::result::Result<T, Error>;
