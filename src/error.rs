//! Error types for the transfer descriptor agent.

use std::io;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, XferError>;

/// Errors that can occur in agent and descriptor operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum XferError {
    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Descriptor is not covered by any registered memory
    #[error("Memory not registered: {0}")]
    NotRegistered(String),

    /// Resource exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Memory allocation or pinning error
    #[error("Memory error: {0}")]
    MemoryError(String),

    /// Descriptor index outside of the list
    #[error("Index {index} out of range for list of {len} descriptors")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of descriptors in the list
        len: usize,
    },

    /// Descriptor list does not hold the expected number of entries
    #[error("Descriptor count mismatch: expected {expected}, got {actual}")]
    CountMismatch {
        /// Number of descriptors handed to the builder
        expected: usize,
        /// Number of descriptors in the built list
        actual: usize,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl XferError {
    /// Convert to an appropriate errno value, used as the process exit code
    #[inline]
    #[must_use]
    pub fn to_errno(&self) -> i32 {
        match *self {
            XferError::InvalidInput(_) | XferError::IndexOutOfRange { .. } => libc::EINVAL,
            XferError::NotFound(_) | XferError::NotRegistered(_) => libc::ENOENT,
            XferError::ResourceExhausted(_) => libc::ENOSPC,
            XferError::MemoryError(_) => libc::ENOMEM,
            XferError::IoError(ref e) => e.raw_os_error().unwrap_or(libc::EIO),
            XferError::CountMismatch { .. } | XferError::Config(_) => libc::EIO,
        }
    }
}
