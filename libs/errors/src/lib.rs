//! Unified error handling for mbsrv services and tools
//!
//! Service crates keep their own narrow error enums and convert into
//! [`ServiceError`] at the binary boundary, so `main` only ever deals with
//! one error type and one exit-code mapping.

use thiserror::Error;

// ============================================================================
// ServiceError - Main error type
// ============================================================================

/// Main error type for all mbsrv binaries
#[derive(Debug, Error)]
pub enum ServiceError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Network Errors
    // ======================================
    #[error("Failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ======================================
    // Runtime Errors
    // ======================================
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using ServiceError
pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Process exit code for this error when it terminates a binary
    ///
    /// Follows the BSD `sysexits.h` convention so supervisors can tell a bad
    /// configuration from a port that is already taken.
    pub fn exit_code(&self) -> i32 {
        match self {
            // EX_CONFIG
            Self::Configuration(_) | Self::InvalidConfig { .. } => 78,

            // EX_DATAERR
            Self::Serialization(_) => 65,

            // EX_UNAVAILABLE
            Self::Bind { .. } => 69,

            // EX_IOERR
            Self::Io(_) => 74,

            // EX_SOFTWARE
            Self::Internal(_) => 70,
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
