//! mbsrv error types

use errors::ServiceError;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum MbSrvError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to bind {address}: {source}")]
    BindError {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid state: {0}")]
    StateError(String),
}

pub type Result<T> = std::result::Result<T, MbSrvError>;

impl From<MbSrvError> for ServiceError {
    fn from(err: MbSrvError) -> Self {
        match err {
            MbSrvError::ConfigError(msg) => ServiceError::Configuration(msg),
            MbSrvError::Store(e) => ServiceError::InvalidConfig {
                field: "tables".into(),
                reason: e.to_string(),
            },
            MbSrvError::BindError { address, source } => ServiceError::Bind {
                address,
                reason: source.to_string(),
            },
            MbSrvError::Io(e) => ServiceError::Io(e),
            MbSrvError::StateError(msg) => ServiceError::Internal(msg),
        }
    }
}
