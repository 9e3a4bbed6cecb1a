use thiserror::Error;

use crate::common::error::LpError::GenericError;

#[derive(Debug, Error)]
pub enum LpError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Pool error: {0}")]
    PoolError(#[from] zamek::Error),
    #[error("Version error: {0}")]
    VersionError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for LpError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<bincode::Error> for LpError {
    fn from(e: bincode::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<anyhow::Error> for LpError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}

impl From<toml::de::Error> for LpError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(GenericError(message))
}

impl From<String> for LpError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}

impl From<&str> for LpError {
    fn from(e: &str) -> Self {
        GenericError(e.to_string())
    }
}
