use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZmError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Journal error: {0}")]
    JournalError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<bincode::Error> for ZmError {
    fn from(e: bincode::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<String> for ZmError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}

impl From<&str> for ZmError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}
