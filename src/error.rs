use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShareError {
    #[error("Buffer too small: needed {needed} bytes, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Unknown data type tag: {0}")]
    UnknownDataType(u8),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("Invalid property key: {0}")]
    InvalidPropertyKey(String),

    #[error("Invalid value string: {0}")]
    InvalidValueString(String),

    #[error("Invalid UTF-8 in string payload")]
    InvalidUtf8,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Not connected")]
    NotConnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, ShareError>;
