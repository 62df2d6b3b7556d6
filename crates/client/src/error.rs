use driveport_transfer::{TransferError, TransportError};

/// Errors from the Drive facade.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid access token")]
    InvalidToken,

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("{id} is a folder, not a file")]
    NotAFile { id: String },

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        ClientError::Transfer(err.into())
    }
}

impl ClientError {
    /// The transfer error underneath, if any.
    pub fn as_transfer(&self) -> Option<&TransferError> {
        match self {
            ClientError::Transfer(e) => Some(e),
            _ => None,
        }
    }
}
