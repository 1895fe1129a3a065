use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetError>;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout, refused connection, or a 5xx answer. Safe to retry.
    #[error("Server unavailable: {0}")]
    Unavailable(String),

    /// The server answered and refused the request.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl NetError {
    pub fn is_transient(&self) -> bool {
        matches!(self, NetError::Unavailable(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            NetError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
