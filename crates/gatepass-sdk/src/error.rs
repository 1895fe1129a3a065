use thiserror::Error;

pub type Result<T> = std::result::Result<T, SdkError>;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(#[from] gatepass_net::NetError),

    #[error("Gate server error: {0}")]
    Server(String),

    #[error("Invalid ticket payload: {0}")]
    InvalidPayload(String),

    /// Retries exhausted. The scan outcome is unknown, not negative.
    #[error("Verification unavailable: {0}")]
    VerificationUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
