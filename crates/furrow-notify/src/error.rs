use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The push service no longer knows this subscription (HTTP 404/410)
    #[error("subscription gone")]
    Gone,

    #[error("rejected with status {0}")]
    Rejected(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not build notification: {0}")]
    Build(String),

    #[error("lookup failed: {0}")]
    Lookup(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for DeliveryError {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<lettre::error::Error> for DeliveryError {
    fn from(e: lettre::error::Error) -> Self {
        Self::Build(e.to_string())
    }
}

impl From<lettre::address::AddressError> for DeliveryError {
    fn from(e: lettre::address::AddressError) -> Self {
        Self::Build(e.to_string())
    }
}
