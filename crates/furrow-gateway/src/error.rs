use furrow_db::DbError;
use furrow_types::events::MessageErrorPayload;
use furrow_types::models::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("payload user does not match the connection")]
    Forbidden,

    #[error("send rate exceeded")]
    RateLimited,
}

impl From<DbError> for RelayError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Validation(v) => Self::Validation(v),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl RelayError {
    /// Stable code clients can switch on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_message",
            Self::Storage(_) => "storage_unavailable",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
        }
    }

    /// Client-facing payload. Storage details stay in the logs.
    pub fn to_payload(&self) -> MessageErrorPayload {
        let error = match self {
            Self::Validation(v) => v.to_string(),
            Self::Storage(_) => "Failed to send message".to_string(),
            Self::Forbidden => "Not allowed on this connection".to_string(),
            Self::RateLimited => "Sending too fast, try again shortly".to_string(),
        };
        MessageErrorPayload {
            error,
            code: self.code().to_string(),
        }
    }
}
