//! Error types for the scale set boundary.

use thiserror::Error;

pub type CloudResult<T> = Result<T, CloudError>;

#[derive(Debug, Clone, Error)]
pub enum CloudError {
    /// The role assignment backing this call has not propagated yet.
    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("platform error {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl CloudError {
    pub fn is_authorization_failed(&self) -> bool {
        matches!(self, CloudError::AuthorizationFailed(_))
    }
}
