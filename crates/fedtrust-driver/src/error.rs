use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("required tooling missing: {0}")]
    ToolingMissing(String),

    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("{what}: status {status}: {message}")]
    Api {
        what: String,
        status: u16,
        message: String,
    },

    #[error("internal driver error: {0}")]
    Internal(String),
}

impl DriverError {
    /// True for failures caused by the operator's session rather than the
    /// directory (missing `az`, expired login, rejected token).
    pub fn is_session_error(&self) -> bool {
        match self {
            DriverError::ToolingMissing(_) | DriverError::Unauthenticated(_) => true,
            DriverError::Api { status, .. } => *status == 401,
            _ => false,
        }
    }
}
