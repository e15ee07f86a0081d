use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Checked before the first mutating call; nothing was changed.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("invalid plan: {0}")]
    Plan(#[from] fedtrust_domain::DomainError),

    #[error("driver error: {0}")]
    Driver(#[from] fedtrust_driver::DriverError),

    #[error("internal error: {0}")]
    Internal(String),
}
