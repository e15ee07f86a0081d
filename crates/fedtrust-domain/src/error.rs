use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid subscription id '{0}': expected a GUID")]
    InvalidSubscriptionId(String),

    #[error("invalid federated credential name '{0}'")]
    InvalidCredentialName(String),

    #[error("invalid issuer '{0}': must be an https:// URL")]
    InvalidIssuer(String),

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("secret validity must be at least one year, got {0}")]
    InvalidValidity(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
