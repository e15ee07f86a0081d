use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::DomainError;

// ── Well-known values ────────────────────────────────────────────────────────

/// Audience Azure AD expects on tokens presented for federated exchange.
pub const TOKEN_EXCHANGE_AUDIENCE: &str = "api://AzureADTokenExchange";

/// Printed in place of a client secret that already exists and can no longer
/// be read back from the directory.
pub const SECRET_NOT_RETRIEVABLE: &str = "<EXISTING_SECRET_NOT_RETRIEVABLE>";

/// Application ID of the Microsoft Graph first-party service principal.
pub const MICROSOFT_GRAPH_APP_ID: &str = "00000003-0000-0000-c000-000000000000";

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Azure subscription identifier, normalised to a lowercase hyphenated GUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ARM scope path for role assignments made at subscription level.
    pub fn scope(&self) -> String {
        format!("/subscriptions/{}", self.0)
    }
}

impl FromStr for SubscriptionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        uuid::Uuid::try_parse(trimmed)
            .map(|u| SubscriptionId(u.hyphenated().to_string()))
            .map_err(|_| DomainError::InvalidSubscriptionId(trimmed.to_string()))
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(s: impl Into<String>) -> Self {
        TenantId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application (client) ID of an app registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppId(pub String);

impl AppId {
    pub fn new(s: impl Into<String>) -> Self {
        AppId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directory object ID (application object, service principal, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn new(s: impl Into<String>) -> Self {
        ObjectId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workload subjects ────────────────────────────────────────────────────────

/// Subject claim Kubernetes puts in projected service-account tokens.
pub fn kubernetes_subject(namespace: &str, service_account: &str) -> String {
    format!("system:serviceaccount:{}:{}", namespace, service_account)
}

/// Assumed-role ARN pattern matching every session of an AWS IAM role.
pub fn aws_assumed_role_subject(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:sts::{}:assumed-role/{}/*", account_id, role_name)
}

// ── Credential strategies ────────────────────────────────────────────────────

/// OIDC trust statement registered on the application instead of a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedTrust {
    pub name: String,
    pub issuer: String,
    pub subject: String,
    pub audience: String,
}

impl FederatedTrust {
    /// Build a trust, validating every field. `audience` defaults to
    /// [`TOKEN_EXCHANGE_AUDIENCE`].
    pub fn new(
        name: impl Into<String>,
        issuer: impl Into<String>,
        subject: impl Into<String>,
        audience: Option<String>,
    ) -> Result<Self, DomainError> {
        let trust = FederatedTrust {
            name: name.into(),
            issuer: issuer.into(),
            subject: subject.into(),
            audience: audience.unwrap_or_else(|| TOKEN_EXCHANGE_AUDIENCE.to_string()),
        };
        trust.validate()?;
        Ok(trust)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if !is_valid_credential_name(&self.name) {
            return Err(DomainError::InvalidCredentialName(self.name.clone()));
        }
        let host = self.issuer.strip_prefix("https://").unwrap_or("");
        if host.is_empty() || host.starts_with('/') {
            return Err(DomainError::InvalidIssuer(self.issuer.clone()));
        }
        if self.subject.trim().is_empty() {
            return Err(DomainError::Empty { field: "subject" });
        }
        if self.audience.trim().is_empty() {
            return Err(DomainError::Empty { field: "audience" });
        }
        Ok(())
    }
}

/// Federated credential names: 3–120 chars of `[A-Za-z0-9_-]`, leading alphanumeric.
fn is_valid_credential_name(name: &str) -> bool {
    (3..=120).contains(&name.len())
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Client secret minted on the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretPolicy {
    /// Display name the secret is recorded under; also its idempotency key.
    pub display_name: String,
    pub validity_years: u32,
}

impl SecretPolicy {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.display_name.trim().is_empty() {
            return Err(DomainError::Empty { field: "secret display_name" });
        }
        if self.validity_years == 0 {
            return Err(DomainError::InvalidValidity(self.validity_years));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialStrategy {
    Federated(FederatedTrust),
    Secret(SecretPolicy),
}

impl CredentialStrategy {
    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            CredentialStrategy::Federated(t) => t.validate(),
            CredentialStrategy::Secret(s) => s.validate(),
        }
    }
}

impl std::fmt::Display for CredentialStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialStrategy::Federated(_) => write!(f, "federated"),
            CredentialStrategy::Secret(_) => write!(f, "secret"),
        }
    }
}

// ── Desired state ────────────────────────────────────────────────────────────

/// Everything one provisioning run converges the directory towards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionPlan {
    pub app_display_name: String,
    /// Built-in RBAC role names assigned at subscription scope.
    pub roles: Vec<String>,
    /// Microsoft Graph application permissions (e.g. `Directory.Read.All`).
    pub graph_permissions: Vec<String>,
    pub credential: CredentialStrategy,
}

impl ProvisionPlan {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.app_display_name.trim().is_empty() {
            return Err(DomainError::Empty { field: "app_display_name" });
        }
        if self.roles.is_empty() {
            return Err(DomainError::InvalidConfig(
                "at least one role must be assigned".into(),
            ));
        }
        if let Some(r) = self.roles.iter().find(|r| r.trim().is_empty()) {
            return Err(DomainError::InvalidConfig(format!("blank role name {:?}", r)));
        }
        self.credential.validate()
    }
}
