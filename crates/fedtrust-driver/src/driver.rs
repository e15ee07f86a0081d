use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fedtrust_domain::{AppId, FederatedTrust, ObjectId, SubscriptionId, TenantId};
use serde::{Deserialize, Serialize};

use crate::error::DriverError;

// ── Directory objects ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub tenant_id: TenantId,
    pub display_name: String,
    /// ARM subscription state, e.g. `Enabled`, `Disabled`, `Warned`.
    pub state: String,
}

impl Subscription {
    pub fn is_usable(&self) -> bool {
        self.state.eq_ignore_ascii_case("Enabled") || self.state.eq_ignore_ascii_case("Warned")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub object_id: ObjectId,
    pub app_id: AppId,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePrincipal {
    pub object_id: ObjectId,
    pub app_id: AppId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    /// Fully-qualified role definition resource ID.
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: String,
    pub role_definition_id: String,
    /// Resolved display name of the role, when the driver could look it up.
    pub role_name: Option<String>,
    pub scope: String,
    pub principal_id: String,
}

/// Microsoft Graph application permission (an app role on the Graph service principal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphPermission {
    /// App role ID.
    pub id: String,
    /// Permission value, e.g. `Directory.Read.All`.
    pub value: String,
    /// Object ID of the Microsoft Graph service principal in this tenant.
    pub resource_id: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub key_id: String,
    pub display_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Plaintext of a freshly minted client secret. `Debug` never shows the value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(s: impl Into<String>) -> Self {
        SecretValue(s.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedSecret {
    pub key_id: String,
    pub value: SecretValue,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    Created,
    AlreadyExists,
}

/// Compare two role definition IDs by their trailing GUID.
///
/// ARM returns the same definition both subscription-qualified and bare
/// (`/providers/Microsoft.Authorization/roleDefinitions/<guid>`).
pub fn same_role_definition(a: &str, b: &str) -> bool {
    let tail = |s: &str| s.trim_end_matches('/').rsplit('/').next().unwrap_or("").to_ascii_lowercase();
    let (ta, tb) = (tail(a), tail(b));
    !ta.is_empty() && ta == tb
}

// ── Driver ────────────────────────────────────────────────────────────────────

/// Read/write access to one tenant's identity control plane.
///
/// Every `find_*`/`list_*` call is read-only; the provisioning pipeline uses
/// them to decide whether the matching create call is needed at all.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    // ── Session ───────────────────────────────────────────────────────────────

    /// Confirm the tooling is present and the operator is signed in, for
    /// both the management and the Graph APIs. Never mutates anything.
    async fn check_session(&self) -> Result<(), DriverError>;

    async fn get_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, DriverError>;

    // ── Applications ──────────────────────────────────────────────────────────

    async fn find_application(&self, display_name: &str) -> Result<Option<Application>, DriverError>;

    async fn create_application(&self, display_name: &str) -> Result<Application, DriverError>;

    async fn find_service_principal(
        &self,
        app_id: &AppId,
    ) -> Result<Option<ServicePrincipal>, DriverError>;

    async fn create_service_principal(&self, app_id: &AppId) -> Result<ServicePrincipal, DriverError>;

    // ── RBAC ──────────────────────────────────────────────────────────────────

    async fn find_role_definition(
        &self,
        scope: &str,
        role_name: &str,
    ) -> Result<Option<RoleDefinition>, DriverError>;

    /// Role assignments held by `principal_id`, filtered to exactly `scope`.
    async fn list_role_assignments(
        &self,
        scope: &str,
        principal_id: &ObjectId,
    ) -> Result<Vec<RoleAssignment>, DriverError>;

    async fn create_role_assignment(
        &self,
        scope: &str,
        role: &RoleDefinition,
        principal_id: &ObjectId,
    ) -> Result<AssignOutcome, DriverError>;

    // ── Graph permissions ─────────────────────────────────────────────────────

    async fn find_graph_permission(&self, value: &str) -> Result<Option<GraphPermission>, DriverError>;

    /// App role IDs the application requests from Microsoft Graph.
    async fn requested_permissions(&self, app: &Application) -> Result<Vec<String>, DriverError>;

    async fn request_permission(
        &self,
        app: &Application,
        permission: &GraphPermission,
    ) -> Result<(), DriverError>;

    /// App role IDs already granted (admin-consented) to the service principal.
    async fn granted_permissions(&self, sp: &ServicePrincipal) -> Result<Vec<String>, DriverError>;

    async fn grant_admin_consent(
        &self,
        sp: &ServicePrincipal,
        permission: &GraphPermission,
    ) -> Result<(), DriverError>;

    // ── Credentials ───────────────────────────────────────────────────────────

    async fn list_federated_credentials(
        &self,
        app: &Application,
    ) -> Result<Vec<FederatedTrust>, DriverError>;

    async fn create_federated_credential(
        &self,
        app: &Application,
        trust: &FederatedTrust,
    ) -> Result<(), DriverError>;

    async fn list_secrets(&self, app: &Application) -> Result<Vec<SecretMetadata>, DriverError>;

    async fn add_secret(
        &self,
        app: &Application,
        display_name: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedSecret, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_definition_ids_compare_by_guid() {
        assert!(same_role_definition(
            "/subscriptions/abc/providers/Microsoft.Authorization/roleDefinitions/ACDD72A7-3385-48EF-BD42-F606FBA81AE7",
            "/providers/Microsoft.Authorization/roleDefinitions/acdd72a7-3385-48ef-bd42-f606fba81ae7",
        ));
        assert!(!same_role_definition("/roleDefinitions/a", "/roleDefinitions/b"));
        assert!(!same_role_definition("", ""));
    }

    #[test]
    fn secret_value_debug_is_redacted() {
        let v = SecretValue::new("hunter2");
        assert_eq!(format!("{:?}", v), "SecretValue(***)");
        assert_eq!(v.expose(), "hunter2");
        assert_eq!(serde_json::to_value(&v).unwrap(), serde_json::json!("hunter2"));
    }
}
