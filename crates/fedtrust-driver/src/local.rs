use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fedtrust_domain::{AppId, FederatedTrust, ObjectId, SubscriptionId, TenantId};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::driver::{
    same_role_definition, Application, AssignOutcome, Driver, GraphPermission, IssuedSecret,
    RoleAssignment, RoleDefinition, SecretMetadata, SecretValue, ServicePrincipal, Subscription,
};
use crate::error::DriverError;

pub const LOCAL_TENANT_ID: &str = "00000000-0000-0000-0000-00000000a11c";
const LOCAL_GRAPH_SP_ID: &str = "local-microsoft-graph";

/// An in-memory directory that behaves like a tenant without any I/O.
///
/// - Every subscription ID resolves to an `Enabled` subscription unless marked otherwise.
/// - Any role name and Graph permission value resolves, unless marked unknown.
/// - Mutating calls are counted so callers can assert a dry run wrote nothing.
///
/// Clones share the same directory.
#[derive(Debug, Clone)]
pub struct LocalDriver {
    state: Arc<Mutex<LocalState>>,
}

#[derive(Debug)]
struct LocalState {
    signed_in:          bool,
    /// `None` marks a subscription that does not exist.
    subscriptions:      HashMap<String, Option<String>>,
    applications:       Vec<LocalApplication>,
    service_principals: Vec<ServicePrincipal>,
    assignments:        Vec<RoleAssignment>,
    consents:           HashMap<ObjectId, Vec<String>>,
    unknown_roles:      HashSet<String>,
    forbidden_roles:    HashSet<String>,
    consent_denied:     bool,
    mutations:          usize,
}

#[derive(Debug)]
struct LocalApplication {
    app:       Application,
    requested: Vec<String>,
    federated: Vec<FederatedTrust>,
    secrets:   Vec<SecretMetadata>,
}

impl Default for LocalDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LocalState {
                signed_in:          true,
                subscriptions:      HashMap::new(),
                applications:       Vec::new(),
                service_principals: Vec::new(),
                assignments:        Vec::new(),
                consents:           HashMap::new(),
                unknown_roles:      HashSet::new(),
                forbidden_roles:    HashSet::new(),
                consent_denied:     false,
                mutations:          0,
            })),
        }
    }

    fn with_state(self, f: impl FnOnce(&mut LocalState)) -> Self {
        // Builders run before the driver is shared, so the lock is free.
        if let Ok(mut state) = self.state.try_lock() {
            f(&mut state);
        }
        self
    }

    /// Behave as if the operator never ran `az login`.
    pub fn signed_out(self) -> Self {
        self.with_state(|s| s.signed_in = false)
    }

    pub fn without_subscription(self, id: &SubscriptionId) -> Self {
        let id = id.as_str().to_string();
        self.with_state(|s| {
            s.subscriptions.insert(id, None);
        })
    }

    pub fn with_subscription_state(self, id: &SubscriptionId, state: &str) -> Self {
        let (id, state) = (id.as_str().to_string(), state.to_string());
        self.with_state(|s| {
            s.subscriptions.insert(id, Some(state));
        })
    }

    /// Role name that does not resolve to any definition.
    pub fn with_unknown_role(self, name: &str) -> Self {
        let name = name.to_string();
        self.with_state(|s| {
            s.unknown_roles.insert(name);
        })
    }

    /// Role whose assignment is rejected with 403.
    pub fn with_forbidden_role(self, name: &str) -> Self {
        let name = name.to_string();
        self.with_state(|s| {
            s.forbidden_roles.insert(name);
        })
    }

    /// Admin consent is rejected, as for an operator without a privileged directory role.
    pub fn with_consent_denied(self) -> Self {
        self.with_state(|s| s.consent_denied = true)
    }

    /// Number of mutating calls served so far.
    pub async fn mutation_count(&self) -> usize {
        self.state.lock().await.mutations
    }

    pub async fn application_count(&self) -> usize {
        self.state.lock().await.applications.len()
    }

    pub async fn service_principal_count(&self) -> usize {
        self.state.lock().await.service_principals.len()
    }

    /// Remove a role assignment behind the pipeline's back.
    pub async fn revoke_role(&self, role_name: &str) {
        let mut state = self.state.lock().await;
        let id = role_definition_id(role_name);
        state
            .assignments
            .retain(|a| !same_role_definition(&a.role_definition_id, &id));
    }
}

fn role_definition_id(name: &str) -> String {
    format!(
        "/providers/Microsoft.Authorization/roleDefinitions/local-{}",
        name.to_ascii_lowercase().replace(' ', "-")
    )
}

fn permission_id(value: &str) -> String {
    format!("local-permission-{}", value.to_ascii_lowercase())
}

impl LocalState {
    fn application(&mut self, app: &Application) -> Result<&mut LocalApplication, DriverError> {
        self.applications
            .iter_mut()
            .find(|a| a.app.object_id == app.object_id)
            .ok_or_else(|| DriverError::Api {
                what: format!("application {}", app.object_id),
                status: 404,
                message: "Request_ResourceNotFound: application does not exist".into(),
            })
    }
}

#[async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn check_session(&self) -> Result<(), DriverError> {
        if self.state.lock().await.signed_in {
            Ok(())
        } else {
            Err(DriverError::Unauthenticated(
                "no local session. Run 'az login' first.".into(),
            ))
        }
    }

    async fn get_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, DriverError> {
        let state = self.state.lock().await;
        let sub_state = match state.subscriptions.get(id.as_str()) {
            Some(None) => return Ok(None),
            Some(Some(s)) => s.clone(),
            None => "Enabled".to_string(),
        };
        Ok(Some(Subscription {
            id: id.clone(),
            tenant_id: TenantId::new(LOCAL_TENANT_ID),
            display_name: "Local subscription".into(),
            state: sub_state,
        }))
    }

    // ── Applications ──────────────────────────────────────────────────────────

    async fn find_application(&self, display_name: &str) -> Result<Option<Application>, DriverError> {
        let state = self.state.lock().await;
        Ok(state
            .applications
            .iter()
            .find(|a| a.app.display_name == display_name)
            .map(|a| a.app.clone()))
    }

    async fn create_application(&self, display_name: &str) -> Result<Application, DriverError> {
        debug!(display_name, "LocalDriver: create_application");
        let mut state = self.state.lock().await;
        state.mutations += 1;
        let app = Application {
            object_id: ObjectId::new(Uuid::new_v4().to_string()),
            app_id: AppId::new(Uuid::new_v4().to_string()),
            display_name: display_name.to_string(),
        };
        state.applications.push(LocalApplication {
            app: app.clone(),
            requested: Vec::new(),
            federated: Vec::new(),
            secrets: Vec::new(),
        });
        Ok(app)
    }

    async fn find_service_principal(
        &self,
        app_id: &AppId,
    ) -> Result<Option<ServicePrincipal>, DriverError> {
        let state = self.state.lock().await;
        Ok(state
            .service_principals
            .iter()
            .find(|sp| &sp.app_id == app_id)
            .cloned())
    }

    async fn create_service_principal(&self, app_id: &AppId) -> Result<ServicePrincipal, DriverError> {
        debug!(%app_id, "LocalDriver: create_service_principal");
        let mut state = self.state.lock().await;
        state.mutations += 1;
        let sp = ServicePrincipal {
            object_id: ObjectId::new(Uuid::new_v4().to_string()),
            app_id: app_id.clone(),
        };
        state.service_principals.push(sp.clone());
        Ok(sp)
    }

    // ── RBAC ──────────────────────────────────────────────────────────────────

    async fn find_role_definition(
        &self,
        _scope: &str,
        role_name: &str,
    ) -> Result<Option<RoleDefinition>, DriverError> {
        let state = self.state.lock().await;
        if state.unknown_roles.contains(role_name) {
            return Ok(None);
        }
        Ok(Some(RoleDefinition {
            id: role_definition_id(role_name),
            name: role_name.to_string(),
        }))
    }

    async fn list_role_assignments(
        &self,
        scope: &str,
        principal_id: &ObjectId,
    ) -> Result<Vec<RoleAssignment>, DriverError> {
        let state = self.state.lock().await;
        Ok(state
            .assignments
            .iter()
            .filter(|a| a.scope == scope && a.principal_id == principal_id.as_str())
            .cloned()
            .collect())
    }

    async fn create_role_assignment(
        &self,
        scope: &str,
        role: &RoleDefinition,
        principal_id: &ObjectId,
    ) -> Result<AssignOutcome, DriverError> {
        debug!(scope, role = %role.name, %principal_id, "LocalDriver: create_role_assignment");
        let mut state = self.state.lock().await;
        if state.forbidden_roles.contains(&role.name) {
            return Err(DriverError::Api {
                what: format!("assign role '{}' on {}", role.name, scope),
                status: 403,
                message: "AuthorizationFailed: caller cannot write role assignments".into(),
            });
        }
        let exists = state.assignments.iter().any(|a| {
            a.scope == scope
                && a.principal_id == principal_id.as_str()
                && same_role_definition(&a.role_definition_id, &role.id)
        });
        if exists {
            return Ok(AssignOutcome::AlreadyExists);
        }
        state.mutations += 1;
        state.assignments.push(RoleAssignment {
            id: format!("{}/providers/Microsoft.Authorization/roleAssignments/{}", scope, Uuid::new_v4()),
            role_definition_id: role.id.clone(),
            role_name: Some(role.name.clone()),
            scope: scope.to_string(),
            principal_id: principal_id.as_str().to_string(),
        });
        Ok(AssignOutcome::Created)
    }

    // ── Graph permissions ─────────────────────────────────────────────────────

    async fn find_graph_permission(&self, value: &str) -> Result<Option<GraphPermission>, DriverError> {
        Ok(Some(GraphPermission {
            id: permission_id(value),
            value: value.to_string(),
            resource_id: ObjectId::new(LOCAL_GRAPH_SP_ID),
        }))
    }

    async fn requested_permissions(&self, app: &Application) -> Result<Vec<String>, DriverError> {
        let mut state = self.state.lock().await;
        Ok(state.application(app)?.requested.clone())
    }

    async fn request_permission(
        &self,
        app: &Application,
        permission: &GraphPermission,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        state.mutations += 1;
        let entry = state.application(app)?;
        if !entry.requested.contains(&permission.id) {
            entry.requested.push(permission.id.clone());
        }
        Ok(())
    }

    async fn granted_permissions(&self, sp: &ServicePrincipal) -> Result<Vec<String>, DriverError> {
        let state = self.state.lock().await;
        Ok(state.consents.get(&sp.object_id).cloned().unwrap_or_default())
    }

    async fn grant_admin_consent(
        &self,
        sp: &ServicePrincipal,
        permission: &GraphPermission,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        if state.consent_denied {
            return Err(DriverError::Api {
                what: format!("grant admin consent for {}", permission.value),
                status: 403,
                message: "Authorization_RequestDenied: Insufficient privileges to complete the operation."
                    .into(),
            });
        }
        state.mutations += 1;
        let granted = state.consents.entry(sp.object_id.clone()).or_default();
        if !granted.contains(&permission.id) {
            granted.push(permission.id.clone());
        }
        Ok(())
    }

    // ── Credentials ───────────────────────────────────────────────────────────

    async fn list_federated_credentials(
        &self,
        app: &Application,
    ) -> Result<Vec<FederatedTrust>, DriverError> {
        let mut state = self.state.lock().await;
        Ok(state.application(app)?.federated.clone())
    }

    async fn create_federated_credential(
        &self,
        app: &Application,
        trust: &FederatedTrust,
    ) -> Result<(), DriverError> {
        debug!(name = %trust.name, "LocalDriver: create_federated_credential");
        let mut state = self.state.lock().await;
        state.mutations += 1;
        let entry = state.application(app)?;
        if entry.federated.iter().any(|f| f.name == trust.name) {
            return Err(DriverError::Api {
                what: "create federated credential".into(),
                status: 409,
                message: format!("Request_MultipleObjectsWithSameKeyValue: '{}' already exists", trust.name),
            });
        }
        entry.federated.push(trust.clone());
        Ok(())
    }

    async fn list_secrets(&self, app: &Application) -> Result<Vec<SecretMetadata>, DriverError> {
        let mut state = self.state.lock().await;
        Ok(state.application(app)?.secrets.clone())
    }

    async fn add_secret(
        &self,
        app: &Application,
        display_name: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedSecret, DriverError> {
        debug!(display_name, "LocalDriver: add_secret");
        let mut state = self.state.lock().await;
        state.mutations += 1;
        let key_id = Uuid::new_v4().to_string();
        state.application(app)?.secrets.push(SecretMetadata {
            key_id: key_id.clone(),
            display_name: Some(display_name.to_string()),
            expires_at: Some(expires_at),
        });
        Ok(IssuedSecret {
            key_id,
            value: SecretValue::new(format!("local~{}", Uuid::new_v4().simple())),
            expires_at,
        })
    }
}
