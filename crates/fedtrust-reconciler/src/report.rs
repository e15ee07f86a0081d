use chrono::{DateTime, Utc};
use fedtrust_domain::{AppId, FederatedTrust, ObjectId, ProvisionPlan, SubscriptionId, TenantId};
use fedtrust_driver::{SecretMetadata, SecretValue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub subscription_id: SubscriptionId,
    pub plan: ProvisionPlan,
    pub dry_run: bool,
    /// Read the resulting setup back after provisioning.
    pub verify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Change {
    ApplicationCreated { display_name: String },
    ServicePrincipalCreated,
    RoleAssigned { role: String },
    PermissionRequested { permission: String },
    ConsentGranted { permission: String },
    FederatedCredentialCreated { name: String },
    SecretIssued { display_name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CredentialOutcome {
    Federated {
        trust: FederatedTrust,
        /// False when a credential with this name was already registered.
        created: bool,
    },
    /// Freshly minted secret. The only time its value is ever available.
    SecretIssued {
        display_name: String,
        key_id: String,
        value: SecretValue,
        expires_at: DateTime<Utc>,
    },
    /// A secret with this display name exists; its value cannot be read back.
    SecretNotRetrievable {
        display_name: String,
        expires_at: Option<DateTime<Utc>>,
    },
}

/// State read back from the directory after a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Verification {
    /// Role names assigned to the service principal at subscription scope.
    pub roles: Vec<String>,
    /// Graph permission values with admin consent.
    pub granted_permissions: Vec<String>,
    pub federated_credentials: Vec<FederatedTrust>,
    pub secrets: Vec<SecretMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub dry_run: bool,
    pub subscription_id: SubscriptionId,
    pub tenant_id: Option<TenantId>,
    pub client_id: Option<AppId>,
    pub service_principal_id: Option<ObjectId>,
    pub changes: Vec<Change>,
    pub warnings: Vec<String>,
    /// Portal link for granting admin consent by hand, set when consent could not be automated.
    pub consent_url: Option<String>,
    pub credential: Option<CredentialOutcome>,
    pub verification: Option<Verification>,
}

impl ProvisionReport {
    pub fn new(dry_run: bool, subscription_id: SubscriptionId) -> Self {
        Self {
            dry_run,
            subscription_id,
            tenant_id: None,
            client_id: None,
            service_principal_id: None,
            changes: Vec::new(),
            warnings: Vec::new(),
            consent_url: None,
            credential: None,
            verification: None,
        }
    }

    /// True when the directory already matched the plan.
    pub fn is_converged(&self) -> bool {
        self.changes.is_empty()
    }
}
