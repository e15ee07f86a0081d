use serde::{Deserialize, Serialize};

/// Raw YAML representation of a provisioning profile.
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawProfile {
    /// Absent means the preset application name.
    pub app_display_name: Option<String>,
    /// Absent means the default role set for the credential type.
    pub roles: Option<Vec<String>>,
    /// Absent means the default Graph permissions for the credential type.
    pub graph_permissions: Option<Vec<String>>,
    pub credential: RawCredential,
}

/// Unknown keys are rejected by the variant structs; they never see `type`.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawCredential {
    Federated(RawFederated),
    Secret(RawSecret),
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawFederated {
    pub name: Option<String>,
    pub issuer: String,
    /// Literal subject; mutually exclusive with `kubernetes` / `aws`.
    pub subject: Option<String>,
    pub kubernetes: Option<RawKubernetesWorkload>,
    pub aws: Option<RawAwsRole>,
    pub audience: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawSecret {
    pub display_name: Option<String>,
    pub validity_years: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawKubernetesWorkload {
    pub namespace: String,
    pub service_account: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawAwsRole {
    pub account_id: String,
    pub role_name: String,
}
