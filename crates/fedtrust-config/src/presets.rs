//! Built-in plans for the three supported trust setups.
//!
//! No issuer URL is baked in: the OIDC issuer of the vendor's cluster or
//! account is only known at deployment time, so federated presets take it as
//! an argument.

use fedtrust_domain::{
    aws_assumed_role_subject, kubernetes_subject, CredentialStrategy, FederatedTrust,
    ProvisionPlan, SecretPolicy,
};

use crate::error::ConfigError;

pub const DEFAULT_APP_NAME: &str = "compliance-evidence-reader";
pub const DEFAULT_SECRET_NAME: &str = "compliance-evidence-secret";
pub const DEFAULT_SECRET_VALIDITY_YEARS: u32 = 2;
pub const AWS_CREDENTIAL_NAME: &str = "aws-evidence-collector";
pub const KUBERNETES_CREDENTIAL_NAME: &str = "kubernetes-evidence-collector";
pub const FEDERATED_CREDENTIAL_NAME: &str = "evidence-collector";

pub const SECRET_ROLES: &[&str] = &["Reader", "Security Reader", "Log Analytics Reader"];

pub const FEDERATED_ROLES: &[&str] = &[
    "Reader",
    "Security Reader",
    "Policy Insights Data Reader",
    "Log Analytics Reader",
];

/// Graph application permissions requested (and consented) for the secret setup.
pub const SECRET_GRAPH_PERMISSIONS: &[&str] =
    &["Directory.Read.All", "Policy.Read.All", "AuditLog.Read.All"];

pub(crate) fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Client-secret setup with Graph read permissions.
pub fn secret() -> ProvisionPlan {
    ProvisionPlan {
        app_display_name: DEFAULT_APP_NAME.to_string(),
        roles: owned(SECRET_ROLES),
        graph_permissions: owned(SECRET_GRAPH_PERMISSIONS),
        credential: CredentialStrategy::Secret(SecretPolicy {
            display_name: DEFAULT_SECRET_NAME.to_string(),
            validity_years: DEFAULT_SECRET_VALIDITY_YEARS,
        }),
    }
}

/// Secretless setup trusting every session of one AWS IAM role.
pub fn aws_role(issuer: &str, account_id: &str, role_name: &str) -> Result<ProvisionPlan, ConfigError> {
    let trust = FederatedTrust::new(
        AWS_CREDENTIAL_NAME,
        issuer,
        aws_assumed_role_subject(account_id, role_name),
        None,
    )?;
    Ok(federated(trust))
}

/// Secretless setup trusting one Kubernetes service account.
pub fn kubernetes(
    issuer: &str,
    namespace: &str,
    service_account: &str,
) -> Result<ProvisionPlan, ConfigError> {
    let trust = FederatedTrust::new(
        KUBERNETES_CREDENTIAL_NAME,
        issuer,
        kubernetes_subject(namespace, service_account),
        None,
    )?;
    Ok(federated(trust))
}

fn federated(trust: FederatedTrust) -> ProvisionPlan {
    ProvisionPlan {
        app_display_name: DEFAULT_APP_NAME.to_string(),
        roles: owned(FEDERATED_ROLES),
        graph_permissions: Vec::new(),
        credential: CredentialStrategy::Federated(trust),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedtrust_domain::TOKEN_EXCHANGE_AUDIENCE;

    #[test]
    fn secret_preset_roles() {
        let plan = secret();
        assert_eq!(plan.roles, vec!["Reader", "Security Reader", "Log Analytics Reader"]);
        assert!(!plan.graph_permissions.is_empty());
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn kubernetes_preset_subject_and_audience() {
        let plan = kubernetes("https://oidc.eks.example.com/id/ABC", "evidence", "collector").unwrap();
        assert_eq!(plan.roles.len(), 4);
        assert!(plan.graph_permissions.is_empty());
        match plan.credential {
            CredentialStrategy::Federated(t) => {
                assert_eq!(t.subject, "system:serviceaccount:evidence:collector");
                assert_eq!(t.audience, TOKEN_EXCHANGE_AUDIENCE);
            }
            other => panic!("expected federated, got {other}"),
        }
    }

    #[test]
    fn aws_preset_requires_https_issuer() {
        assert!(aws_role("oidc.example.com", "123456789012", "Collector").is_err());
        let plan = aws_role("https://oidc.example.com", "123456789012", "Collector").unwrap();
        assert!(plan.roles.iter().any(|r| r == "Policy Insights Data Reader"));
    }
}
