use std::path::Path;

use fedtrust_domain::{
    aws_assumed_role_subject, kubernetes_subject, CredentialStrategy, FederatedTrust,
    ProvisionPlan, SecretPolicy,
};
use tracing::debug;

use crate::error::ConfigError;
use crate::presets;
use crate::raw::{RawCredential, RawFederated, RawProfile, RawSecret};

/// Read a YAML provisioning profile from disk.
///
/// ```yaml
/// app_display_name: compliance-evidence-reader
/// roles: [Reader, Security Reader]
/// credential:
///   type: federated
///   issuer: https://oidc.eks.eu-west-1.amazonaws.com/id/EXAMPLE
///   kubernetes:
///     namespace: evidence
///     service_account: collector
/// ```
pub fn load_plan(path: &Path) -> Result<ProvisionPlan, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    debug!("Loading profile from {}", path.display());
    parse_plan(&content, path)
}

/// Parse profile YAML; `path` is only used in error messages.
pub fn parse_plan(content: &str, path: &Path) -> Result<ProvisionPlan, ConfigError> {
    let raw: RawProfile = serde_yaml::from_str(content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })?;
    convert_profile(raw, path)
}

fn convert_profile(raw: RawProfile, path: &Path) -> Result<ProvisionPlan, ConfigError> {
    let credential = convert_credential(raw.credential, path)?;

    let (default_roles, default_permissions) = match &credential {
        CredentialStrategy::Secret(_) => (presets::SECRET_ROLES, presets::SECRET_GRAPH_PERMISSIONS),
        CredentialStrategy::Federated(_) => (presets::FEDERATED_ROLES, &[][..]),
    };

    let plan = ProvisionPlan {
        app_display_name: raw
            .app_display_name
            .unwrap_or_else(|| presets::DEFAULT_APP_NAME.to_string()),
        roles: raw.roles.unwrap_or_else(|| presets::owned(default_roles)),
        graph_permissions: raw
            .graph_permissions
            .unwrap_or_else(|| presets::owned(default_permissions)),
        credential,
    };
    plan.validate()?;
    Ok(plan)
}

fn convert_credential(raw: RawCredential, path: &Path) -> Result<CredentialStrategy, ConfigError> {
    match raw {
        RawCredential::Secret(RawSecret { display_name, validity_years }) => {
            Ok(CredentialStrategy::Secret(SecretPolicy {
                display_name: display_name
                    .unwrap_or_else(|| presets::DEFAULT_SECRET_NAME.to_string()),
                validity_years: validity_years.unwrap_or(presets::DEFAULT_SECRET_VALIDITY_YEARS),
            }))
        }
        RawCredential::Federated(RawFederated { name, issuer, subject, kubernetes, aws, audience }) => {
            let (subject, default_name) = match (subject, kubernetes, aws) {
                (Some(s), None, None) => (s, presets::FEDERATED_CREDENTIAL_NAME),
                (None, Some(k), None) => (
                    kubernetes_subject(&k.namespace, &k.service_account),
                    presets::KUBERNETES_CREDENTIAL_NAME,
                ),
                (None, None, Some(a)) => (
                    aws_assumed_role_subject(&a.account_id, &a.role_name),
                    presets::AWS_CREDENTIAL_NAME,
                ),
                (None, None, None) => {
                    return Err(ConfigError::Conversion {
                        path: path.display().to_string(),
                        message: "federated credential needs one of 'subject', 'kubernetes' or 'aws'"
                            .into(),
                    })
                }
                _ => {
                    return Err(ConfigError::Conversion {
                        path: path.display().to_string(),
                        message: "'subject', 'kubernetes' and 'aws' are mutually exclusive".into(),
                    })
                }
            };
            let trust = FederatedTrust::new(
                name.unwrap_or_else(|| default_name.to_string()),
                issuer,
                subject,
                audience,
            )?;
            Ok(CredentialStrategy::Federated(trust))
        }
    }
}
