use chrono::SecondsFormat;
use fedtrust_domain::SECRET_NOT_RETRIEVABLE;
use fedtrust_reconciler::{Change, CredentialOutcome, ProvisionReport, Verification};

/// Render a list of changes as human-readable text.
pub fn render_changes(changes: &[Change]) -> String {
    if changes.is_empty() {
        return "No changes.".to_string();
    }
    let mut out = String::new();
    for change in changes {
        let line = match change {
            Change::ApplicationCreated { display_name } => format!("+ application {}", display_name),
            Change::ServicePrincipalCreated => "+ service principal".to_string(),
            Change::RoleAssigned { role } => format!("  + role {}", role),
            Change::PermissionRequested { permission } => {
                format!("  + graph permission {}", permission)
            }
            Change::ConsentGranted { permission } => format!("  + admin consent {}", permission),
            Change::FederatedCredentialCreated { name } => {
                format!("  + federated credential {}", name)
            }
            Change::SecretIssued { display_name } => format!("  + client secret {}", display_name),
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// `KEY=value` lines the collector is configured with, plus `#` notes for
/// anything the operator still has to do by hand.
pub fn render_summary(report: &ProvisionReport) -> String {
    let mut lines = vec![
        format!("AZURE_TENANT_ID={}", opt(report.tenant_id.as_ref())),
        format!("AZURE_SUBSCRIPTION_ID={}", report.subscription_id),
        format!("AZURE_CLIENT_ID={}", opt(report.client_id.as_ref())),
    ];

    match &report.credential {
        Some(CredentialOutcome::Federated { trust, .. }) => {
            lines.push(format!("AZURE_FEDERATED_CREDENTIAL_NAME={}", trust.name));
            lines.push(format!("AZURE_FEDERATED_ISSUER={}", trust.issuer));
            lines.push(format!("AZURE_FEDERATED_SUBJECT={}", trust.subject));
            lines.push(format!("AZURE_FEDERATED_AUDIENCE={}", trust.audience));
        }
        Some(CredentialOutcome::SecretIssued { value, expires_at, .. }) => {
            lines.push(format!("AZURE_CLIENT_SECRET={}", value.expose()));
            lines.push(format!(
                "AZURE_CLIENT_SECRET_EXPIRES={}",
                expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
            lines.push("# Store the secret now; it cannot be shown again.".to_string());
        }
        Some(CredentialOutcome::SecretNotRetrievable { display_name, expires_at }) => {
            lines.push(format!("AZURE_CLIENT_SECRET={}", SECRET_NOT_RETRIEVABLE));
            if let Some(at) = expires_at {
                lines.push(format!(
                    "AZURE_CLIENT_SECRET_EXPIRES={}",
                    at.to_rfc3339_opts(SecondsFormat::Secs, true)
                ));
            }
            lines.push(format!(
                "# A secret named '{}' already exists. To rotate it, delete it under \
                 Certificates & secrets in the portal and run setup again.",
                display_name
            ));
        }
        None => {}
    }

    if let Some(url) = &report.consent_url {
        lines.push(format!("# Admin consent is still required: {}", url));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub fn render_warnings(warnings: &[String]) -> String {
    warnings.iter().map(|w| format!("warning: {}\n", w)).collect()
}

pub fn render_verification(v: &Verification) -> String {
    let mut out = String::from("Verification:\n");
    out.push_str(&format!("  roles: {}\n", list(&v.roles)));
    out.push_str(&format!("  graph permissions: {}\n", list(&v.granted_permissions)));
    for f in &v.federated_credentials {
        out.push_str(&format!(
            "  federated credential: {} (issuer {}, subject {}, audience {})\n",
            f.name, f.issuer, f.subject, f.audience
        ));
    }
    for s in &v.secrets {
        let expires = s
            .expires_at
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| "unknown".to_string());
        out.push_str(&format!(
            "  client secret: {} (expires {})\n",
            s.display_name.as_deref().unwrap_or(&s.key_id),
            expires
        ));
    }
    out
}

fn opt<T: std::fmt::Display>(v: Option<&T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "<pending>".to_string())
}

fn list(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use fedtrust_domain::{AppId, FederatedTrust, SubscriptionId, TenantId};
    use fedtrust_driver::{SecretMetadata, SecretValue};

    fn report() -> ProvisionReport {
        let sub: SubscriptionId = "0b1f6471-1bf0-4dda-aec3-cb9272f09590".parse().unwrap();
        let mut r = ProvisionReport::new(false, sub);
        r.tenant_id = Some(TenantId::new("tenant-1"));
        r.client_id = Some(AppId::new("client-1"));
        r
    }

    fn expiry() -> DateTime<Utc> {
        "2028-03-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn no_changes() {
        assert_eq!(render_changes(&[]), "No changes.");
    }

    #[test]
    fn changes_are_listed_in_order() {
        let text = render_changes(&[
            Change::ApplicationCreated { display_name: "reader".into() },
            Change::RoleAssigned { role: "Reader".into() },
        ]);
        assert_eq!(text, "+ application reader\n  + role Reader\n");
    }

    #[test]
    fn summary_for_issued_secret() {
        let mut r = report();
        r.credential = Some(CredentialOutcome::SecretIssued {
            display_name: "compliance-evidence-secret".into(),
            key_id: "key-1".into(),
            value: SecretValue::new("s3cr3t"),
            expires_at: expiry(),
        });
        let text = render_summary(&r);
        assert!(text.starts_with("AZURE_TENANT_ID=tenant-1\n"));
        assert!(text.contains("AZURE_SUBSCRIPTION_ID=0b1f6471-1bf0-4dda-aec3-cb9272f09590\n"));
        assert!(text.contains("AZURE_CLIENT_ID=client-1\n"));
        assert!(text.contains("AZURE_CLIENT_SECRET=s3cr3t\n"));
        assert!(text.contains("AZURE_CLIENT_SECRET_EXPIRES=2028-03-01T12:00:00Z\n"));
    }

    #[test]
    fn summary_for_existing_secret_prints_marker() {
        let mut r = report();
        r.credential = Some(CredentialOutcome::SecretNotRetrievable {
            display_name: "compliance-evidence-secret".into(),
            expires_at: None,
        });
        let text = render_summary(&r);
        assert!(text.contains("AZURE_CLIENT_SECRET=<EXISTING_SECRET_NOT_RETRIEVABLE>\n"));
        assert!(!text.contains("AZURE_CLIENT_SECRET_EXPIRES"));
        assert!(text.contains("rotate"));
    }

    #[test]
    fn summary_for_federated_trust() {
        let mut r = report();
        r.credential = Some(CredentialOutcome::Federated {
            trust: FederatedTrust::new(
                "aws-evidence-collector",
                "https://oidc.example.com",
                "arn:aws:sts::123456789012:assumed-role/Collector/*",
                None,
            )
            .unwrap(),
            created: true,
        });
        r.consent_url = Some("https://portal.azure.com/x".into());
        let text = render_summary(&r);
        assert!(text.contains("AZURE_FEDERATED_CREDENTIAL_NAME=aws-evidence-collector\n"));
        assert!(text.contains("AZURE_FEDERATED_AUDIENCE=api://AzureADTokenExchange\n"));
        assert!(!text.contains("AZURE_CLIENT_SECRET"));
        assert!(text.contains("# Admin consent is still required: https://portal.azure.com/x"));
    }

    #[test]
    fn pending_identifiers_in_dry_run() {
        let mut r = report();
        r.client_id = None;
        assert!(render_summary(&r).contains("AZURE_CLIENT_ID=<pending>\n"));
    }

    #[test]
    fn verification_lists_roles_and_secrets() {
        let v = Verification {
            roles: vec!["Reader".into(), "Security Reader".into()],
            granted_permissions: vec![],
            federated_credentials: vec![],
            secrets: vec![SecretMetadata {
                key_id: "key-1".into(),
                display_name: Some("compliance-evidence-secret".into()),
                expires_at: Some(expiry()),
            }],
        };
        let text = render_verification(&v);
        assert!(text.contains("roles: Reader, Security Reader\n"));
        assert!(text.contains("graph permissions: (none)\n"));
        assert!(text.contains("client secret: compliance-evidence-secret (expires 2028-03-01T12:00:00Z)"));
    }

    #[test]
    fn warnings_are_prefixed() {
        assert_eq!(render_warnings(&["a".into()]), "warning: a\n");
    }
}
