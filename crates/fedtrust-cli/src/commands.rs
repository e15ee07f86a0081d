use std::sync::Arc;

use anyhow::{Context, Result};
use fedtrust_config::presets;
use fedtrust_domain::ProvisionPlan;
use fedtrust_driver::{AzureDriver, AzureDriverConfig, Driver, LocalDriver};
use fedtrust_reconciler::{ProvisionReport, ProvisionRequest};

use crate::cli::{CloudArg, OutputFormat, ProfileArg, TargetArgs};
use crate::output;

// ── Setup ─────────────────────────────────────────────────────────────────────

pub async fn setup(target: TargetArgs, verify: bool) -> Result<()> {
    let plan = build_plan(&target)?;
    let driver = build_driver(&target)?;
    let req = ProvisionRequest {
        subscription_id: target.subscription_id.clone(),
        plan,
        dry_run: false,
        verify,
    };
    let report = fedtrust_reconciler::provision(req, driver)
        .await
        .context("Provisioning failed")?;

    match target.output {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            eprint!("{}", output::render_changes(&report.changes));
            eprintln!();
            eprint!("{}", output::render_warnings(&report.warnings));
            if let Some(v) = &report.verification {
                eprint!("{}", output::render_verification(v));
            }
            print!("{}", output::render_summary(&report));
        }
    }
    Ok(())
}

// ── Plan ──────────────────────────────────────────────────────────────────────

pub async fn plan(target: TargetArgs) -> Result<()> {
    let plan = build_plan(&target)?;
    let driver = build_driver(&target)?;
    let req = ProvisionRequest {
        subscription_id: target.subscription_id.clone(),
        plan,
        dry_run: true,
        verify: false,
    };
    let report = fedtrust_reconciler::provision(req, driver)
        .await
        .context("Planning failed")?;

    match target.output {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!("{}", output::render_changes(&report.changes));
            eprint!("{}", output::render_warnings(&report.warnings));
        }
    }
    Ok(())
}

// ── Verify ────────────────────────────────────────────────────────────────────

pub async fn verify(target: TargetArgs) -> Result<()> {
    let plan = build_plan(&target)?;
    let driver = build_driver(&target)?;
    let report = fedtrust_reconciler::verify(target.subscription_id.clone(), plan, driver)
        .await
        .context("Verification failed")?;

    match target.output {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            if let Some(v) = &report.verification {
                print!("{}", output::render_verification(v));
            }
            if !report.is_converged() {
                println!("\nSetup would still change:");
                println!("{}", output::render_changes(&report.changes));
            }
            eprint!("{}", output::render_warnings(&report.warnings));
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn print_json(report: &ProvisionReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

/// Resolve the plan from `--config` or a built-in profile, then apply
/// command-line overrides.
pub(crate) fn build_plan(target: &TargetArgs) -> Result<ProvisionPlan> {
    let mut plan = match (&target.config, target.profile.unwrap_or(ProfileArg::Secret)) {
        (Some(path), _) => fedtrust_config::load_plan(path)
            .with_context(|| format!("Failed to load profile {}", path.display()))?,
        (None, ProfileArg::Secret) => presets::secret(),
        (None, ProfileArg::AwsRole) => presets::aws_role(
            required(&target.issuer, "--issuer")?,
            required(&target.aws_account_id, "--aws-account-id")?,
            required(&target.aws_role_name, "--aws-role-name")?,
        )?,
        (None, ProfileArg::Kubernetes) => presets::kubernetes(
            required(&target.issuer, "--issuer")?,
            required(&target.namespace, "--namespace")?,
            required(&target.service_account, "--service-account")?,
        )?,
    };

    if let Some(name) = &target.app_name {
        plan.app_display_name = name.clone();
    }
    plan.validate().context("Invalid provisioning plan")?;
    Ok(plan)
}

fn required<'a>(value: &'a Option<String>, flag: &str) -> Result<&'a str> {
    value
        .as_deref()
        .with_context(|| format!("{flag} is required for this profile"))
}

fn build_driver(target: &TargetArgs) -> Result<Arc<dyn Driver>> {
    match target.cloud {
        CloudArg::Local => Ok(Arc::new(LocalDriver::new())),
        CloudArg::Azure => {
            let config = AzureDriverConfig {
                tenant_id: target.azure_tenant_id.clone(),
                client_id: target.azure_client_id.clone(),
                client_secret: target.azure_client_secret.clone(),
            };
            let driver = AzureDriver::new(config).context("Failed to initialise Azure driver")?;
            Ok(Arc::new(driver))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use fedtrust_domain::CredentialStrategy;
    use std::io::Write;

    use crate::cli::{Cli, Command};

    const SUB: &str = "0b1f6471-1bf0-4dda-aec3-cb9272f09590";

    fn target(args: &[&str]) -> TargetArgs {
        let argv = ["fedtrust", "plan", "--subscription-id", SUB]
            .into_iter()
            .chain(args.iter().copied());
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Plan { target } => target,
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn default_profile_is_secret() {
        let plan = build_plan(&target(&[])).unwrap();
        assert!(matches!(plan.credential, CredentialStrategy::Secret(_)));
        assert_eq!(plan.roles.len(), 3);
    }

    #[test]
    fn app_name_override() {
        let plan = build_plan(&target(&["--app-name", "vendor-reader"])).unwrap();
        assert_eq!(plan.app_display_name, "vendor-reader");
    }

    #[test]
    fn aws_profile_builds_assumed_role_subject() {
        let plan = build_plan(&target(&[
            "--profile", "aws-role",
            "--issuer", "https://oidc.example.com",
            "--aws-account-id", "123456789012",
            "--aws-role-name", "Collector",
        ]))
        .unwrap();
        match plan.credential {
            CredentialStrategy::Federated(t) => {
                assert_eq!(t.subject, "arn:aws:sts::123456789012:assumed-role/Collector/*")
            }
            other => panic!("expected federated, got {other}"),
        }
    }

    #[test]
    fn config_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "app_display_name: from-file\ncredential:\n  type: secret\n  validity_years: 1"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let plan = build_plan(&target(&["--config", &path])).unwrap();
        assert_eq!(plan.app_display_name, "from-file");
    }

    #[tokio::test]
    async fn plan_against_local_cloud_succeeds() {
        plan(target(&["--cloud", "local", "--output", "json"])).await.unwrap();
    }
}
