use clap::{Args, Parser, Subcommand, ValueEnum};
use fedtrust_domain::SubscriptionId;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "fedtrust",
    about = "Provision a read-only Azure AD identity for compliance evidence collection",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create whatever is missing and print the connection summary.
    Setup {
        #[command(flatten)]
        target: TargetArgs,

        /// Read roles, permissions and credentials back after provisioning.
        #[arg(long, env = "FEDTRUST_VERIFY")]
        verify: bool,
    },

    /// Show what setup would change without applying.
    Plan {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Check an existing setup against the profile. Never changes anything.
    Verify {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Subscription the roles are granted on.
    #[arg(long, visible_alias = "subscription", env = "FEDTRUST_SUBSCRIPTION_ID")]
    pub subscription_id: SubscriptionId,

    /// Built-in profile. Defaults to `secret`.
    #[arg(long, value_enum, conflicts_with = "config")]
    pub profile: Option<ProfileArg>,

    /// YAML profile file instead of a built-in profile.
    #[arg(long, env = "FEDTRUST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Display name of the application registration.
    #[arg(long, env = "FEDTRUST_APP_NAME")]
    pub app_name: Option<String>,

    /// OIDC issuer URL of the workload's identity provider.
    #[arg(
        long,
        env = "FEDTRUST_ISSUER",
        required_if_eq_any([("profile", "aws-role"), ("profile", "kubernetes")])
    )]
    pub issuer: Option<String>,

    #[arg(long, required_if_eq("profile", "aws-role"))]
    pub aws_account_id: Option<String>,

    #[arg(long, required_if_eq("profile", "aws-role"))]
    pub aws_role_name: Option<String>,

    /// Kubernetes namespace of the collector's service account.
    #[arg(long, required_if_eq("profile", "kubernetes"))]
    pub namespace: Option<String>,

    #[arg(long, required_if_eq("profile", "kubernetes"))]
    pub service_account: Option<String>,

    /// Directory to run against. `local` simulates a tenant in memory.
    #[arg(long, value_enum, default_value = "azure", env = "FEDTRUST_CLOUD")]
    pub cloud: CloudArg,

    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Tenant for service principal authentication (Azure only).
    #[arg(long, env = "AZURE_TENANT_ID")]
    pub azure_tenant_id: Option<String>,

    /// Service principal client ID (Azure only; falls back to `az login`).
    #[arg(long, env = "AZURE_CLIENT_ID")]
    pub azure_client_id: Option<String>,

    /// Service principal client secret (Azure only).
    #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    pub azure_client_secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProfileArg {
    /// Client secret with Graph read permissions.
    Secret,
    /// Federated trust for an AWS IAM role.
    AwsRole,
    /// Federated trust for a Kubernetes service account.
    Kubernetes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CloudArg {
    Azure,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    const SUB: &str = "0b1f6471-1bf0-4dda-aec3-cb9272f09590";

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("fedtrust").chain(args.iter().copied()))
    }

    #[test]
    fn setup_with_subscription_alias() {
        let cli = parse(&["setup", "--subscription", SUB, "--verify"]).unwrap();
        match cli.command {
            Command::Setup { target, verify } => {
                assert_eq!(target.subscription_id.as_str(), SUB);
                assert!(verify);
                assert_eq!(target.profile, None);
                assert_eq!(target.cloud, CloudArg::Azure);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn missing_subscription_is_a_usage_error() {
        if std::env::var("FEDTRUST_SUBSCRIPTION_ID").is_ok() {
            return;
        }
        let err = parse(&["setup"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn malformed_subscription_is_rejected() {
        let err = parse(&["plan", "--subscription-id", "not-a-guid"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn kubernetes_profile_requires_its_arguments() {
        if std::env::var("FEDTRUST_ISSUER").is_ok() {
            return;
        }
        let err = parse(&["setup", "--subscription-id", SUB, "--profile", "kubernetes"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let cli = parse(&[
            "setup",
            "--subscription-id", SUB,
            "--profile", "kubernetes",
            "--issuer", "https://oidc.example.com",
            "--namespace", "evidence",
            "--service-account", "collector",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Setup { .. }));
    }

    #[test]
    fn profile_and_config_conflict() {
        let err = parse(&[
            "plan",
            "--subscription-id", SUB,
            "--profile", "secret",
            "--config", "profile.yml",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }
}
