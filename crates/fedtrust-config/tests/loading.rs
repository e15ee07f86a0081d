use std::io::Write;
use std::path::Path;

use fedtrust_config::{load_plan, parse_plan, ConfigError};
use fedtrust_domain::{CredentialStrategy, TOKEN_EXCHANGE_AUDIENCE};

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

#[test]
fn load_secret_fixture() {
    let plan = load_plan(&fixture("secret.yml")).expect("should load without error");
    assert_eq!(plan.app_display_name, "acme-evidence-reader");
    assert_eq!(plan.roles, vec!["Reader", "Security Reader", "Log Analytics Reader"]);
    assert!(plan.graph_permissions.contains(&"Directory.Read.All".to_string()));
    match plan.credential {
        CredentialStrategy::Secret(s) => {
            assert_eq!(s.display_name, "acme-evidence-secret");
            assert_eq!(s.validity_years, 1);
        }
        other => panic!("expected secret credential, got {other}"),
    }
}

#[test]
fn load_kubernetes_fixture_uses_federated_defaults() {
    let plan = load_plan(&fixture("kubernetes.yml")).expect("should load without error");
    assert_eq!(plan.app_display_name, "compliance-evidence-reader");
    assert_eq!(plan.roles.len(), 4);
    assert!(plan.graph_permissions.is_empty());
    match plan.credential {
        CredentialStrategy::Federated(t) => {
            assert_eq!(t.name, "kubernetes-evidence-collector");
            assert_eq!(t.subject, "system:serviceaccount:evidence:collector");
            assert_eq!(t.audience, TOKEN_EXCHANGE_AUDIENCE);
        }
        other => panic!("expected federated credential, got {other}"),
    }
}

#[test]
fn load_aws_fixture_keeps_explicit_roles() {
    let plan = load_plan(&fixture("aws-role.yml")).expect("should load without error");
    assert_eq!(plan.roles, vec!["Reader", "Security Reader"]);
    match plan.credential {
        CredentialStrategy::Federated(t) => {
            assert_eq!(t.name, "acme-aws-collector");
            assert_eq!(t.subject, "arn:aws:sts::123456789012:assumed-role/EvidenceCollector/*");
        }
        other => panic!("expected federated credential, got {other}"),
    }
}

#[test]
fn ambiguous_subject_is_rejected() {
    let yaml = r#"
credential:
  type: federated
  issuer: https://issuer.example.com
  subject: literal
  kubernetes:
    namespace: a
    service_account: b
"#;
    let err = parse_plan(yaml, Path::new("inline.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::Conversion { .. }), "got: {err}");
}

#[test]
fn unknown_field_is_a_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "app_name: typo\ncredential:\n  type: secret").unwrap();
    let err = load_plan(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::YamlParse { .. }), "got: {err}");
}

#[test]
fn unknown_credential_field_is_a_parse_error() {
    let yaml = "credential:\n  type: secret\n  validty_years: 5\n";
    let err = parse_plan(yaml, Path::new("inline.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::YamlParse { .. }), "got: {err}");

    let yaml = "credential:\n  type: federated\n  issuer: https://oidc.example.com\n  subject: s\n  audiences: [x]\n";
    let err = parse_plan(yaml, Path::new("inline.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::YamlParse { .. }), "got: {err}");
}

#[test]
fn empty_role_list_fails_validation() {
    let yaml = "roles: []\ncredential:\n  type: secret\n";
    let err = parse_plan(yaml, Path::new("inline.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::Domain(_)), "got: {err}");
}

#[test]
fn missing_file_returns_error() {
    let path = Path::new("/nonexistent/path/profile.yml");
    assert!(matches!(load_plan(path), Err(ConfigError::Io { .. })));
}

#[test]
fn shipped_profiles_load() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../profiles");
    for name in ["secret.yml", "aws-role.yml", "kubernetes.yml"] {
        let path = dir.join(name);
        load_plan(&path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
    }
}
