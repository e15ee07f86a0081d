#[cfg(test)]
mod tests {
    use crate::types::*;
    use crate::DomainError;

    fn secret_plan() -> ProvisionPlan {
        ProvisionPlan {
            app_display_name: "evidence-reader".into(),
            roles: vec!["Reader".into()],
            graph_permissions: vec![],
            credential: CredentialStrategy::Secret(SecretPolicy {
                display_name: "evidence-collector".into(),
                validity_years: 2,
            }),
        }
    }

    #[test]
    fn subscription_id_normalises_guid() {
        let id: SubscriptionId = " 0B1F6471-1BF0-4DDA-AEC3-CB9272F09590 ".parse().unwrap();
        assert_eq!(id.as_str(), "0b1f6471-1bf0-4dda-aec3-cb9272f09590");
        assert_eq!(id.scope(), "/subscriptions/0b1f6471-1bf0-4dda-aec3-cb9272f09590");
    }

    #[test]
    fn subscription_id_rejects_garbage() {
        let err = "my-subscription".parse::<SubscriptionId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidSubscriptionId(_)));
    }

    #[test]
    fn workload_subjects() {
        assert_eq!(
            kubernetes_subject("evidence", "collector"),
            "system:serviceaccount:evidence:collector"
        );
        assert_eq!(
            aws_assumed_role_subject("123456789012", "EvidenceCollector"),
            "arn:aws:sts::123456789012:assumed-role/EvidenceCollector/*"
        );
    }

    #[test]
    fn federated_trust_defaults_audience() {
        let t = FederatedTrust::new(
            "vendor-k8s",
            "https://oidc.example.com/cluster",
            "system:serviceaccount:ns:sa",
            None,
        )
        .unwrap();
        assert_eq!(t.audience, TOKEN_EXCHANGE_AUDIENCE);
    }

    #[test]
    fn federated_trust_rejects_plain_http_issuer() {
        let err = FederatedTrust::new("vendor", "http://oidc.example.com", "sub", None).unwrap_err();
        assert!(matches!(err, DomainError::InvalidIssuer(_)));
    }

    #[test]
    fn federated_trust_rejects_bad_name() {
        for name in ["ab", "-leading-dash", "has space", &"x".repeat(121)] {
            let err = FederatedTrust::new(name, "https://issuer", "sub", None).unwrap_err();
            assert!(matches!(err, DomainError::InvalidCredentialName(_)), "{name}");
        }
    }

    #[test]
    fn federated_trust_name_length_bounds() {
        for name in ["abc".to_string(), "x".repeat(120)] {
            assert!(FederatedTrust::new(name.as_str(), "https://issuer", "sub", None).is_ok(), "{name}");
        }
    }

    #[test]
    fn federated_trust_rejects_blank_subject() {
        let err = FederatedTrust::new("vendor", "https://issuer", "  ", None).unwrap_err();
        assert!(matches!(err, DomainError::Empty { field: "subject" }));
    }

    #[test]
    fn plan_requires_roles() {
        let mut plan = secret_plan();
        assert!(plan.validate().is_ok());
        plan.roles.clear();
        assert!(plan.validate().is_err());
    }

    #[test]
    fn zero_year_secret_is_rejected() {
        let mut plan = secret_plan();
        plan.credential = CredentialStrategy::Secret(SecretPolicy {
            display_name: "s".into(),
            validity_years: 0,
        });
        assert!(matches!(plan.validate(), Err(DomainError::InvalidValidity(0))));
    }

    #[test]
    fn strategy_serde_is_tagged() {
        let v = serde_json::to_value(&secret_plan().credential).unwrap();
        assert_eq!(v["type"], "secret");
        assert_eq!(v["validity_years"], 2);
    }
}
