use super::*;

#[test]
fn validate_two_key_succeeds_with_two_active_keys() {
    let registry = Registry::new();
    let outcome = registry
        .validate_provider_strategy("bitwarden", "two-key")
        .expect("bitwarden supports two-key with max_active_keys=2");
    assert_eq!(outcome, ValidationOutcome::Valid);
}

#[test]
fn lookup_is_case_and_trim_insensitive() {
    let registry = Registry::new();
    let a = registry.get_provider_capability("Bitwarden").unwrap();
    let b = registry.get_provider_capability("  bitwarden  ").unwrap();
    assert_eq!(a.display_name, b.display_name);
}

#[test]
fn unknown_provider_is_reported() {
    let registry = Registry::new();
    let err = registry
        .validate_provider_strategy("no-such-backend", "immediate")
        .unwrap_err();
    assert_eq!(
        err,
        ValidationError::UnknownProvider("no-such-backend".to_string())
    );
}

#[test]
fn unknown_strategy_is_reported() {
    let registry = Registry::new();
    let err = registry
        .validate_provider_strategy("bitwarden", "no-such-strategy")
        .unwrap_err();
    assert_eq!(
        err,
        ValidationError::UnknownStrategy("no-such-strategy".to_string())
    );
}

#[test]
fn get_recommended_strategy_falls_back_to_immediate() {
    let registry = Registry::new();
    assert_eq!(
        registry.get_recommended_strategy("no-such-backend"),
        "immediate"
    );
    assert_eq!(registry.get_recommended_strategy("bitwarden"), "two-key");
}

#[test]
fn supports_strategy_unknown_provider_only_true_for_immediate() {
    let registry = Registry::new();
    assert!(registry.supports_strategy("no-such-backend", "immediate"));
    assert!(!registry.supports_strategy("no-such-backend", "two-key"));
}

#[test]
fn get_max_active_keys_matches_sentinel_rules() {
    let registry = Registry::new();
    assert_eq!(registry.get_max_active_keys("aws-secrets-manager"), -1);
    assert_eq!(registry.get_max_active_keys("bitwarden"), 2);
    assert_eq!(registry.get_max_active_keys("no-such-backend"), 0);
}

#[test]
fn requirement_unmet_is_reported_with_cause() {
    let registry = Registry::new();
    // static-file caps at one active key, so two-key's requirement fails
    // before recommendation is even considered.
    let err = registry
        .validate_provider_strategy("static-file", "two-key")
        .unwrap_err();
    assert!(matches!(err, ValidationError::RequirementUnmet(_)));
}

#[test]
fn not_recommended_strategy_is_reported_when_requirement_met_but_unlisted() {
    let registry = Registry::new();
    // gcp-secret-manager has unlimited active keys (two-key's requirement
    // is satisfied) but does not list two-key among its recommendations.
    let err = registry
        .validate_provider_strategy("gcp-secret-manager", "two-key")
        .unwrap_err();
    assert_eq!(
        err,
        ValidationError::NotRecommended {
            provider: "gcp-secret-manager".to_string(),
            strategy: "two-key".to_string(),
        }
    );
}

#[test]
fn high_downtime_risk_strategy_validates_with_a_warning() {
    let registry = Registry::new();
    let outcome = registry
        .validate_provider_strategy("bitwarden", "forced-overwrite")
        .expect("forced-overwrite has no unmet requirements");
    assert!(matches!(outcome, ValidationOutcome::ValidWithWarning(_)));
}

#[test]
fn global_registry_is_a_stable_singleton() {
    let first = global().get_recommended_strategy("bitwarden");
    let second = global().get_recommended_strategy("bitwarden");
    assert_eq!(first, second);
}

#[test]
fn repeated_queries_reuse_the_loaded_catalog() {
    let registry = Registry::new();
    let first = registry.get_provider_capability("bitwarden").unwrap();
    let second = registry.get_provider_capability("bitwarden").unwrap();
    assert_eq!(first.display_name, second.display_name);
}
