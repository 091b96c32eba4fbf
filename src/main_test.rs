use super::*;

#[test]
fn demo_service_has_one_canary_labeled_instance() {
    let service = demo_service();
    let canaries: Vec<&Instance> = service
        .instances
        .iter()
        .filter(|i| i.labels.get("canary").map(String::as_str) == Some("true"))
        .collect();
    assert_eq!(canaries.len(), 1);
    assert_eq!(canaries[0].id, "checkout-1");
}

#[tokio::test]
async fn logging_apply_always_succeeds() {
    let service = demo_service();
    let instance = service.instances[0].clone();
    LoggingApply.apply(&service, &instance).await.expect("demo apply succeeds");
}

#[tokio::test]
async fn noop_restorer_restores_and_verifies() {
    let restorer = NoopRestorer;
    restorer.restore("checkout", "staging").await.expect("restore succeeds");
    let healthy = restorer.verify("checkout", "staging").await.expect("verify succeeds");
    assert!(healthy);
}
