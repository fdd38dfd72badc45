//! Integration tests for on-disk servable discovery and registry lifecycle.

#[allow(dead_code)]
mod common;

use servio::config::RegistryConfig;
use servio::servable::registry::{ServableRegistry, ServableStatus};

fn registry_for(root: &std::path::Path) -> ServableRegistry {
    ServableRegistry::new(RegistryConfig {
        model_root: root.to_path_buf(),
        ..RegistryConfig::default()
    })
}

#[tokio::test]
async fn test_scan_registers_discovered_versions() {
    let dir = tempfile::tempdir().unwrap();
    common::write_classifier(dir.path(), "resnet50", &[1, 2, 3]);
    common::write_classifier(dir.path(), "bert", &[1]);

    let registry = registry_for(dir.path());
    let added = registry.scan().await.unwrap();
    assert_eq!(added, 4);

    let models = registry.list_models().await;
    assert_eq!(models, vec!["bert".to_string(), "resnet50".to_string()]);

    let latest = registry.get_latest("resnet50").await.unwrap();
    assert_eq!(latest.version, 3);
    assert_eq!(latest.status, ServableStatus::Ready);
    assert!(latest.artifact_path.ends_with("resnet50/3/model.mindir"));
}

#[tokio::test]
async fn test_rescan_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    common::write_classifier(dir.path(), "resnet50", &[1]);

    let registry = registry_for(dir.path());
    assert_eq!(registry.scan().await.unwrap(), 1);
    assert_eq!(registry.scan().await.unwrap(), 0);

    // A version added on disk is picked up by the next scan
    common::write_classifier(dir.path(), "resnet50", &[1, 2]);
    assert_eq!(registry.scan().await.unwrap(), 1);

    let versions = registry.list_versions("resnet50").await;
    assert_eq!(versions.len(), 2);
}

#[tokio::test]
async fn test_scan_skips_malformed_servables() {
    let dir = tempfile::tempdir().unwrap();
    common::write_classifier(dir.path(), "good", &[1]);

    // Bad manifest JSON
    let bad = dir.path().join("bad");
    std::fs::create_dir_all(bad.join("1")).unwrap();
    std::fs::write(bad.join("servable.json"), "{not json").unwrap();
    std::fs::write(bad.join("1").join("model.mindir"), b"x").unwrap();

    let registry = registry_for(dir.path());
    assert_eq!(registry.scan().await.unwrap(), 1);
    assert_eq!(registry.list_models().await, vec!["good".to_string()]);
}

#[tokio::test]
async fn test_deploy_lifecycle_after_scan() {
    let dir = tempfile::tempdir().unwrap();
    common::write_classifier(dir.path(), "resnet50", &[1, 2]);

    let registry = registry_for(dir.path());
    registry.scan().await.unwrap();

    registry.deploy("resnet50", 1).await.unwrap();
    assert_eq!(registry.get_deployed("resnet50").await.unwrap().version, 1);

    // Unpinned resolution follows the deployment
    assert_eq!(registry.resolve("resnet50", None).await.unwrap().version, 1);

    registry.deprecate("resnet50", 2).await.unwrap();
    let v2 = registry.get("resnet50", Some(2)).await.unwrap();
    assert_eq!(v2.status, ServableStatus::Deprecated);

    let stats = registry.stats();
    assert_eq!(stats.models_registered, 1);
    assert_eq!(stats.total_versions, 2);
    assert_eq!(stats.models_deployed, 1);
}

#[tokio::test]
async fn test_scan_missing_root_fails() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_for(&dir.path().join("missing"));
    assert!(registry.scan().await.is_err());
}
