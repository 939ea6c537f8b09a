use std::fs;

use chalice_bundle_core::artifact::{content_key, ArtifactLocator, LocalAssetStore};
use chalice_bundle_core::FailureKind;
use tempfile::tempdir;

#[tokio::test]
async fn local_store_copies_archive_under_content_addressed_key() {
    let scratch = tempdir().unwrap();
    let archive = scratch.path().join("deployment.zip");
    fs::write(&archive, b"PK\x03\x04 fake zip").unwrap();
    let store = LocalAssetStore::new(scratch.path().join("staging"), "cdk-assets");
    let locator = ArtifactLocator::new(store);

    let reference = locator.locate(&archive).await.expect("locate should succeed");

    assert_eq!(reference.location, "cdk-assets");
    assert!(reference.key.ends_with(".zip"));
    assert_eq!(reference.key.len(), 64 + ".zip".len());
    let stored = locator.store().object_path(&reference.key);
    assert_eq!(fs::read(stored).unwrap(), fs::read(&archive).unwrap());
}

#[test]
fn content_key_depends_only_on_content() {
    let scratch = tempdir().unwrap();
    let a = scratch.path().join("a.zip");
    let b = scratch.path().join("b.zip");
    let c = scratch.path().join("c.zip");
    fs::write(&a, b"same").unwrap();
    fs::write(&b, b"same").unwrap();
    fs::write(&c, b"different").unwrap();

    assert_eq!(content_key(&a).unwrap(), content_key(&b).unwrap());
    assert_ne!(content_key(&a).unwrap(), content_key(&c).unwrap());
    assert_eq!(
        content_key(&a).unwrap(),
        // sha256("same")
        "0967115f2813a3541eaef77de9d9d5773f1c0c04314b0bbfe4ff3b3b1c55b5d5.zip"
    );
}

#[tokio::test]
async fn missing_archive_is_upload_failed() {
    let scratch = tempdir().unwrap();
    let locator = ArtifactLocator::new(LocalAssetStore::new(scratch.path(), "bucket"));

    let err = locator
        .locate(&scratch.path().join("deployment.zip"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::UploadFailed);
}
