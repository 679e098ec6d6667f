mod common;

use chrono::{Duration, Utc};
use std::sync::Arc;

use common::{context, gradient, png_bytes, BrightnessOracle};
use xai_backend::config::AppConfig;
use xai_backend::explain::Explainer;
use xai_backend::storage::{FsStore, ImageStore};

#[test]
fn explanation_artifacts_land_on_disk_as_pngs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FsStore::new(
        dir.path().join("temp_images"),
        dir.path().join("explanation_images"),
    )
    .expect("store");
    let store = Arc::new(store);
    let ctx = context(AppConfig::default(), Arc::new(BrightnessOracle::default()), store.clone());
    store.stage("disk1", &png_bytes(&gradient(224))).expect("stage");

    let bundle = Explainer::new(ctx).explain("disk1", "Psoriasis").expect("explain");

    for (path, file) in [
        (&bundle.artifacts.lime, "disk1_lime.png"),
        (&bundle.artifacts.occlusion, "disk1_occlusion.png"),
        (&bundle.artifacts.shap, "disk1_shap.png"),
    ] {
        assert_eq!(path, &format!("explanation_images/{}", file));
        let decoded = image::open(store.artifact_dir().join(file)).expect("valid png");
        assert_eq!((decoded.width(), decoded.height()), (224, 224));
    }
}

#[test]
fn swept_requests_can_no_longer_be_explained() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FsStore::new(
        dir.path().join("temp_images"),
        dir.path().join("explanation_images"),
    )
    .expect("store");
    let store = Arc::new(store);
    let ctx = context(AppConfig::default(), Arc::new(BrightnessOracle::default()), store.clone());
    store.stage("old1", &png_bytes(&gradient(32))).expect("stage");

    let report = store
        .sweep(Duration::seconds(3600), Utc::now() + Duration::seconds(7200))
        .expect("sweep");
    assert_eq!(report.staged_removed, 1);

    let result = Explainer::new(ctx).explain("old1", "Eczema");
    assert!(matches!(
        result,
        Err(xai_backend::explain::orchestrator::ExplainError::NotFound(_))
    ));
}
