use chrono::{DateTime, Duration, Utc};
use image::{ImageFormat, RgbImage};
use shared::MethodKind;
use std::io::{Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::lifecycle::{artifact_file_name, staged_file_name};
use super::{validate_request_id, ImageStore, StoreError, SweepReport};

/// Directory-backed store: one directory for staged uploads, one for
/// generated artifacts.
#[derive(Clone)]
pub struct FsStore {
    staging_dir: PathBuf,
    artifact_dir: PathBuf,
}

impl FsStore {
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        artifact_dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let store = Self {
            staging_dir: staging_dir.into(),
            artifact_dir: artifact_dir.into(),
        };
        std::fs::create_dir_all(&store.staging_dir)?;
        std::fs::create_dir_all(&store.artifact_dir)?;
        Ok(store)
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    fn staged_path(&self, id: &str) -> PathBuf {
        self.staging_dir.join(staged_file_name(id))
    }

    /// Prefix returned to callers instead of the absolute artifact location.
    fn artifact_prefix(&self) -> String {
        self.artifact_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "explanation_images".to_string())
    }
}

/// Writes into a unique sibling temp file, then renames over the target.
fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));

    let result = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, target)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn sweep_dir(dir: &Path, max_age: Duration, now: DateTime<Utc>) -> Result<usize, StoreError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        // Another sweeper or a writer may remove or replace entries under us.
        let metadata = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let modified: DateTime<Utc> = match metadata.modified() {
            Ok(t) => t.into(),
            Err(_) => continue,
        };
        if now - modified <= max_age {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Deleted old file: {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::error!("Error deleting file {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

impl ImageStore for FsStore {
    fn stage(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        validate_request_id(id)?;
        let path = self.staged_path(id);
        write_atomic(&path, bytes)?;
        log::info!("Saved image to {}", path.display());
        Ok(())
    }

    fn read_staged(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        validate_request_id(id)?;
        match std::fs::read(self.staged_path(id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn write_artifact(
        &self,
        id: &str,
        method: MethodKind,
        image: &RgbImage,
    ) -> Result<String, StoreError> {
        validate_request_id(id)?;
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png)?;

        let file_name = artifact_file_name(id, method);
        write_atomic(&self.artifact_dir.join(&file_name), buf.get_ref())?;
        Ok(format!("{}/{}", self.artifact_prefix(), file_name))
    }

    fn sweep(&self, max_age: Duration, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        Ok(SweepReport {
            staged_removed: sweep_dir(&self.staging_dir, max_age, now)?,
            artifacts_removed: sweep_dir(&self.artifact_dir, max_age, now)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn store() -> (tempfile::TempDir, FsStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let staging = dir.path().join("temp_images");
        let store = FsStore::new(staging, dir.path().join("explanation_images")).expect("store");
        (dir, store)
    }

    #[test]
    fn staged_bytes_round_trip() {
        let (_dir, store) = store();
        store.stage("req1", b"payload").expect("stage");
        assert_eq!(store.read_staged("req1").expect("read"), b"payload");
    }

    #[test]
    fn missing_staged_image_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(store.read_staged("nope"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.read_staged("../x"), Err(StoreError::InvalidId(_))));
    }

    #[test]
    fn artifacts_get_relative_paths_and_leave_no_temp_files() {
        let (_dir, store) = store();
        let img = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let path = store.write_artifact("req1", MethodKind::Shap, &img).expect("write");
        assert_eq!(path, "explanation_images/req1_shap.png");

        let names: Vec<String> = std::fs::read_dir(store.artifact_dir())
            .expect("list")
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["req1_shap.png".to_string()]);

        let decoded = image::open(store.artifact_dir().join("req1_shap.png")).expect("decode");
        assert_eq!(decoded.to_rgb8(), img);
    }

    #[test]
    fn sweep_removes_only_expired_files() {
        let (_dir, store) = store();
        store.stage("old", b"a").expect("stage");
        let img = RgbImage::new(2, 2);
        store.write_artifact("old", MethodKind::Lime, &img).expect("write");

        let fresh = store.sweep(Duration::seconds(3600), Utc::now()).expect("sweep");
        assert_eq!(fresh.total(), 0);

        let later = Utc::now() + Duration::seconds(7200);
        let report = store.sweep(Duration::seconds(3600), later).expect("sweep");
        assert_eq!(report.staged_removed, 1);
        assert_eq!(report.artifacts_removed, 1);
        assert!(matches!(store.read_staged("old"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn sweep_tolerates_missing_directories() {
        let (dir, store) = store();
        std::fs::remove_dir_all(dir.path().join("temp_images")).expect("remove");
        let report = store
            .sweep(Duration::seconds(1), Utc::now() + Duration::seconds(10))
            .expect("sweep");
        assert_eq!(report.staged_removed, 0);
    }
}
