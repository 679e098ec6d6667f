use chrono::{DateTime, Duration, Utc};
use image::RgbImage;
use shared::MethodKind;
use std::collections::HashMap;
use std::sync::Mutex;

use super::lifecycle::artifact_file_name;
use super::{validate_request_id, ImageStore, StoreError, SweepReport};

struct Entry<T> {
    value: T,
    created_at: DateTime<Utc>,
}

impl<T> Entry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            created_at: Utc::now(),
        }
    }
}

#[derive(Default)]
struct Inner {
    staged: HashMap<String, Entry<Vec<u8>>>,
    artifacts: HashMap<String, Entry<RgbImage>>,
    artifact_writes: usize,
}

/// In-process store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicking writer cannot leave an entry half-inserted.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn artifact(&self, path: &str) -> Option<RgbImage> {
        self.lock().artifacts.get(path).map(|e| e.value.clone())
    }

    pub fn artifact_count(&self) -> usize {
        self.lock().artifacts.len()
    }

    /// Total successful `write_artifact` calls, including overwrites.
    pub fn artifact_writes(&self) -> usize {
        self.lock().artifact_writes
    }
}

impl ImageStore for MemoryStore {
    fn stage(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        validate_request_id(id)?;
        self.lock().staged.insert(id.to_string(), Entry::new(bytes.to_vec()));
        Ok(())
    }

    fn read_staged(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        validate_request_id(id)?;
        self.lock()
            .staged
            .get(id)
            .map(|e| e.value.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn write_artifact(
        &self,
        id: &str,
        method: MethodKind,
        image: &RgbImage,
    ) -> Result<String, StoreError> {
        validate_request_id(id)?;
        let path = format!("memory/{}", artifact_file_name(id, method));
        let mut inner = self.lock();
        inner.artifacts.insert(path.clone(), Entry::new(image.clone()));
        inner.artifact_writes += 1;
        Ok(path)
    }

    fn sweep(&self, max_age: Duration, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let mut inner = self.lock();
        let staged_before = inner.staged.len();
        inner.staged.retain(|_, e| now - e.created_at <= max_age);
        let artifacts_before = inner.artifacts.len();
        inner.artifacts.retain(|_, e| now - e.created_at <= max_age);
        Ok(SweepReport {
            staged_removed: staged_before - inner.staged.len(),
            artifacts_removed: artifacts_before - inner.artifacts.len(),
        })
    }
}
