pub mod fs_store;
pub mod lifecycle;
pub mod memory_store;

use chrono::{DateTime, Duration, Utc};
use image::RgbImage;
use shared::MethodKind;

pub use fs_store::FsStore;
pub use memory_store::MemoryStore;

const MAX_ID_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No staged image for request {0}")]
    NotFound(String),
    #[error("Invalid request id: {0:?}")]
    InvalidId(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image encode error: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub staged_removed: usize,
    pub artifacts_removed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.staged_removed + self.artifacts_removed
    }
}

/// Staged uploads and generated artifacts, namespaced by request id.
///
/// Writes must be all-or-nothing: a reader never observes a partial file.
/// Entries may vanish at any time through `sweep`, so a read racing an
/// eviction reports `NotFound`.
pub trait ImageStore: Send + Sync {
    fn stage(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError>;

    fn read_staged(&self, id: &str) -> Result<Vec<u8>, StoreError>;

    /// Persists an overlay and returns its caller-facing relative path.
    fn write_artifact(
        &self,
        id: &str,
        method: MethodKind,
        image: &RgbImage,
    ) -> Result<String, StoreError>;

    /// Removes staged images and artifacts older than `max_age` at `now`.
    fn sweep(&self, max_age: Duration, now: DateTime<Utc>) -> Result<SweepReport, StoreError>;
}

/// Request ids become file names, so only a conservative alphabet is allowed.
pub fn validate_request_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_restricted() {
        assert!(validate_request_id("ab12cd34").is_ok());
        assert!(validate_request_id("a-b_C9").is_ok());
        assert!(validate_request_id("").is_err());
        assert!(validate_request_id("../etc/passwd").is_err());
        assert!(validate_request_id("a/b").is_err());
        assert!(validate_request_id(&"x".repeat(65)).is_err());
    }
}
