use chrono::{Duration, Utc};
use image::RgbImage;
use shared::MethodKind;
use std::sync::Arc;

use super::{ImageStore, StoreError, SweepReport};

// Roughly a century; keeps the conversion inside chrono's range.
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 3600;

pub fn artifact_file_name(id: &str, method: MethodKind) -> String {
    format!("{}_{}.png", id, method)
}

pub fn staged_file_name(id: &str) -> String {
    format!("{}.img", id)
}

/// Names, persists and expires explanation artifacts.
#[derive(Clone)]
pub struct ArtifactLifecycle {
    store: Arc<dyn ImageStore>,
    ttl: Duration,
}

impl ArtifactLifecycle {
    pub fn new(store: Arc<dyn ImageStore>, ttl_secs: u64) -> Self {
        Self {
            store,
            ttl: Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
        }
    }

    pub fn persist(
        &self,
        id: &str,
        method: MethodKind,
        image: &RgbImage,
    ) -> Result<String, StoreError> {
        let path = self.store.write_artifact(id, method, image)?;
        log::info!("Saved {} artifact to {}", method, path);
        Ok(path)
    }

    pub fn sweep(&self) -> Result<SweepReport, StoreError> {
        let report = self.store.sweep(self.ttl, Utc::now())?;
        if report.total() > 0 {
            log::info!(
                "Evicted {} staged images and {} artifacts older than {}s",
                report.staged_removed,
                report.artifacts_removed,
                self.ttl.num_seconds()
            );
        }
        Ok(report)
    }

    /// Sweep that only logs failures; used after requests.
    pub fn sweep_best_effort(&self) {
        if let Err(e) = self.sweep() {
            log::error!("Artifact sweep failed: {}", e);
        }
    }

    /// Periodic eviction on the actix runtime.
    pub fn spawn_sweeper(&self, every: std::time::Duration) -> actix_web::rt::task::JoinHandle<()> {
        let lifecycle = self.clone();
        actix_web::rt::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let lifecycle = lifecycle.clone();
                let sweep =
                    actix_web::rt::task::spawn_blocking(move || lifecycle.sweep_best_effort());
                if let Err(e) = sweep.await {
                    log::error!("Sweeper task failed: {}", e);
                }
            }
        })
    }
}
