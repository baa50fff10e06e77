//! Durable checkpoint of every path that still has work.
//!
//! The whole document is rewritten on every step transition. Writes go to a
//! sibling temp file that is renamed over the target, and the snapshot is
//! taken under the same writer lock as the write, so the file on disk always
//! reflects the newest snapshot and is never half written.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path as FsPath, PathBuf};

use chrono::Local;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::robot::RobotRegistry;
use crate::state_machine::{ActivePaths, Path, PathSnapshot};

#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &FsPath {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    /// Writes every active path with steps left. Returns how many were saved.
    ///
    /// Every writer goes through here, so snapshot and write happen under
    /// one lock and an older snapshot never lands after a newer one.
    pub async fn save(&self, active: &ActivePaths) -> Result<usize> {
        let _guard = self.writer.lock().await;
        let snapshots = active.snapshots();
        let json = serde_json::to_vec_pretty(&snapshots)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(file = %self.path.display(), paths = snapshots.len(), "Checkpoint written");
        Ok(snapshots.len())
    }

    /// Reads a checkpoint without a running scheduler, as the `status`
    /// command does. A missing file is an empty checkpoint.
    pub fn read_snapshots(path: &FsPath) -> Result<Vec<PathSnapshot>> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self) -> Result<Vec<PathSnapshot>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Moves an unparseable checkpoint out of the way so the next save
    /// cannot overwrite it.
    async fn set_aside(&self) -> Result<PathBuf> {
        let mut target = self.path.clone().into_os_string();
        target.push(format!(".corrupt-{}", Local::now().format("%Y%m%d%H%M%S%3f")));
        let target = PathBuf::from(target);
        tokio::fs::rename(&self.path, &target).await?;
        Ok(target)
    }

    /// Rebuilds the paths saved before the last shutdown or crash.
    ///
    /// A missing file recovers nothing. A malformed file recovers nothing
    /// and is renamed to `<file>.corrupt-<timestamp>`. An unreadable file is
    /// logged and recovers nothing. A path naming an unregistered robot is
    /// logged and skipped; the others are recovered.
    pub async fn load(&self, registry: &RobotRegistry) -> Vec<Path> {
        let snapshots = match self.read().await {
            Ok(snapshots) => snapshots,
            Err(e @ SchedulerError::Json(_)) => {
                match self.set_aside().await {
                    Ok(kept) => error!(
                        file = %self.path.display(),
                        kept = %kept.display(),
                        error = %e,
                        "Malformed checkpoint set aside, starting without recovered paths"
                    ),
                    Err(rename) => error!(
                        file = %self.path.display(),
                        error = %e,
                        rename_error = %rename,
                        "Malformed checkpoint could not be set aside"
                    ),
                }
                return Vec::new();
            }
            Err(e) => {
                error!(
                    file = %self.path.display(),
                    error = %e,
                    "Could not read checkpoint, starting without recovered paths"
                );
                return Vec::new();
            }
        };

        let mut paths = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let name = snapshot.spec.name.clone();
            match Path::from_snapshot(snapshot, registry) {
                Ok(path) => paths.push(path),
                Err(e) => warn!(
                    path = %name,
                    kind = %e.kind(),
                    error = %e,
                    "Skipping unrecoverable path"
                ),
            }
        }
        info!(file = %self.path.display(), recovered = paths.len(), "Checkpoint loaded");
        paths
    }
}
