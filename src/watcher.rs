//! Admits paths from JSON documents dropped into the input directory.

use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::scheduler::SchedulerCore;

/// Filesystem trigger for admission. Dropping it stops watching.
pub struct AdmissionWatcher {
    dir: PathBuf,
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

fn is_admission_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    )
}

fn is_json(path: &FsPath) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

impl AdmissionWatcher {
    /// Watches `dir` (created if missing) and admits every new `*.json`
    /// file after `settle` has passed, so writers can finish first.
    pub fn start(
        dir: impl Into<PathBuf>,
        core: &Arc<SchedulerCore>,
        settle: Duration,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_admission_event(&event) => {
                for path in event.paths.into_iter().filter(|p| is_json(p)) {
                    // The receiver only goes away when the watcher stops.
                    let _ = tx.send(path);
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Watch error"),
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "Watching for admission documents");

        // Weak so a forgotten watcher does not keep the scheduler alive.
        let core: Weak<SchedulerCore> = Arc::downgrade(core);
        let task = tokio::spawn(async move {
            while let Some(file) = rx.recv().await {
                debug!(file = %file.display(), "Admission document detected");
                sleep(settle).await;
                let Some(core) = core.upgrade() else {
                    break;
                };
                match core.admit_file(&file).await {
                    Ok(admitted) => info!(file = %file.display(), admitted, "Admission document processed"),
                    Err(e) => error!(file = %file.display(), error = %e, "Could not admit document"),
                }
            }
        });

        Ok(Self {
            dir,
            _watcher: watcher,
            task,
        })
    }

    pub fn stop(self) {
        self.task.abort();
        info!(dir = %self.dir.display(), "Stopped watching for admission documents");
    }
}
