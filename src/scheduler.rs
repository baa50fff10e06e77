use std::path::Path as FsPath;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::{SchedulerConfig, load_robot_setup};
use crate::driver::{DriverExit, PathDriver};
use crate::error::Result;
use crate::robot::{RobotLink, RobotRegistry, SimulatedTransporter};
use crate::state_machine::{ActivePaths, AdmissionDocument, Path, PathSnapshot};
use crate::status::{Connectivity, StatusRow};
use crate::store::StateStore;
use crate::watcher::AdmissionWatcher;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the robots, the active paths and the checkpoint, and runs one
/// driver task per path.
pub struct SchedulerCore {
    registry: Arc<RobotRegistry>,
    store: Arc<StateStore>,
    active: Arc<ActivePaths>,
    drivers: Mutex<JoinSet<()>>,
    watcher: Mutex<Option<AdmissionWatcher>>,
    shutdown_grace: Duration,
}

impl SchedulerCore {
    /// Starts every configured robot link and resumes checkpointed paths.
    ///
    /// Fails only if the robot setup file is missing or malformed. A link
    /// that cannot bind is logged and stays registered without ever
    /// connecting, so paths that need it wait instead of being dropped.
    pub async fn start(config: &SchedulerConfig) -> Result<Arc<Self>> {
        let setup = load_robot_setup(&config.robot_setup_file)?;
        info!(file = %config.robot_setup_file.display(), robots = setup.len(), "Robot setup loaded");

        let mut links = Vec::with_capacity(setup.len());
        for entry in &setup {
            let link = RobotLink::new(entry, config.poll_interval());
            if let Err(e) = link.start().await {
                error!(robot = %entry.name, kind = %e.kind(), error = %e, "Robot link unavailable");
            }
            links.push(link);
        }

        let transporter =
            SimulatedTransporter::new(&config.transporter_name, config.transporter_latency());
        let registry = RobotRegistry::new(links, transporter);
        let store = StateStore::new(&config.state_file);
        Ok(Self::with_registry(registry, store, config.shutdown_grace()).await)
    }

    /// Builds a scheduler around already started robots and resumes the
    /// paths found in `store`.
    pub async fn with_registry(
        registry: RobotRegistry,
        store: StateStore,
        shutdown_grace: Duration,
    ) -> Arc<Self> {
        let core = Arc::new(Self {
            registry: Arc::new(registry),
            store: Arc::new(store),
            active: Arc::new(ActivePaths::new()),
            drivers: Mutex::new(JoinSet::new()),
            watcher: Mutex::new(None),
            shutdown_grace,
        });

        let recovered = core.store.load(&core.registry).await;
        for path in recovered {
            info!(path = %path.name(), status = ?path.head_status(), "Resuming path");
            core.spawn_driver(path);
        }
        core
    }

    pub fn registry(&self) -> &RobotRegistry {
        &self.registry
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Checkpoint view of the active paths.
    pub fn active_paths(&self) -> Vec<PathSnapshot> {
        self.active.snapshots()
    }

    fn spawn_driver(&self, path: Path) {
        let name = path.name().to_string();
        let stop = path.stop_flag();
        let slot = self.active.insert(path);
        let driver = PathDriver::new(
            slot,
            name.clone(),
            Arc::clone(&self.active),
            Arc::clone(&self.store),
            stop,
        );

        let mut drivers = lock(&self.drivers);
        while let Some(finished) = drivers.try_join_next() {
            if let Err(e) = finished {
                error!(error = %e, "Path driver panicked");
            }
        }
        drivers.spawn(async move {
            match driver.run().await {
                DriverExit::Completed => info!(path = %name, "Path completed"),
                DriverExit::Stopped => info!(path = %name, "Path halted"),
            }
        });
    }

    /// Admits every path in `document` and starts driving it.
    ///
    /// A path naming an unknown position is logged and skipped. Returns how
    /// many paths were admitted.
    pub fn admit(&self, document: AdmissionDocument) -> usize {
        let mut admitted = 0;
        for spec in document.paths {
            let name = spec.name.clone();
            match Path::new(spec, &self.registry) {
                Ok(path) => {
                    info!(path = %name, "Path admitted");
                    self.spawn_driver(path);
                    admitted += 1;
                }
                Err(e) => warn!(path = %name, kind = %e.kind(), error = %e, "Path rejected"),
            }
        }
        admitted
    }

    /// Reads an admission document from disk and admits it.
    pub async fn admit_file(&self, file: &FsPath) -> Result<usize> {
        info!(file = %file.display(), "Loading admission document");
        let contents = tokio::fs::read_to_string(file).await?;
        let document: AdmissionDocument = serde_json::from_str(&contents)?;
        Ok(self.admit(document))
    }

    /// Hands the admission trigger to the scheduler so shutdown can stop it.
    pub fn attach_watcher(&self, watcher: AdmissionWatcher) {
        if let Some(previous) = lock(&self.watcher).replace(watcher) {
            previous.stop();
        }
    }

    /// Connectivity of every robot and the first active path addressed to it.
    /// Arms come first by name, the transporter last.
    pub fn status(&self) -> Vec<StatusRow> {
        let mut rows: Vec<StatusRow> = self
            .registry
            .links()
            .map(|link| {
                let connectivity = match link.is_connected() {
                    Ok(true) => Connectivity::Connected,
                    Ok(false) => Connectivity::NotConnected,
                    Err(e) => {
                        warn!(robot = %link.name(), error = %e, "Liveness probe failed");
                        Connectivity::NotConnected
                    }
                };
                StatusRow {
                    robot: link.name().to_string(),
                    connectivity,
                    path: self.active.first_path_for(link.name()),
                }
            })
            .collect();

        let transporter = self.registry.transporter().name();
        rows.push(StatusRow {
            robot: transporter.to_string(),
            connectivity: Connectivity::Simulated,
            path: self.active.first_path_for(transporter),
        });
        rows
    }

    /// Stops drivers, links and the watcher, in that order, then waits up to
    /// the grace period for drivers to return.
    ///
    /// Stopping is cooperative: a driver in the middle of a transporter move
    /// finishes that move first, and anything still running after the grace
    /// period is abandoned. Unfinished paths stay in the checkpoint.
    pub async fn shutdown(&self) {
        let signalled = self.active.request_stop_all();
        info!(paths = signalled, "Stopping all paths");

        self.registry.stop_all();

        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.stop();
        }

        let mut drivers = std::mem::take(&mut *lock(&self.drivers));
        let drained = timeout(self.shutdown_grace, async {
            while drivers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = drivers.len(),
                "Drivers still running after grace period"
            );
            drivers.abort_all();
        }
        info!("Scheduler stopped");
    }
}
