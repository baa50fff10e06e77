use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info};

use crate::store::StateStore;
use crate::state_machine::{ActivePaths, Slot, StepAction, Transition};

/// Why a driver returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverExit {
    /// Every step finished and the path was deregistered.
    Completed,
    /// A stop was requested; the queue is left as checkpointed.
    Stopped,
}

/// Walks one path's queue to completion, checkpointing after every step.
pub struct PathDriver {
    slot: Slot,
    name: String,
    active: Arc<ActivePaths>,
    store: Arc<StateStore>,
    stop: Arc<AtomicBool>,
}

impl PathDriver {
    pub fn new(
        slot: Slot,
        name: impl Into<String>,
        active: Arc<ActivePaths>,
        store: Arc<StateStore>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            slot,
            name: name.into(),
            active,
            store,
            stop,
        }
    }

    pub async fn run(self) -> DriverExit {
        info!(path = %self.name, "Executing tasks");
        loop {
            if self.stop.load(Ordering::SeqCst) {
                info!(path = %self.name, "Stop requested, leaving remaining tasks for resume");
                return DriverExit::Stopped;
            }
            let Some(step) = self.active.head(self.slot) else {
                break;
            };

            // A stopped link is the only error that reaches here.
            if let Err(e) = step.robot.wait_for_connection().await {
                info!(path = %self.name, error = %e, "Robot link closed, halting path");
                return DriverExit::Stopped;
            }
            let outcome = match step.action() {
                StepAction::Dispatch => step.robot.dispatch(&step.label).await,
                StepAction::AwaitCompletion => step.robot.await_completion().await,
            };
            if let Err(e) = outcome {
                info!(path = %self.name, error = %e, "Robot link closed, halting path");
                return DriverExit::Stopped;
            }

            let transition = self.active.advance(self.slot);
            debug!(path = %self.name, robot = %step.robot.name(), ?transition, "Step advanced");
            let drained = matches!(transition, Transition::Drained(_) | Transition::Idle);
            if drained {
                self.active.remove(self.slot);
            }
            self.checkpoint().await;
            if drained {
                break;
            }
        }
        self.active.remove(self.slot);
        info!(path = %self.name, "All tasks done, path removed");
        DriverExit::Completed
    }

    async fn checkpoint(&self) {
        if let Err(e) = self.store.save(&self.active).await {
            error!(
                path = %self.name,
                file = %self.store.path().display(),
                error = %e,
                "Checkpoint failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::robot::{RobotRegistry, SimulatedTransporter};
    use crate::state_machine::{Path, PathSnapshot, PathSpec, StepRecord, StepStatus};

    fn transporter_only_path(registry: &RobotRegistry, steps: &[(&str, StepStatus)]) -> Path {
        let snapshot = PathSnapshot {
            spec: PathSpec {
                id: json!(1),
                name: "shuttle".into(),
                start_position: "HPLC".into(),
                end_position: "NMR".into(),
                action: json!("Move"),
                plate_number: json!(1),
            },
            task_queue: steps
                .iter()
                .map(|(label, status)| StepRecord("EM".into(), label.to_string(), *status))
                .collect(),
        };
        Path::from_snapshot(snapshot, registry).unwrap()
    }

    fn setup() -> (RobotRegistry, Arc<ActivePaths>, Arc<StateStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = RobotRegistry::new(
            Vec::new(),
            SimulatedTransporter::new("EM", Duration::from_millis(5)),
        );
        let store = Arc::new(StateStore::new(dir.path().join("state.json")));
        (registry, Arc::new(ActivePaths::new()), store, dir)
    }

    #[tokio::test]
    async fn completed_path_is_removed_and_absent_from_checkpoint() {
        let (registry, active, store, _dir) = setup();
        let path = transporter_only_path(
            &registry,
            &[("EM_to_HPLC", StepStatus::Pending), ("EM_HPLC_to_NMR", StepStatus::Pending)],
        );
        let stop = path.stop_flag();
        let slot = active.insert(path);

        let exit = PathDriver::new(slot, "shuttle", Arc::clone(&active), Arc::clone(&store), stop)
            .run()
            .await;

        assert_eq!(exit, DriverExit::Completed);
        assert!(active.is_empty());
        assert!(StateStore::read_snapshots(store.path()).unwrap().is_empty());
        assert_eq!(
            registry.transporter().history(),
            vec!["EM_to_HPLC", "EM_HPLC_to_NMR"]
        );
    }

    #[tokio::test]
    async fn in_flight_head_is_awaited_without_redispatch() {
        let (registry, active, store, _dir) = setup();
        let path = transporter_only_path(
            &registry,
            &[("EM_to_HPLC", StepStatus::InFlight), ("EM_HPLC_to_NMR", StepStatus::Pending)],
        );
        let stop = path.stop_flag();
        let slot = active.insert(path);

        PathDriver::new(slot, "shuttle", Arc::clone(&active), store, stop)
            .run()
            .await;

        assert_eq!(registry.transporter().history(), vec!["EM_HPLC_to_NMR"]);
    }

    #[tokio::test]
    async fn stop_flag_leaves_queue_untouched() {
        let (registry, active, store, _dir) = setup();
        let path = transporter_only_path(&registry, &[("EM_to_HPLC", StepStatus::Pending)]);
        path.request_stop();
        let stop = path.stop_flag();
        let slot = active.insert(path);

        let exit = PathDriver::new(slot, "shuttle", Arc::clone(&active), store, stop)
            .run()
            .await;

        assert_eq!(exit, DriverExit::Stopped);
        assert!(active.contains(slot));
        assert_eq!(active.head(slot).unwrap().status, StepStatus::Pending);
        assert!(registry.transporter().history().is_empty());
    }
}
