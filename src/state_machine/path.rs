use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::queue::{StepStatus, TaskQueue, TaskStep};
use crate::error::Result;
use crate::robot::{Robot, RobotRegistry};

/// The job attributes shared by admission documents and checkpoints.
///
/// `ID`, `Action` and `PlateNumber` are kept as the JSON values they
/// arrived as; the scheduler never interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSpec {
    #[serde(rename = "ID")]
    pub id: Value,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "StartPosition")]
    pub start_position: String,
    #[serde(rename = "EndPosition")]
    pub end_position: String,
    #[serde(rename = "Action", default)]
    pub action: Value,
    #[serde(rename = "PlateNumber", default)]
    pub plate_number: Value,
}

/// A batch of jobs dropped into the input directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionDocument {
    pub paths: Vec<PathSpec>,
}

/// Persisted form of a step: `[robotName, taskLabel, status]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord(pub String, pub String, pub StepStatus);

/// Persisted form of a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSnapshot {
    #[serde(flatten)]
    pub spec: PathSpec,
    #[serde(rename = "TaskQueue")]
    pub task_queue: Vec<StepRecord>,
}

/// One plate transfer and the steps left to finish it.
#[derive(Debug)]
pub struct Path {
    pub spec: PathSpec,
    pub queue: TaskQueue,
    stop: Arc<AtomicBool>,
}

impl Path {
    /// Builds a fresh path from the four-step transfer template:
    /// move the transporter to the start, place, carry to the end, pick.
    pub fn new(spec: PathSpec, registry: &RobotRegistry) -> Result<Self> {
        let transporter = registry.transporter();
        let t = transporter.name();
        let (start, end) = (&spec.start_position, &spec.end_position);

        let carrier = Robot::Simulated(transporter.clone());
        let queue = TaskQueue::new([
            TaskStep::pending(carrier.clone(), format!("{t}_to_{start}")),
            TaskStep::pending(registry.robot_at(start)?, "Place"),
            TaskStep::pending(carrier, format!("{t}_{start}_to_{end}")),
            TaskStep::pending(registry.robot_at(end)?, "Pick"),
        ]);
        Ok(Self::with_queue(spec, queue))
    }

    /// Rebuilds a path from a checkpoint, keeping queue order and statuses.
    pub fn from_snapshot(snapshot: PathSnapshot, registry: &RobotRegistry) -> Result<Self> {
        let steps = snapshot
            .task_queue
            .into_iter()
            .map(|StepRecord(robot, label, status)| {
                Ok(TaskStep {
                    robot: registry.resolve(&robot)?,
                    label,
                    status,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::with_queue(snapshot.spec, TaskQueue::new(steps)))
    }

    fn with_queue(spec: PathSpec, queue: TaskQueue) -> Self {
        Self {
            spec,
            queue,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn snapshot(&self) -> PathSnapshot {
        PathSnapshot {
            spec: self.spec.clone(),
            task_queue: self
                .queue
                .iter()
                .map(|step| {
                    StepRecord(step.robot.name().to_string(), step.label.clone(), step.status)
                })
                .collect(),
        }
    }

    /// Shared flag the driver checks between steps.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether any remaining step is addressed to `robot`.
    pub fn involves(&self, robot: &str) -> bool {
        self.queue.iter().any(|step| step.robot.name() == robot)
    }

    pub fn head_status(&self) -> Option<StepStatus> {
        self.queue.head().map(|step| step.status)
    }
}
