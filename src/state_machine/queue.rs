use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::robot::Robot;

/// Progress of a step still in the queue. A finished step is simply gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    #[serde(alias = "NotDone")]
    Pending,
    #[serde(alias = "IsDoing")]
    InFlight,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "Pending"),
            StepStatus::InFlight => write!(f, "InFlight"),
        }
    }
}

/// One task addressed to one robot.
#[derive(Debug, Clone)]
pub struct TaskStep {
    pub robot: Robot,
    /// Sent verbatim to the robot; controller firmware matches on it.
    pub label: String,
    pub status: StepStatus,
}

impl TaskStep {
    pub fn pending(robot: Robot, label: impl Into<String>) -> Self {
        Self {
            robot,
            label: label.into(),
            status: StepStatus::Pending,
        }
    }

    /// What the driver has to do next for this step.
    pub fn action(&self) -> StepAction {
        match self.status {
            StepStatus::Pending => StepAction::Dispatch,
            StepStatus::InFlight => StepAction::AwaitCompletion,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Dispatch,
    AwaitCompletion,
}

/// The result of advancing the queue head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The head was sent and is now in flight.
    Dispatched(String),
    /// The head finished and was removed; more steps remain.
    Completed(String),
    /// The head finished and was the last step.
    Drained(String),
    /// Nothing left to advance.
    Idle,
}

/// Ordered steps of one path. Only the head ever changes.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    steps: VecDeque<TaskStep>,
}

impl TaskQueue {
    pub fn new(steps: impl IntoIterator<Item = TaskStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    pub fn head(&self) -> Option<&TaskStep> {
        self.steps.front()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskStep> {
        self.steps.iter()
    }

    /// Moves the head one step along: Pending becomes InFlight, InFlight is
    /// popped.
    pub fn advance(&mut self) -> Transition {
        let Some(head) = self.steps.front_mut() else {
            return Transition::Idle;
        };
        match head.status {
            StepStatus::Pending => {
                head.status = StepStatus::InFlight;
                Transition::Dispatched(head.label.clone())
            }
            StepStatus::InFlight => {
                let done = self.steps.pop_front().map(|s| s.label).unwrap_or_default();
                if self.steps.is_empty() {
                    Transition::Drained(done)
                } else {
                    Transition::Completed(done)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::robot::SimulatedTransporter;

    fn em() -> Robot {
        Robot::Simulated(SimulatedTransporter::new("EM", Duration::from_millis(1)))
    }

    #[test]
    fn advance_walks_every_step() {
        let mut queue = TaskQueue::new([
            TaskStep::pending(em(), "EM_to_HPLC"),
            TaskStep::pending(em(), "EM_HPLC_to_NMR"),
        ]);

        assert_eq!(queue.head().unwrap().action(), StepAction::Dispatch);
        assert_eq!(queue.advance(), Transition::Dispatched("EM_to_HPLC".into()));
        assert_eq!(queue.head().unwrap().status, StepStatus::InFlight);
        assert_eq!(queue.head().unwrap().action(), StepAction::AwaitCompletion);

        assert_eq!(queue.advance(), Transition::Completed("EM_to_HPLC".into()));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.advance(), Transition::Dispatched("EM_HPLC_to_NMR".into()));
        assert_eq!(queue.advance(), Transition::Drained("EM_HPLC_to_NMR".into()));
        assert!(queue.is_empty());

        assert_eq!(queue.advance(), Transition::Idle);
    }

    #[test]
    fn in_flight_head_is_awaited_not_resent() {
        let mut step = TaskStep::pending(em(), "EM_to_SFC");
        step.status = StepStatus::InFlight;
        let mut queue = TaskQueue::new([step]);

        assert_eq!(queue.head().unwrap().action(), StepAction::AwaitCompletion);
        assert_eq!(queue.advance(), Transition::Drained("EM_to_SFC".into()));
    }

    #[test]
    fn status_accepts_legacy_spellings() {
        let pending: StepStatus = serde_json::from_str("\"NotDone\"").unwrap();
        let in_flight: StepStatus = serde_json::from_str("\"IsDoing\"").unwrap();
        assert_eq!(pending, StepStatus::Pending);
        assert_eq!(in_flight, StepStatus::InFlight);
        assert_eq!(serde_json::to_string(&in_flight).unwrap(), "\"InFlight\"");
    }

    #[test]
    fn status_display() {
        assert_eq!(StepStatus::Pending.to_string(), "Pending");
        assert_eq!(StepStatus::InFlight.to_string(), "InFlight");
    }
}
