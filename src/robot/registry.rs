use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, SchedulerError};

use super::{Robot, RobotLink, SimulatedTransporter};

/// Prefix joining a position name to the arm stationed there.
pub const ROBOT_PREFIX: &str = "UR_";

/// Named robots known to the scheduler, fixed after startup.
#[derive(Debug)]
pub struct RobotRegistry {
    links: BTreeMap<String, Arc<RobotLink>>,
    transporter: SimulatedTransporter,
}

impl RobotRegistry {
    pub fn new(
        links: impl IntoIterator<Item = Arc<RobotLink>>,
        transporter: SimulatedTransporter,
    ) -> Self {
        let links = links
            .into_iter()
            .map(|link| (link.name().to_string(), link))
            .collect();
        Self { links, transporter }
    }

    pub fn transporter(&self) -> &SimulatedTransporter {
        &self.transporter
    }

    /// Socket-backed robots, ordered by name.
    pub fn links(&self) -> impl Iterator<Item = &Arc<RobotLink>> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn link(&self, name: &str) -> Option<&Arc<RobotLink>> {
        self.links.get(name)
    }

    /// The arm stationed at `position`, i.e. the robot named `UR_<position>`.
    pub fn robot_at(&self, position: &str) -> Result<Robot> {
        let name = format!("{ROBOT_PREFIX}{position}");
        self.links
            .get(&name)
            .map(|link| Robot::SocketBacked(Arc::clone(link)))
            .ok_or(SchedulerError::UnknownRobot(name))
    }

    /// Resolves a robot name read back from a checkpoint.
    ///
    /// A registered arm matches by exact name first. Otherwise any name
    /// containing the transporter's name is the transporter; anything else
    /// is unknown.
    pub fn resolve(&self, name: &str) -> Result<Robot> {
        if let Some(link) = self.links.get(name) {
            return Ok(Robot::SocketBacked(Arc::clone(link)));
        }
        if name.contains(self.transporter.name()) {
            return Ok(Robot::Simulated(self.transporter.renamed(name)));
        }
        Err(SchedulerError::UnknownRobot(name.to_string()))
    }

    /// Stops every link. Idempotent.
    pub fn stop_all(&self) {
        for link in self.links.values() {
            link.stop();
        }
    }
}
