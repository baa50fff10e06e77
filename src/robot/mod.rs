mod link;
mod registry;
mod transporter;

use std::sync::Arc;

pub use link::RobotLink;
pub use registry::{ROBOT_PREFIX, RobotRegistry};
pub use transporter::SimulatedTransporter;

use crate::error::LinkError;

/// A robot a task step can be addressed to.
///
/// Both variants offer dispatch and completion; only the socket-backed one
/// has connectivity to wait for.
#[derive(Debug, Clone)]
pub enum Robot {
    SocketBacked(Arc<RobotLink>),
    Simulated(SimulatedTransporter),
}

impl Robot {
    pub fn name(&self) -> &str {
        match self {
            Robot::SocketBacked(link) => link.name(),
            Robot::Simulated(transporter) => transporter.name(),
        }
    }

    pub fn is_socket_backed(&self) -> bool {
        matches!(self, Robot::SocketBacked(_))
    }

    /// `None` for robots without connectivity state.
    pub fn is_connected(&self) -> Option<Result<bool, LinkError>> {
        match self {
            Robot::SocketBacked(link) => Some(link.is_connected()),
            Robot::Simulated(_) => None,
        }
    }

    pub async fn wait_for_connection(&self) -> Result<(), LinkError> {
        match self {
            Robot::SocketBacked(link) => link.wait_for_connection().await,
            Robot::Simulated(_) => Ok(()),
        }
    }

    pub async fn dispatch(&self, label: &str) -> Result<(), LinkError> {
        match self {
            Robot::SocketBacked(link) => link.dispatch(label).await,
            Robot::Simulated(transporter) => {
                transporter.dispatch(label).await;
                Ok(())
            }
        }
    }

    pub async fn await_completion(&self) -> Result<(), LinkError> {
        match self {
            Robot::SocketBacked(link) => link.await_completion().await,
            Robot::Simulated(transporter) => {
                transporter.await_completion().await;
                Ok(())
            }
        }
    }
}
