//! Read-only status board: robot connectivity and the path each robot is
//! currently serving.
//!
//! Uses `console` for colour. [`StatusBoard`] only renders; the rows come
//! from [`SchedulerCore::status`](crate::scheduler::SchedulerCore::status)
//! or, offline, from the checkpoint file.

use chrono::{DateTime, Local};
use console::Style;

use crate::state_machine::PathSnapshot;

/// Connectivity column of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    NotConnected,
    /// Robots without a network peer.
    Simulated,
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connectivity::Connected => write!(f, "Connected"),
            Connectivity::NotConnected => write!(f, "Not Connected"),
            Connectivity::Simulated => write!(f, "Simulated"),
        }
    }
}

/// One robot's line on the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub robot: String,
    pub connectivity: Connectivity,
    /// Earliest admitted path with a step left for this robot.
    pub path: Option<String>,
}

pub struct StatusBoard {
    green: Style,
    red: Style,
    cyan: Style,
    bold: Style,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            cyan: Style::new().cyan(),
            bold: Style::new().bold(),
        }
    }

    pub fn render(&self, rows: &[StatusRow], taken_at: DateTime<Local>) -> String {
        let mut out = format!(
            "{} ({})\n{:<16} {:<14} {}\n",
            self.bold.apply_to("Robot Status"),
            taken_at.format("%H:%M:%S"),
            "Robot",
            "Status",
            "Path"
        );
        for row in rows {
            let style = match row.connectivity {
                Connectivity::Connected => &self.green,
                Connectivity::NotConnected => &self.red,
                Connectivity::Simulated => &self.cyan,
            };
            // Pad before styling so escape codes do not skew the columns.
            let status = format!("{:<14}", row.connectivity.to_string());
            out.push_str(&format!(
                "{:<16} {} {}\n",
                row.robot,
                style.apply_to(status),
                row.path.as_deref().unwrap_or("No Path")
            ));
        }
        out
    }

    /// Offline view of a checkpoint: each path and its remaining steps.
    pub fn render_checkpoint(&self, snapshots: &[PathSnapshot]) -> String {
        if snapshots.is_empty() {
            return "No paths in progress.\n".to_string();
        }
        let mut out = String::new();
        for snapshot in snapshots {
            out.push_str(&format!(
                "{} [{} -> {}]\n",
                self.bold.apply_to(&snapshot.spec.name),
                snapshot.spec.start_position,
                snapshot.spec.end_position
            ));
            for step in &snapshot.task_queue {
                out.push_str(&format!("  {:<10} {:<20} {}\n", step.0, step.1, step.2));
            }
        }
        out
    }
}
