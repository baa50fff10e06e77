use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::info;

/// Stand-in for the mobile transporter, which has no network peer.
///
/// Sending and waiting each take a fixed latency. Clones share one dispatch
/// history so the scheduler can report what the transporter was asked to do.
#[derive(Debug, Clone)]
pub struct SimulatedTransporter {
    name: String,
    latency: Duration,
    history: Arc<Mutex<Vec<(Instant, String)>>>,
}

impl SimulatedTransporter {
    pub fn new(name: impl Into<String>, latency: Duration) -> Self {
        let name = name.into();
        info!(transporter = %name, latency_ms = latency.as_millis() as u64, "Transporter initialized");
        Self {
            name,
            latency,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A transporter under another name that shares this one's history.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: self.latency,
            history: Arc::clone(&self.history),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn dispatch(&self, label: &str) {
        info!(transporter = %self.name, label, "Sending task");
        sleep(self.latency).await;
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Instant::now(), label.to_string()));
        info!(transporter = %self.name, label, "Task sent");
    }

    pub async fn await_completion(&self) {
        info!(transporter = %self.name, "Waiting for task to end");
        sleep(self.latency).await;
        info!(transporter = %self.name, "Task ended");
    }

    /// Labels dispatched so far, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.timeline().into_iter().map(|(_, label)| label).collect()
    }

    /// Labels dispatched so far with the moment each send finished.
    pub fn timeline(&self) -> Vec<(Instant, String)> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
