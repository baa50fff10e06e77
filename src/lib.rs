//! Crash-safe scheduler that moves sample plates between networked robot
//! arms with a simulated transporter, checkpointing after every step.

pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod peer_sim;
pub mod robot;
pub mod scheduler;
pub mod state_machine;
pub mod status;
pub mod store;
pub mod watcher;

pub use error::{Result, SchedulerError};
pub use scheduler::SchedulerCore;
