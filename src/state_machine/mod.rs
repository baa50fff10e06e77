mod active;
mod path;
mod queue;

pub use active::{ActivePaths, Slot};
pub use path::{AdmissionDocument, Path, PathSnapshot, PathSpec, StepRecord};
pub use queue::{StepAction, StepStatus, TaskQueue, TaskStep, Transition};
