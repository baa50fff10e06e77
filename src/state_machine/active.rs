use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::path::{Path, PathSnapshot};
use super::queue::{TaskStep, Transition};

/// Key of a path in [`ActivePaths`], assigned in admission order.
pub type Slot = u64;

/// Every path that still has work, keyed by admission order.
///
/// The lock is only held for short synchronous sections; drivers copy the
/// head step out before doing any I/O.
#[derive(Debug, Default)]
pub struct ActivePaths {
    next_slot: AtomicU64,
    paths: Mutex<BTreeMap<Slot, Path>>,
}

impl ActivePaths {
    pub fn new() -> Self {
        Self::default()
    }

    fn paths(&self) -> MutexGuard<'_, BTreeMap<Slot, Path>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, path: Path) -> Slot {
        let slot = self.next_slot.fetch_add(1, Ordering::SeqCst);
        self.paths().insert(slot, path);
        slot
    }

    pub fn remove(&self, slot: Slot) -> Option<Path> {
        self.paths().remove(&slot)
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.paths().contains_key(&slot)
    }

    pub fn len(&self) -> usize {
        self.paths().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths().is_empty()
    }

    /// A copy of the head step of the path in `slot`.
    pub fn head(&self, slot: Slot) -> Option<TaskStep> {
        self.paths()
            .get(&slot)
            .and_then(|path| path.queue.head().cloned())
    }

    pub fn advance(&self, slot: Slot) -> Transition {
        self.paths()
            .get_mut(&slot)
            .map_or(Transition::Idle, |path| path.queue.advance())
    }

    /// Checkpoint view: every path that still has steps, in admission order.
    pub fn snapshots(&self) -> Vec<PathSnapshot> {
        self.paths()
            .values()
            .filter(|path| !path.queue.is_empty())
            .map(Path::snapshot)
            .collect()
    }

    /// Name of the earliest admitted path with a step left for `robot`.
    pub fn first_path_for(&self, robot: &str) -> Option<String> {
        self.paths()
            .values()
            .find(|path| path.involves(robot))
            .map(|path| path.name().to_string())
    }

    /// Raises the stop flag of every path. Returns how many were signalled.
    pub fn request_stop_all(&self) -> usize {
        let paths = self.paths();
        for path in paths.values() {
            path.request_stop();
        }
        paths.len()
    }
}
