//! Storage problem listeners: notified when the backend is lost or back.
//!
//! The set holds weak references: registering does not keep a listener alive,
//! and dropped listeners are pruned on the next notification. Listeners that
//! outlive their interest must still call `unregister`. Notification iterates a
//! snapshot taken under the lock, so listeners may unregister from inside a
//! callback.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Connection state as seen by listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageStatus {
    Undefined,
    Available,
    Unavailable,
}

pub trait StorageProblemListener: Send + Sync {
    fn storage_unavailable(&self, old_status: StorageStatus);

    fn storage_available(&self, old_status: StorageStatus);
}

#[derive(Default)]
pub struct ProblemListeners {
    listeners: Mutex<Vec<Weak<dyn StorageProblemListener>>>,
}

fn addr(listener: &Arc<dyn StorageProblemListener>) -> *const () {
    Arc::as_ptr(listener) as *const ()
}

impl ProblemListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if already registered.
    pub fn register(&self, listener: &Arc<dyn StorageProblemListener>) -> bool {
        let mut listeners = self.listeners.lock();
        listeners.retain(|w| w.strong_count() > 0);
        if listeners.iter().any(|w| w.as_ptr() as *const () == addr(listener)) {
            return false;
        }
        listeners.push(Arc::downgrade(listener));
        true
    }

    /// Returns false if not registered.
    pub fn unregister(&self, listener: &Arc<dyn StorageProblemListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|w| w.strong_count() > 0 && w.as_ptr() as *const () != addr(listener));
        listeners.len() < before
    }

    /// Live listeners at this instant.
    pub fn snapshot(&self) -> Vec<Arc<dyn StorageProblemListener>> {
        let mut listeners = self.listeners.lock();
        listeners.retain(|w| w.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn notify_unavailable(&self, old_status: StorageStatus) {
        for listener in self.snapshot() {
            listener.storage_unavailable(old_status);
        }
    }

    pub fn notify_available(&self, old_status: StorageStatus) {
        for listener in self.snapshot() {
            listener.storage_available(old_status);
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ProblemListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProblemListeners")
            .field("registered", &self.listeners.lock().len())
            .finish()
    }
}
