//! Queue-level hooks: size listeners and the put interceptor.

use crate::entry::QueueEntry;
use crate::error::DbqResult;
use crate::model::{EntryCount, StorageId};
use parking_lot::Mutex;
use std::sync::Arc;

/// Invoked after every successful mutation, outside the mutation lock.
pub trait StorageSizeListener: Send + Sync {
    fn storage_size_changed(&self, storage_id: &StorageId, count: &EntryCount);
}

/// Gatekeeper consulted before a put and informed after it.
pub trait PutInterceptor: Send + Sync {
    /// Refuse the put by returning an error.
    fn put_pre(&self, entries: &[QueueEntry]) -> DbqResult<()>;

    /// `persisted[i]` tells whether `entries[i]` was stored by this put.
    fn put_post(&self, entries: &[QueueEntry], persisted: &[bool]);
}

/// Size listeners are held strongly until removed or the queue shuts down.
#[derive(Default)]
pub(crate) struct SizeListeners {
    listeners: Mutex<Vec<Arc<dyn StorageSizeListener>>>,
}

impl SizeListeners {
    pub(crate) fn add(&self, listener: Arc<dyn StorageSizeListener>) -> bool {
        let mut listeners = self.listeners.lock();
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    pub(crate) fn remove(&self, listener: &Arc<dyn StorageSizeListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() < before
    }

    pub(crate) fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    pub(crate) fn notify(&self, storage_id: &StorageId, count: &EntryCount) {
        let snapshot: Vec<_> = self.listeners.lock().clone();
        for listener in snapshot {
            listener.storage_size_changed(storage_id, count);
        }
    }
}
