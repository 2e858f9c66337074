//! Shared accessors keyed by configuration.
//!
//! Queues configured against the same database share one accessor. Each
//! [`AccessorRegistry::acquire`] takes a lease; the accessor is shut down when
//! the last lease is released.

use super::QueueStorage;
use crate::error::DbqResult;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{debug, info};

struct RegistryEntry {
    accessor: Arc<dyn QueueStorage>,
    leases: usize,
}

#[derive(Default)]
pub struct AccessorRegistry {
    entries: DashMap<String, RegistryEntry>,
}

impl AccessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease the accessor registered under `key`, building it with `build`
    /// if none exists. A failing `build` registers nothing.
    pub fn acquire(
        &self,
        key: &str,
        build: impl FnOnce() -> DbqResult<Arc<dyn QueueStorage>>,
    ) -> DbqResult<Arc<dyn QueueStorage>> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.leases += 1;
                debug!(key, leases = entry.leases, "reusing accessor");
                Ok(Arc::clone(&entry.accessor))
            }
            Entry::Vacant(vacant) => {
                let accessor = build()?;
                vacant.insert(RegistryEntry {
                    accessor: Arc::clone(&accessor),
                    leases: 1,
                });
                info!(key, "registered accessor");
                Ok(accessor)
            }
        }
    }

    /// Return a lease. Returns true if this was the last one, in which case
    /// the accessor has been removed and shut down.
    pub fn release(&self, key: &str) -> bool {
        let removed = self
            .entries
            .remove_if_mut(key, |_, entry| {
                entry.leases = entry.leases.saturating_sub(1);
                entry.leases == 0
            })
            .map(|(_, entry)| entry.accessor);
        match removed {
            Some(accessor) => {
                accessor.shutdown();
                info!(key, "last lease released, accessor shut down");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn QueueStorage>> {
        self.entries.get(key).map(|e| Arc::clone(&e.accessor))
    }

    pub fn lease_count(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, |e| e.leases)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for AccessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessorRegistry")
            .field("keys", &self.entries.len())
            .finish()
    }
}
