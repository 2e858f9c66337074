//! Entry codec: maps a [`QueueEntry`] to its physical Meat/Ref rows and back.
//!
//! Ref-counted stores split an entry into a shared [`Meat`] (payload) and a
//! per-placement [`Ref`] pointing at it. Meat-only stores keep one Meat row per
//! entry and no ref; such entries carry [`NORM_PRIORITY`] when read back.

use crate::entry::{NORM_PRIORITY, QueueEntry};
use crate::error::{DbqError, DbqResult};
use crate::model::{Meat, Ref, Store};

/// The physical rows of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRows {
    pub meat: Option<Meat>,
    pub reference: Option<Ref>,
}

/// Converts entries to rows and rehydrates them from query results.
///
/// # Contract
///
/// - `decompose` of a ref-counted store yields both rows, linked by
///   `Ref::meat_id == Meat::id`; of a meat-only store only the meat.
/// - `compose` never fails on missing payload columns; it logs and produces a
///   best-effort entry so one bad row does not abort a whole result set.
/// - `compose` fails only if neither row is given.
pub trait EntryFactory: Send + Sync {
    fn decompose(&self, store: &Store, entry: &QueueEntry) -> EntryRows;

    fn compose(
        &self,
        store: &Store,
        meat: Option<Meat>,
        reference: Option<Ref>,
    ) -> DbqResult<QueueEntry>;
}

/// Default codec: entries are stored as-is, `embedded_type` round-trips in
/// the meat's data type column.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryCodec;

impl EntryCodec {
    fn meat_of(store: &Store, entry: &QueueEntry, id: i64) -> Meat {
        Meat {
            id,
            store_id: store.id,
            durable: entry.persistent,
            ref_count: 1,
            byte_size: entry.size_in_bytes,
            data_type: entry.embedded_type.clone(),
            flag1: entry.flag1.clone(),
            qos: entry.qos.clone(),
            content: Some(entry.content.clone()),
            key: entry.key.clone(),
        }
    }
}

impl EntryFactory for EntryCodec {
    fn decompose(&self, store: &Store, entry: &QueueEntry) -> EntryRows {
        if !store.ref_counted {
            return EntryRows {
                meat: Some(Self::meat_of(store, entry, entry.unique_id)),
                reference: None,
            };
        }
        let reference = Ref {
            id: entry.unique_id,
            store_id: store.id,
            meat_id: Some(entry.meat_id),
            durable: entry.persistent,
            byte_size: entry.size_in_bytes,
            meta_info: entry.meta_info.clone(),
            flag1: entry.flag1.clone(),
            prio: entry.priority,
            method_name: entry.method_name.clone(),
        };
        EntryRows {
            meat: Some(Self::meat_of(store, entry, entry.meat_id)),
            reference: Some(reference),
        }
    }

    fn compose(
        &self,
        store: &Store,
        meat: Option<Meat>,
        reference: Option<Ref>,
    ) -> DbqResult<QueueEntry> {
        match (meat, reference) {
            (None, None) => Err(DbqError::InvalidArguments(format!(
                "{store}: cannot build an entry without meat or ref"
            ))),
            (Some(meat), None) => {
                let content = content_or_empty(store, &meat);
                Ok(QueueEntry {
                    unique_id: meat.id,
                    priority: NORM_PRIORITY,
                    persistent: meat.durable,
                    size_in_bytes: meat.byte_size,
                    embedded_type: meat.data_type,
                    meat_id: meat.id,
                    ref_count: meat.ref_count,
                    content,
                    qos: meat.qos,
                    key: meat.key,
                    method_name: String::new(),
                    meta_info: String::new(),
                    flag1: meat.flag1,
                })
            }
            (meat, Some(reference)) => {
                let meat = meat.unwrap_or_else(|| {
                    tracing::warn!(
                        store = %store,
                        ref_id = reference.id,
                        meat_id = ?reference.meat_id,
                        "ref without meat row, producing an entry without payload"
                    );
                    Meat::default()
                });
                let content = if meat.content.is_some() || meat.id == 0 {
                    meat.content.unwrap_or_default()
                } else {
                    content_or_empty(store, &meat)
                };
                Ok(QueueEntry {
                    unique_id: reference.id,
                    priority: reference.prio,
                    persistent: reference.durable,
                    size_in_bytes: reference.byte_size,
                    embedded_type: meat.data_type,
                    meat_id: reference.meat_id.unwrap_or(reference.id),
                    ref_count: meat.ref_count,
                    content,
                    qos: meat.qos,
                    key: meat.key,
                    method_name: reference.method_name,
                    meta_info: reference.meta_info,
                    flag1: reference.flag1,
                })
            }
        }
    }
}

fn content_or_empty(store: &Store, meat: &Meat) -> Vec<u8> {
    match &meat.content {
        Some(content) => content.clone(),
        None => {
            tracing::warn!(store = %store, meat_id = meat.id, "meat content is null, using empty payload");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StorageId;

    fn store(ref_counted: bool) -> Store {
        Store {
            id: 7,
            storage_id: StorageId::new("node", "callback", "joe"),
            ref_counted,
            flag1: String::new(),
        }
    }

    #[test]
    fn ref_counted_entry_splits_into_linked_rows() {
        let entry = QueueEntry::with_id(42, 8, "MSG_RAW", b"payload".to_vec())
            .meat_id(40)
            .method_name("update")
            .qos("<qos/>");
        let rows = EntryCodec.decompose(&store(true), &entry);
        let meat = rows.meat.clone().unwrap();
        let reference = rows.reference.clone().unwrap();
        assert_eq!(meat.id, 40);
        assert_eq!(meat.ref_count, 1);
        assert_eq!(reference.meat_id, Some(40));
        assert_eq!(reference.prio, 8);

        let back = EntryCodec
            .compose(&store(true), rows.meat, rows.reference)
            .unwrap();
        assert_eq!(back.unique_id, 42);
        assert_eq!(back.meat_id, 40);
        assert_eq!(back.priority, 8);
        assert_eq!(back.content, b"payload");
        assert_eq!(back.qos.as_deref(), Some("<qos/>"));
        assert_eq!(back.method_name, "update");
    }

    #[test]
    fn meat_only_store_has_no_ref() {
        let entry = QueueEntry::with_id(5, 9, "SESSION", b"x".to_vec());
        let rows = EntryCodec.decompose(&store(false), &entry);
        assert!(rows.reference.is_none());
        let back = EntryCodec.compose(&store(false), rows.meat, None).unwrap();
        assert_eq!(back.unique_id, 5);
        assert_eq!(back.priority, NORM_PRIORITY);
    }

    #[test]
    fn null_content_produces_best_effort_entry() {
        let meat = Meat {
            id: 3,
            store_id: 7,
            byte_size: 10,
            content: None,
            ..Meat::default()
        };
        let reference = Ref {
            id: 4,
            store_id: 7,
            meat_id: Some(3),
            byte_size: 10,
            prio: 5,
            ..Ref::default()
        };
        let entry = EntryCodec
            .compose(&store(true), Some(meat), Some(reference.clone()))
            .unwrap();
        assert!(entry.content.is_empty());
        assert_eq!(entry.size_in_bytes, 10);

        let orphan = EntryCodec.compose(&store(true), None, Some(reference)).unwrap();
        assert_eq!(orphan.unique_id, 4);
        assert!(EntryCodec.compose(&store(true), None, None).is_err());
    }
}
