//! In-memory durable store.
//!
//! Used by tests and by single-process demos. Change notifications are
//! delivered synchronously from inside the writing call, which makes
//! relay behaviour deterministic under test.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::watch::WatchRegistry;
use super::{ChangeSink, DocPath, DurableStore, FieldValue, StoreChange, StoreDocument, StoreError, StoreResult};
use crate::subscription::SubscriptionHandle;

#[derive(Default)]
struct Counters {
    reads: AtomicUsize,
    writes: AtomicUsize,
}

/// Durable store backed by a map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    docs: Arc<RwLock<BTreeMap<DocPath, StoreDocument>>>,
    watchers: WatchRegistry,
    counters: Arc<Counters>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Document reads served so far (`get` calls).
    pub fn reads(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    /// Writes accepted so far (`set_merge` and `array_union`).
    pub fn writes(&self) -> usize {
        self.counters.writes.load(Ordering::SeqCst)
    }

    /// Simulate connectivity loss; every call fails while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.watcher_count()
    }

    /// Direct read that bypasses counters and the offline switch.
    pub fn peek(&self, path: &DocPath) -> Option<StoreDocument> {
        self.docs.read().get(path).cloned()
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }

    fn commit(&self, path: &DocPath, update: impl FnOnce(&mut StoreDocument) -> StoreResult<()>) -> StoreResult<()> {
        let snapshot = {
            let mut docs = self.docs.write();
            let doc = docs.entry(path.clone()).or_default();
            update(doc)?;
            doc.clone()
        };
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        self.watchers.notify(StoreChange {
            path: path.clone(),
            document: Some(snapshot),
        });
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<StoreDocument>> {
        self.check_online()?;
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.docs.read().get(path).cloned())
    }

    async fn set_merge(&self, path: &DocPath, fields: StoreDocument) -> StoreResult<()> {
        self.check_online()?;
        self.commit(path, |doc| {
            doc.merge(fields);
            Ok(())
        })
    }

    async fn array_union(&self, path: &DocPath, field: &str, values: &[String]) -> StoreResult<()> {
        self.check_online()?;
        self.commit(path, |doc| {
            let mut list = match doc.get(field) {
                None => Vec::new(),
                Some(FieldValue::StrList(list)) => list.clone(),
                Some(_) => {
                    return Err(StoreError::FieldType {
                        path: path.to_string(),
                        field: field.to_string(),
                    });
                }
            };
            for value in values {
                if !list.contains(value) {
                    list.push(value.clone());
                }
            }
            doc.set(field, FieldValue::StrList(list));
            Ok(())
        })
    }

    async fn list_collection(&self, collection: &DocPath) -> StoreResult<Vec<String>> {
        self.check_online()?;
        let docs = self.docs.read();
        Ok(docs
            .keys()
            .filter(|path| path.parent().as_ref() == Some(collection))
            .map(|path| path.name().to_string())
            .collect())
    }

    fn subscribe(&self, path: &DocPath, sink: ChangeSink) -> SubscriptionHandle {
        self.watchers.register(path, sink)
    }
}
