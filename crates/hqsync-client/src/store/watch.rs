//! In-process change-feed registry shared by the store backends.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ChangeSink, DocPath, StoreChange};
use crate::subscription::SubscriptionHandle;

#[derive(Default)]
struct Watchers {
    next_id: u64,
    by_id: HashMap<u64, (DocPath, ChangeSink)>,
}

/// Registry of per-document watchers.
#[derive(Clone, Default)]
pub(crate) struct WatchRegistry {
    inner: Arc<Mutex<Watchers>>,
}

impl WatchRegistry {
    pub(crate) fn register(&self, path: &DocPath, sink: ChangeSink) -> SubscriptionHandle {
        let id = {
            let mut watchers = self.inner.lock();
            let id = watchers.next_id;
            watchers.next_id += 1;
            watchers.by_id.insert(id, (path.clone(), sink));
            id
        };

        let weak = Arc::downgrade(&self.inner);
        SubscriptionHandle::new(format!("store:{path}"), move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().by_id.remove(&id);
            }
        })
    }

    /// Deliver a change to every watcher of its path. Sinks run outside the
    /// registry lock.
    pub(crate) fn notify(&self, change: StoreChange) {
        let sinks: Vec<ChangeSink> = {
            let watchers = self.inner.lock();
            watchers
                .by_id
                .values()
                .filter(|(path, _)| *path == change.path)
                .map(|(_, sink)| sink.clone())
                .collect()
        };
        for sink in sinks {
            sink(change.clone());
        }
    }

    pub(crate) fn watcher_count(&self) -> usize {
        self.inner.lock().by_id.len()
    }
}
