// ── Keyed reactive record collection ──
//
// Concurrent storage with O(1) lookups and push-based change
// notification via `watch` channels.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A concurrent, reactive collection for one record type.
///
/// Every mutation bumps a version counter and rebuilds the snapshot that
/// subscribers receive. Snapshots are sorted by key.
pub(crate) struct RecordCollection<K, T>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    by_key: DashMap<K, Arc<T>>,
    version: watch::Sender<u64>,
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<K, T> RecordCollection<K, T>
where
    K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_key: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert or replace. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: K, record: T) -> bool {
        let is_new = self.by_key.insert(key, Arc::new(record)).is_none();
        self.changed();
        is_new
    }

    pub(crate) fn remove(&self, key: &K) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.changed();
        }
        removed
    }

    /// Remove every entry whose key matches, returning how many went.
    pub(crate) fn remove_where(&self, mut pred: impl FnMut(&K) -> bool) -> usize {
        let doomed: Vec<K> = self
            .by_key
            .iter()
            .filter(|r| pred(r.key()))
            .map(|r| r.key().clone())
            .collect();
        let removed = doomed
            .iter()
            .filter(|k| self.by_key.remove(*k).is_some())
            .count();
        if removed > 0 {
            self.changed();
        }
        removed
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.by_key.contains_key(key)
    }

    /// Records whose key matches, sorted by key.
    pub(crate) fn filter(&self, mut pred: impl FnMut(&K) -> bool) -> Vec<Arc<T>> {
        let mut hits: Vec<(K, Arc<T>)> = self
            .by_key
            .iter()
            .filter(|r| pred(r.key()))
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        hits.sort_by(|a, b| a.0.cmp(&b.0));
        hits.into_iter().map(|(_, v)| v).collect()
    }

    pub(crate) fn keys(&self) -> Vec<K> {
        let mut keys: Vec<K> = self.by_key.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    fn changed(&self) {
        let values = self.filter(|_| true);
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
        self.version.send_modify(|v| *v += 1);
    }
}
