use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use shardex_codec::KeyValue;
use shardex_common::{PartitionId, Result, TableId};
use tracing::debug;

/// One partition's key-value store.
///
/// Mutations report whether they took effect: `insert` is false for an
/// existing key, `update` and `delete` are false for a missing key.
pub trait StoreInstance: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn insert(&self, kv: KeyValue) -> Result<bool>;

    fn update(&self, kv: KeyValue) -> Result<bool>;

    fn delete(&self, key: &[u8]) -> Result<bool>;

    /// Records with `start <= key < end`; an empty `end` is unbounded.
    fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<KeyValue>>;
}

/// Resolves the store instance owning `(table, partition)` on this node.
pub trait StoreService: Send + Sync {
    fn instance(&self, table: TableId, part: PartitionId) -> Result<Arc<dyn StoreInstance>>;
}

/// Ordered in-memory store, one per partition.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl StoreInstance for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.rows.read().get(key).cloned())
    }

    fn insert(&self, kv: KeyValue) -> Result<bool> {
        let mut rows = self.rows.write();
        if rows.contains_key(&kv.key) {
            return Ok(false);
        }
        rows.insert(kv.key, kv.value);
        Ok(true)
    }

    fn update(&self, kv: KeyValue) -> Result<bool> {
        let mut rows = self.rows.write();
        match rows.get_mut(&kv.key) {
            Some(v) => {
                *v = kv.value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.rows.write().remove(key).is_some())
    }

    fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<KeyValue>> {
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end)
        };
        let rows = self.rows.read();
        Ok(rows
            .range::<[u8], _>((Bound::Included(start), upper))
            .map(|(k, v)| KeyValue {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }
}

/// Node-local registry of in-memory partitions, created on first use.
#[derive(Debug, Default)]
pub struct MemoryStoreService {
    instances: Mutex<HashMap<(TableId, PartitionId), Arc<MemoryStore>>>,
}

impl MemoryStoreService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete handle for inspection in diagnostics and tests.
    pub fn memory_instance(&self, table: TableId, part: PartitionId) -> Arc<MemoryStore> {
        self.instances
            .lock()
            .entry((table, part))
            .or_insert_with(|| {
                debug!(table = %table, partition = %part, "created in-memory partition");
                Arc::new(MemoryStore::new())
            })
            .clone()
    }
}

impl StoreService for MemoryStoreService {
    fn instance(&self, table: TableId, part: PartitionId) -> Result<Arc<dyn StoreInstance>> {
        Ok(self.memory_instance(table, part))
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryStore, MemoryStoreService, StoreInstance, StoreService};
    use shardex_codec::KeyValue;
    use shardex_common::{PartitionId, TableId};

    fn kv(k: &[u8], v: &[u8]) -> KeyValue {
        KeyValue {
            key: k.to_vec(),
            value: v.to_vec(),
        }
    }

    #[test]
    fn insert_update_delete_report_effect() {
        let s = MemoryStore::new();
        assert!(s.insert(kv(b"a", b"1")).expect("insert"));
        assert!(!s.insert(kv(b"a", b"2")).expect("dup insert"));
        assert_eq!(s.get(b"a").expect("get"), Some(b"1".to_vec()));
        assert!(s.update(kv(b"a", b"3")).expect("update"));
        assert!(!s.update(kv(b"b", b"3")).expect("update missing"));
        assert!(s.delete(b"a").expect("delete"));
        assert!(!s.delete(b"a").expect("delete missing"));
        assert!(s.is_empty());
    }

    #[test]
    fn scan_is_half_open() {
        let s = MemoryStore::new();
        for k in [b"a", b"b", b"c"] {
            s.insert(kv(k, b"")).expect("insert");
        }
        let keys: Vec<_> = s
            .scan(b"a", b"c")
            .expect("scan")
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(s.scan(b"b", b"").expect("scan").len(), 2);
    }

    #[test]
    fn service_returns_same_instance_per_partition() {
        let svc = MemoryStoreService::new();
        let a = svc.instance(TableId(1), PartitionId(1)).expect("a");
        a.insert(kv(b"k", b"v")).expect("insert");
        assert_eq!(svc.memory_instance(TableId(1), PartitionId(1)).len(), 1);
        assert!(svc.memory_instance(TableId(1), PartitionId(2)).is_empty());
    }
}
