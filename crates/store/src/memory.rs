use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use growable_bloom_filter::GrowableBloom;
use waypoint_core::WaypointError;

use crate::Store;

/// In-process implementation of the store contract, used by tests and by
/// a `--store memory` dry run. Mirrors the shape of the teacher's
/// `DashMap`-backed `CrawlFrontier`, but behind the same trait the Redis
/// backend implements so Frontier/Politeness logic is exercised identically.
#[derive(Default)]
pub struct MemoryStore {
    lists: DashMap<String, Mutex<VecDeque<String>>>,
    hashes: DashMap<String, Mutex<HashMap<String, String>>>,
    filters: DashMap<String, Mutex<GrowableBloom>>,
    strings: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn lpush(&self, key: &str, value: &str) -> Result<(), WaypointError> {
        self.lists
            .entry(key.to_string())
            .or_default()
            .lock()
            .unwrap()
            .push_front(value.to_string());
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), WaypointError> {
        self.lists
            .entry(key.to_string())
            .or_default()
            .lock()
            .unwrap()
            .push_back(value.to_string());
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, WaypointError> {
        Ok(self
            .lists
            .get(key)
            .and_then(|list| list.lock().unwrap().pop_front()))
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, WaypointError> {
        Ok(self
            .lists
            .get(key)
            .and_then(|list| list.lock().unwrap().pop_back()))
    }

    async fn llen(&self, key: &str) -> Result<u64, WaypointError> {
        Ok(self
            .lists
            .get(key)
            .map(|list| list.lock().unwrap().len() as u64)
            .unwrap_or(0))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, WaypointError> {
        Ok(self
            .lists
            .iter()
            .map(|entry| entry.key().clone())
            .chain(self.hashes.iter().map(|entry| entry.key().clone()))
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), WaypointError> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .lock()
            .unwrap()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, WaypointError> {
        let hash = self.hashes.entry(key.to_string()).or_default();
        let mut hash = hash.lock().unwrap();
        if hash.contains_key(field) {
            Ok(false)
        } else {
            hash.insert(field.to_string(), value.to_string());
            Ok(true)
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, WaypointError> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|hash| hash.lock().unwrap().get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, WaypointError> {
        Ok(self
            .hashes
            .get(key)
            .map(|hash| hash.lock().unwrap().clone())
            .unwrap_or_default())
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<(), WaypointError> {
        if let Some(hash) = self.hashes.get(key) {
            let mut hash = hash.lock().unwrap();
            for field in fields {
                hash.remove(*field);
            }
        }
        Ok(())
    }

    async fn filter_reserve(&self, key: &str, capacity: u64, fpr: f64) -> Result<(), WaypointError> {
        self.filters
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(GrowableBloom::new(fpr, capacity as usize)));
        Ok(())
    }

    async fn filter_exists(&self, key: &str) -> Result<bool, WaypointError> {
        Ok(self.filters.contains_key(key))
    }

    async fn filter_contains_many(&self, key: &str, items: &[String]) -> Result<Vec<bool>, WaypointError> {
        let filter = self
            .filters
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(GrowableBloom::new(0.001, 100_000)));
        let filter = filter.lock().unwrap();
        Ok(items.iter().map(|item| filter.contains(item)).collect())
    }

    async fn filter_add_many(&self, key: &str, items: &[String]) -> Result<(), WaypointError> {
        let filter = self
            .filters
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(GrowableBloom::new(0.001, 100_000)));
        let mut filter = filter.lock().unwrap();
        for item in items {
            filter.insert(item);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, WaypointError> {
        Ok(self.strings.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), WaypointError> {
        self.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), WaypointError> {
        self.lists.remove(key);
        self.hashes.remove(key);
        self.filters.remove(key);
        self.strings.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_fifo_via_lpush_rpop() {
        let store = MemoryStore::new();
        store.lpush("k", "a").await.unwrap();
        store.lpush("k", "b").await.unwrap();
        // push order b, a (head) -> rpop drains from tail (FIFO w.r.t. insertion)
        assert_eq!(store.rpop("k").await.unwrap(), Some("a".to_string()));
        assert_eq!(store.rpop("k").await.unwrap(), Some("b".to_string()));
        assert_eq!(store.rpop("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn hsetnx_only_sets_once() {
        let store = MemoryStore::new();
        assert!(store.hsetnx("h", "f", "1").await.unwrap());
        assert!(!store.hsetnx("h", "f", "2").await.unwrap());
        assert_eq!(store.hget("h", "f").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn filter_add_then_contains() {
        let store = MemoryStore::new();
        store.filter_reserve("f", 1000, 0.01).await.unwrap();
        let items = vec!["a".to_string(), "b".to_string()];
        let before = store.filter_contains_many("f", &items).await.unwrap();
        assert_eq!(before, vec![false, false]);
        store.filter_add_many("f", &items).await.unwrap();
        let after = store.filter_contains_many("f", &items).await.unwrap();
        assert_eq!(after, vec![true, true]);
    }
}
