use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;

use super::KvStore;
use crate::cache::keys::glob_match;
use crate::error::StoreError;

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// 进程内存储。语义与 Redis 子集一致，但只在当前进程可见。
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前条目数（含尚未清理的过期条目）
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 删除所有过期条目，返回删除数量
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// 启动后台清理任务
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // 第一次 tick 立即返回
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let cleaned = self.sweep();
                if cleaned > 0 {
                    tracing::debug!(cleaned, "Swept expired in-memory entries");
                }
            }
        })
    }

    fn get_fresh(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let value = self.entries.get(key).and_then(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        });
        if value.is_none() {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        value
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let current = if entry.is_expired(now) {
                    0
                } else {
                    entry
                        .value
                        .parse::<u64>()
                        .map_err(|_| StoreError::NotAnInteger(key.to_string()))?
                };
                let next = current + 1;
                *entry = MemoryEntry::new(next.to_string(), ttl);
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry::new("1".to_string(), ttl));
                Ok(1)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get_fresh(key))
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_string(), MemoryEntry::new(value, ttl));
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| !entry.is_expired(now))
            .count();
        Ok(removed as u64)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|item| !item.value().is_expired(now) && glob_match(pattern, item.key()))
            .map(|item| item.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_incr_counts_and_expires() {
        let store = MemoryStore::new();
        let ttl = Duration::from_millis(40);

        assert_eq!(store.incr("k", ttl).await.unwrap(), 1);
        assert_eq!(store.incr("k", ttl).await.unwrap(), 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.incr("k", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let store = MemoryStore::new();
        store
            .set_ex("k", "abc".into(), Duration::from_secs(10))
            .await
            .unwrap();

        assert!(matches!(
            store.incr("k", Duration::from_secs(10)).await,
            Err(StoreError::NotAnInteger(_))
        ));
    }

    #[tokio::test]
    async fn test_get_hides_expired_entries() {
        let store = MemoryStore::new();
        store
            .set_ex("k", "v".into(), Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = MemoryStore::new();
        store
            .set_ex("short", "1".into(), Duration::from_millis(10))
            .await
            .unwrap();
        store
            .set_ex("long", "2".into(), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_and_del() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set_ex("products:1", "a".into(), ttl).await.unwrap();
        store.set_ex("products:2", "b".into(), ttl).await.unwrap();
        store.set_ex("analytics:1", "c".into(), ttl).await.unwrap();

        let keys = store.scan("products:*").await.unwrap();
        assert_eq!(keys, vec!["products:1".to_string(), "products:2".to_string()]);

        assert_eq!(store.del(&keys).await.unwrap(), 2);
        assert_eq!(store.scan("*").await.unwrap(), vec!["analytics:1".to_string()]);
    }
}
