use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::cache::keys::entry_key;
use crate::cache::models::{CacheEntry, CacheMetrics, InvalidationEvent, InvalidationReason};
use crate::cache::store::KvStore;

// 保留的失效记录条数
const INVALIDATION_HISTORY: usize = 100;
// 失效记录里保留的示例键数量
const SAMPLE_KEYS: usize = 10;

/// 缓存策略：命名空间前缀 + TTL
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub prefix: String,
    pub ttl: Duration,
    pub record_metrics: bool,
}

impl CachePolicy {
    pub fn new(prefix: &str, ttl: Duration) -> Self {
        Self {
            prefix: prefix.to_string(),
            ttl,
            record_metrics: true,
        }
    }

    /// 预置策略
    pub fn preset(name: &str) -> Option<Self> {
        let (prefix, secs) = match name {
            "AUTH_CRITICAL" => ("auth_critical", 300),
            "PRODUCTS_SMART" => ("products_smart", 1800),
            "PUBLIC_PERFORMANCE" => ("public_perf", 600),
            "USER_SESSIONS" => ("user_sessions", 7200),
            "ANALYTICS_DATA" => ("analytics", 900),
            _ => return None,
        };
        Some(Self::new(prefix, Duration::from_secs(secs)))
    }
}

#[derive(Default)]
struct MetricsAcc {
    hits: u64,
    misses: u64,
    sets: u64,
    errors: u64,
    total_ms: f64,
    samples: u64,
    last_access: Option<chrono::DateTime<Utc>>,
}

impl MetricsAcc {
    fn observe(&mut self, started: Instant) {
        self.total_ms += started.elapsed().as_secs_f64() * 1000.0;
        self.samples += 1;
        self.last_access = Some(Utc::now());
    }

    fn snapshot(&self) -> CacheMetrics {
        let lookups = self.hits + self.misses;
        CacheMetrics {
            hits: self.hits,
            misses: self.misses,
            hit_rate: if lookups > 0 {
                self.hits as f64 / lookups as f64
            } else {
                0.0
            },
            sets: self.sets,
            errors: self.errors,
            avg_response_ms: if self.samples > 0 {
                self.total_ms / self.samples as f64
            } else {
                0.0
            },
            last_access: self.last_access,
        }
    }
}

enum Lookup<T> {
    Hit(T),
    Miss,
    Failed,
}

enum Outcome {
    Hit,
    Miss,
    Set,
    Error,
}

/// 预热结果
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WarmupReport {
    pub requested: usize,
    pub loaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

type InflightMap = DashMap<String, Arc<tokio::sync::Mutex<()>>>;

// 单飞槽位；无论正常返回还是 future 被取消，析构时都会清理无人使用的条目
struct InflightSlot<'a> {
    map: &'a InflightMap,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> InflightSlot<'a> {
    fn acquire(map: &'a InflightMap, key: String) -> Self {
        let lock = map.entry(key.clone()).or_default().clone();
        Self { map, key, lock }
    }
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        // 只剩表内与本槽位两个引用时才移除
        self.map.remove_if(&self.key, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

/// 基于远程存储的读穿缓存
pub struct CacheSystem {
    store: Arc<dyn KvStore>,
    metrics: Mutex<HashMap<String, MetricsAcc>>,
    invalidations: Mutex<VecDeque<InvalidationEvent>>,
    // 同一进程内同一个键的并发未命中只计算一次
    inflight: InflightMap,
}

impl CacheSystem {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            metrics: Mutex::new(HashMap::new()),
            invalidations: Mutex::new(VecDeque::new()),
            inflight: DashMap::new(),
        }
    }

    /// 读取缓存；存储故障视为未命中
    pub async fn get<T: DeserializeOwned>(&self, key: &str, policy: &CachePolicy) -> Option<T> {
        let started = Instant::now();
        let full_key = entry_key(&policy.prefix, key);

        match self.lookup(&full_key).await {
            Lookup::Hit(value) => {
                self.observe(policy, Outcome::Hit, started);
                Some(value)
            }
            Lookup::Miss => {
                self.observe(policy, Outcome::Miss, started);
                None
            }
            Lookup::Failed => {
                self.observe(policy, Outcome::Error, started);
                None
            }
        }
    }

    /// 写入缓存，返回是否成功
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, policy: &CachePolicy) -> bool {
        let started = Instant::now();
        let full_key = entry_key(&policy.prefix, key);
        let ttl_ms = policy.ttl.as_millis() as i64;
        let entry = CacheEntry::new(full_key.clone(), value, Utc::now().timestamp_millis(), ttl_ms);

        let stored = match serde_json::to_string(&entry) {
            Ok(json) => self.store.set_ex(&full_key, json, policy.ttl).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match stored {
            Ok(()) => {
                self.observe(policy, Outcome::Set, started);
                true
            }
            Err(err) => {
                tracing::warn!(key = %full_key, "Failed to write cache entry: {}", err);
                self.observe(policy, Outcome::Error, started);
                false
            }
        }
    }

    /// 读穿：命中直接返回，否则调用 `compute` 并写回。`compute` 的错误原样返回且不缓存。
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        policy: &CachePolicy,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key, policy).await {
            return Ok(value);
        }

        let full_key = entry_key(&policy.prefix, key);
        let slot = InflightSlot::acquire(&self.inflight, full_key);
        let _guard = slot.lock.lock().await;

        // 等锁期间可能已有其他请求写入
        match self.lookup::<T>(&slot.key).await {
            Lookup::Hit(value) => Ok(value),
            Lookup::Miss | Lookup::Failed => {
                let value = compute().await?;
                self.set(key, &value, policy).await;
                Ok(value)
            }
        }
    }

    /// 删除匹配模式的所有键
    pub async fn invalidate(
        &self,
        pattern: &str,
        reason: InvalidationReason,
        triggered_by: Option<String>,
    ) -> Vec<String> {
        let keys = match self.store.scan(pattern).await {
            Ok(keys) => keys,
            Err(err) => {
                tracing::error!(pattern, "Failed to scan cache keys: {}", err);
                return Vec::new();
            }
        };

        if let Err(err) = self.store.del(&keys).await {
            tracing::error!(pattern, "Failed to delete cache keys: {}", err);
            return Vec::new();
        }

        let event = InvalidationEvent {
            pattern: pattern.to_string(),
            reason,
            affected_keys: keys.len(),
            sample_keys: keys.iter().take(SAMPLE_KEYS).cloned().collect(),
            timestamp: Utc::now(),
            triggered_by,
        };

        let mut history = self.invalidations.lock();
        history.push_back(event);
        if history.len() > INVALIDATION_HISTORY {
            history.pop_front();
        }

        tracing::info!(pattern, count = keys.len(), "Invalidated cache keys");
        keys
    }

    /// 预热：并发加载尚未缓存的键，单个键失败不影响其他键
    pub async fn warmup<T, E, F, Fut>(
        &self,
        keys: &[String],
        policy: &CachePolicy,
        fetcher: F,
    ) -> WarmupReport
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let tasks = keys.iter().map(|key| {
            let fetch = &fetcher;
            async move {
                let full_key = entry_key(&policy.prefix, key);
                if let Lookup::Hit(_) = self.lookup::<serde_json::Value>(&full_key).await {
                    return Some(false);
                }
                match fetch(key.clone()).await {
                    Ok(value) => Some(self.set(key, &value, policy).await),
                    Err(err) => {
                        tracing::warn!(key = %key, "Cache warmup fetch failed: {}", err);
                        None
                    }
                }
            }
        });

        let mut report = WarmupReport {
            requested: keys.len(),
            ..Default::default()
        };
        for outcome in join_all(tasks).await {
            match outcome {
                Some(true) => report.loaded += 1,
                Some(false) => report.skipped += 1,
                None => report.failed += 1,
            }
        }

        tracing::info!(
            prefix = %policy.prefix,
            loaded = report.loaded,
            skipped = report.skipped,
            failed = report.failed,
            "Cache warmup finished"
        );
        report
    }

    /// 各命名空间的统计
    pub fn metrics(&self) -> BTreeMap<String, CacheMetrics> {
        self.metrics
            .lock()
            .iter()
            .map(|(prefix, acc)| (prefix.clone(), acc.snapshot()))
            .collect()
    }

    pub fn invalidation_history(&self) -> Vec<InvalidationEvent> {
        self.invalidations.lock().iter().cloned().collect()
    }

    async fn lookup<T: DeserializeOwned>(&self, full_key: &str) -> Lookup<T> {
        let json = match self.store.get(full_key).await {
            Ok(Some(json)) => json,
            Ok(None) => return Lookup::Miss,
            Err(err) => {
                tracing::warn!(key = %full_key, store = self.store.name(), "Cache read failed: {}", err);
                return Lookup::Failed;
            }
        };

        match serde_json::from_str::<CacheEntry<T>>(&json) {
            Ok(entry) if entry.is_fresh(Utc::now().timestamp_millis()) => Lookup::Hit(entry.value),
            Ok(_) => {
                tracing::debug!(key = %full_key, "Ignoring stale cache entry");
                Lookup::Miss
            }
            Err(err) => {
                tracing::warn!(key = %full_key, "Undecodable cache entry: {}", err);
                Lookup::Failed
            }
        }
    }

    fn observe(&self, policy: &CachePolicy, outcome: Outcome, started: Instant) {
        if !policy.record_metrics {
            return;
        }
        let mut metrics = self.metrics.lock();
        let acc = metrics.entry(policy.prefix.clone()).or_default();
        match outcome {
            Outcome::Hit => acc.hits += 1,
            Outcome::Miss => acc.misses += 1,
            Outcome::Set => acc.sets += 1,
            Outcome::Error => acc.errors += 1,
        }
        acc.observe(started);
    }
}
