use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单个缓存命名空间的统计
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub sets: u64,
    pub errors: u64,
    pub avg_response_ms: f64,
    pub last_access: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    Manual,
    TtlExpired,
    DependencyChanged,
    MemoryPressure,
}

/// 一次缓存失效记录
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InvalidationEvent {
    pub pattern: String,
    pub reason: InvalidationReason,
    pub affected_keys: usize,
    pub sample_keys: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TopCount {
    pub name: String,
    pub count: u64,
}

/// 限流统计快照
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RateLimitMetrics {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    pub remote_hits: u64,
    pub memory_fallbacks: u64,
    pub errors: u64,
    pub average_response_ms: f64,
    pub top_blocked_ips: Vec<TopCount>,
    pub top_endpoints: Vec<TopCount>,
}
