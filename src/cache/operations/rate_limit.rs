use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;

use crate::cache::keys::{rate_limit_key, window_index};
use crate::cache::models::{
    RateLimitDecision, RateLimitMetrics, RateLimitRecord, RateLimitSource, TopCount,
};
use crate::cache::store::{KvStore, MemoryStore};

// 保留最近多少次判定的耗时
const RESPONSE_TIME_SAMPLES: usize = 1000;
const TOP_LIST_SIZE: usize = 10;
// IP 与路由计数表的容量上限
pub const MAX_TRACKED_KEYS: usize = 1000;

/// 限流策略
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub name: String,
    pub max_requests: u32,
    pub window: Duration,
    /// 为 false 时只在进程内计数
    pub use_remote: bool,
    pub record_metrics: bool,
    pub log_blocked: bool,
    pub message: String,
}

impl RateLimitPolicy {
    pub fn new(name: &str, max_requests: u32, window: Duration) -> Self {
        Self {
            name: name.to_string(),
            max_requests,
            window,
            use_remote: true,
            record_metrics: true,
            log_blocked: true,
            message: format!("请求过于频繁，请在{}秒后重试", window.as_secs().max(1)),
        }
    }

    pub fn memory_only(mut self) -> Self {
        self.use_remote = false;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.log_blocked = false;
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    /// 预置策略
    pub fn preset(name: &str) -> Option<Self> {
        const MINUTE: u64 = 60;
        let policy = match name {
            "CRITICAL_AUTH" => Self::new(name, 3, Duration::from_secs(15 * MINUTE))
                .with_message("认证尝试过多，请15分钟后重试"),
            "ADMIN_API" => Self::new(name, 50, Duration::from_secs(5 * MINUTE))
                .with_message("管理接口请求超限，请5分钟后重试"),
            "PAYMENT_API" => Self::new(name, 15, Duration::from_secs(10 * MINUTE))
                .with_message("支付接口请求超限，请10分钟后重试"),
            "PUBLIC_API" => Self::new(name, 100, Duration::from_secs(MINUTE)).quiet(),
            "WEBHOOK_API" => Self::new(name, 200, Duration::from_secs(MINUTE))
                .with_message("Webhook 请求超限"),
            "SEARCH_API" => Self::new(name, 60, Duration::from_secs(MINUTE))
                .with_message("搜索请求超限，请1分钟后重试")
                .quiet(),
            "UPLOAD_API" => Self::new(name, 10, Duration::from_secs(5 * MINUTE))
                .with_message("上传次数超限，请5分钟后重试"),
            "DEBUG_API" => Self::new(name, 30, Duration::from_secs(MINUTE)).memory_only(),
            _ => return None,
        };
        Some(policy)
    }

    fn window_ms(&self) -> i64 {
        (self.window.as_millis() as i64).max(1)
    }
}

/// 与一次请求关联的统计维度
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub ip: String,
    pub endpoint: String,
}

#[derive(Default)]
struct MetricsState {
    total: u64,
    allowed: u64,
    blocked: u64,
    remote_hits: u64,
    memory_fallbacks: u64,
    errors: u64,
    response_times: VecDeque<f64>,
    blocked_ips: HashMap<String, u64>,
    endpoints: HashMap<String, u64>,
}

/// 限流统计收集器
#[derive(Default)]
pub struct RateLimitMetricsCollector {
    state: Mutex<MetricsState>,
}

impl RateLimitMetricsCollector {
    pub fn record(&self, decision: &RateLimitDecision, meta: Option<&RequestMeta>, elapsed: Duration) {
        let mut state = self.state.lock();
        state.total += 1;

        if decision.allowed {
            state.allowed += 1;
        } else {
            state.blocked += 1;
            if let Some(meta) = meta {
                bump(&mut state.blocked_ips, &meta.ip);
            }
        }

        match decision.source {
            RateLimitSource::Remote => state.remote_hits += 1,
            RateLimitSource::Memory => state.memory_fallbacks += 1,
            RateLimitSource::Error => state.errors += 1,
        }

        if let Some(meta) = meta {
            bump(&mut state.endpoints, &meta.endpoint);
        }

        state.response_times.push_back(elapsed.as_secs_f64() * 1000.0);
        if state.response_times.len() > RESPONSE_TIME_SAMPLES {
            state.response_times.pop_front();
        }
    }

    pub fn snapshot(&self) -> RateLimitMetrics {
        let state = self.state.lock();
        let average_response_ms = if state.response_times.is_empty() {
            0.0
        } else {
            state.response_times.iter().sum::<f64>() / state.response_times.len() as f64
        };

        RateLimitMetrics {
            total_requests: state.total,
            allowed_requests: state.allowed,
            blocked_requests: state.blocked,
            remote_hits: state.remote_hits,
            memory_fallbacks: state.memory_fallbacks,
            errors: state.errors,
            average_response_ms,
            top_blocked_ips: top_counts(&state.blocked_ips),
            top_endpoints: top_counts(&state.endpoints),
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = MetricsState::default();
    }
}

// 计数加一；表满时先淘汰计数最小的键
fn bump(counts: &mut HashMap<String, u64>, key: &str) {
    if let Some(count) = counts.get_mut(key) {
        *count += 1;
        return;
    }
    if counts.len() >= MAX_TRACKED_KEYS {
        let smallest = counts
            .iter()
            .min_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(name, _)| name.clone());
        if let Some(name) = smallest {
            counts.remove(&name);
        }
    }
    counts.insert(key.to_string(), 1);
}

fn top_counts(counts: &HashMap<String, u64>) -> Vec<TopCount> {
    let mut top: Vec<TopCount> = counts
        .iter()
        .map(|(name, count)| TopCount {
            name: name.clone(),
            count: *count,
        })
        .collect();
    top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    top.truncate(TOP_LIST_SIZE);
    top
}

/// 固定窗口限流器：优先使用远程存储，失败时退回进程内计数
pub struct RateLimiter {
    remote: Arc<dyn KvStore>,
    fallback: Arc<MemoryStore>,
    metrics: RateLimitMetricsCollector,
}

impl RateLimiter {
    pub fn new(remote: Arc<dyn KvStore>, fallback: Arc<MemoryStore>) -> Self {
        Self {
            remote,
            fallback,
            metrics: RateLimitMetricsCollector::default(),
        }
    }

    pub fn metrics(&self) -> &RateLimitMetricsCollector {
        &self.metrics
    }

    /// 计数并判定是否放行
    pub async fn check(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        self.check_at(key, policy, None, Utc::now().timestamp_millis())
            .await
    }

    /// 同 `check`，并把IP与路由计入统计
    pub async fn check_request(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        meta: &RequestMeta,
    ) -> RateLimitDecision {
        self.check_at(key, policy, Some(meta), Utc::now().timestamp_millis())
            .await
    }

    pub(crate) async fn check_at(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        meta: Option<&RequestMeta>,
        now_ms: i64,
    ) -> RateLimitDecision {
        let started = Instant::now();
        let window_ms = policy.window_ms();
        let window = window_index(now_ms, window_ms);
        let store_key = rate_limit_key(key, window);
        // 计数键比窗口多活一秒，避免边界上提前消失
        let ttl = Duration::from_millis(window_ms as u64) + Duration::from_secs(1);

        let counted = if policy.use_remote {
            match self.remote.incr(&store_key, ttl).await {
                Ok(count) => Some((count, RateLimitSource::Remote)),
                Err(err) => {
                    tracing::warn!(
                        key = %store_key,
                        store = self.remote.name(),
                        "Remote rate limit store failed, using memory fallback: {}",
                        err
                    );
                    self.count_in_memory(&store_key, ttl).await
                }
            }
        } else {
            self.count_in_memory(&store_key, ttl).await
        };

        let decision = match counted {
            Some((count, source)) => {
                let record = RateLimitRecord {
                    key: key.to_string(),
                    count,
                    window_start: window * window_ms,
                    window_size_ms: window_ms,
                };
                RateLimitDecision::from_record(&record, policy.max_requests, now_ms, source)
            }
            None => RateLimitDecision {
                allowed: true,
                limit: policy.max_requests,
                remaining: policy.max_requests,
                reset_at: now_ms + window_ms,
                retry_after: None,
                source: RateLimitSource::Error,
            },
        };

        if !decision.allowed && policy.log_blocked {
            tracing::warn!(
                key,
                policy = %policy.name,
                limit = decision.limit,
                source = ?decision.source,
                "Rate limit exceeded"
            );
        }

        if policy.record_metrics {
            self.metrics.record(&decision, meta, started.elapsed());
        }

        decision
    }

    async fn count_in_memory(
        &self,
        store_key: &str,
        ttl: Duration,
    ) -> Option<(u64, RateLimitSource)> {
        match self.fallback.incr(store_key, ttl).await {
            Ok(count) => Some((count, RateLimitSource::Memory)),
            Err(err) => {
                tracing::error!(key = %store_key, "Memory rate limit store failed: {}", err);
                None
            }
        }
    }
}
