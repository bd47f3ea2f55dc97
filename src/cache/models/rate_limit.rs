use serde::{Deserialize, Serialize};

/// 一个窗口内的计数快照
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub key: String,
    pub count: u64,
    pub window_start: i64, // Unix 毫秒
    pub window_size_ms: i64,
}

impl RateLimitRecord {
    pub fn reset_at(&self) -> i64 {
        self.window_start + self.window_size_ms
    }
}

/// 计数来源
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitSource {
    Remote,
    Memory,
    // 两个存储都失败时放行
    Error,
}

/// 单次限流判定结果
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: i64, // Unix 毫秒
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>, // 秒
    pub source: RateLimitSource,
}

impl RateLimitDecision {
    pub fn from_record(
        record: &RateLimitRecord,
        max_requests: u32,
        now_ms: i64,
        source: RateLimitSource,
    ) -> Self {
        let allowed = record.count <= max_requests as u64;
        let remaining = (max_requests as u64).saturating_sub(record.count) as u32;
        let reset_at = record.reset_at();
        let retry_after = if allowed {
            None
        } else {
            // 向上取整到秒，至少 1 秒
            let wait_ms = (reset_at - now_ms).max(0) as u64;
            Some(wait_ms.div_ceil(1000).max(1))
        };

        Self {
            allowed,
            limit: max_requests,
            remaining,
            reset_at,
            retry_after,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(count: u64) -> RateLimitRecord {
        RateLimitRecord {
            key: "ip:1.1.1.1".into(),
            count,
            window_start: 60_000,
            window_size_ms: 60_000,
        }
    }

    #[test]
    fn test_decision_within_limit() {
        let decision = RateLimitDecision::from_record(&record(2), 5, 61_000, RateLimitSource::Remote);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 3);
        assert_eq!(decision.reset_at, 120_000);
        assert_eq!(decision.retry_after, None);
    }

    #[test]
    fn test_decision_over_limit_rounds_retry_up() {
        let decision = RateLimitDecision::from_record(&record(6), 5, 118_500, RateLimitSource::Memory);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after, Some(2));
    }
}
