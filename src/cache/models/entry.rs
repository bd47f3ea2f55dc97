use serde::{Deserialize, Serialize};

/// 缓存条目：值与绝对过期时间一起存储
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub expires_at: i64, // Unix 毫秒
}

impl<T> CacheEntry<T> {
    pub fn new(key: String, value: T, now_ms: i64, ttl_ms: i64) -> Self {
        Self {
            key,
            value,
            expires_at: now_ms + ttl_ms,
        }
    }

    /// 过期条目不得返回，即使存储端尚未淘汰
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at
    }
}
