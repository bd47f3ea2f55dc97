// 键值存储
// RedisStore 为共享的远程存储，MemoryStore 为 Redis 失败时的进程内备用存储

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// 两种存储共同实现的最小命令集
#[async_trait]
pub trait KvStore: Send + Sync {
    /// 日志中使用的名称
    fn name(&self) -> &'static str;

    /// 计数加一并刷新 TTL，返回新值
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// 删除键，返回实际存在的数量
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// 匹配 glob 模式（`*`、`?`）的全部键
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
