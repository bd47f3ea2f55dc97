use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client as RedisClient,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tokio::sync::OnceCell;

use super::KvStore;
use crate::error::StoreError;

// SCAN 每批返回的键数量提示
const SCAN_BATCH: usize = 100;
// 限流在请求路径上，Redis 不可用时要尽快降级
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);
const CONNECT_RETRIES: usize = 1;

/// Redis 远程存储，所有命令共用一个自动重连的连接
pub struct RedisStore {
    redis: Arc<RedisClient>,
    manager: OnceCell<ConnectionManager>,
}

impl RedisStore {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self {
            redis,
            manager: OnceCell::new(),
        }
    }

    // 首次使用时建立；建立失败不会缓存，下次调用重试
    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(CONNECT_TIMEOUT)
                    .set_response_timeout(RESPONSE_TIMEOUT)
                    .set_number_of_retries(CONNECT_RETRIES);
                let manager =
                    ConnectionManager::new_with_config(self.redis.as_ref().clone(), config).await?;
                tracing::info!("Redis connection manager established");
                Ok::<_, StoreError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl KvStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;

        // INCR 与 EXPIRE 放在同一个事务里，避免计数键失去过期时间
        let ttl_secs = ttl.as_secs().max(1) as i64;
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        let _: () = conn.pset_ex(key, value, ttl_ms).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection().await?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN 可能重复返回同一个键
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
