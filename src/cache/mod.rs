// 缓存模块
// 包含键生成、缓存数据结构、存储实现和操作逻辑

pub mod keys;
pub mod models;
pub mod operations;
pub mod store;

// 重新导出常用类型，方便其他模块使用
pub use operations::{CachePolicy, CacheSystem, RateLimitPolicy, RateLimiter, RequestMeta};
pub use store::{KvStore, MemoryStore, RedisStore};
