/// 缓存操作
/// 提供限流计数与读穿缓存

// 固定窗口限流
pub mod rate_limit;

// 读穿缓存
pub mod cache_system;

pub use cache_system::{CachePolicy, CacheSystem, WarmupReport};
pub use rate_limit::{RateLimitMetricsCollector, RateLimitPolicy, RateLimiter, RequestMeta};
