/// 缓存数据模型
/// 定义缓存数据的结构体

pub mod entry;
pub mod metrics;
pub mod rate_limit;

pub use entry::CacheEntry;
pub use metrics::{CacheMetrics, InvalidationEvent, InvalidationReason, RateLimitMetrics, TopCount};
pub use rate_limit::{RateLimitDecision, RateLimitRecord, RateLimitSource};
