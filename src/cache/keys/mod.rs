/// 缓存键模块
/// 提供各种缓存键生成函数

// 速率限制键
pub mod rate_limit_keys;

// 缓存条目键
pub mod entry_keys;

pub use entry_keys::{entry_key, glob_match, prefix_pattern};
pub use rate_limit_keys::{
    endpoint_key, hybrid_key, ip_key, rate_limit_key, user_key, window_index,
};
