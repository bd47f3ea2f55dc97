use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// ok 或 degraded（远程存储不可用，限流退回进程内计数）
    pub status: String,
    pub store: String,
    pub store_up: bool,
    pub timestamp: DateTime<Utc>,
}
