use serde::{Deserialize, Serialize};

use crate::cache::models::RateLimitDecision;

#[derive(Debug, Deserialize)]
pub struct CheckPolicyRequest {
    /// 预置策略名，如 CRITICAL_AUTH
    pub policy: String,
    /// 计数维度，缺省时使用客户端IP
    pub key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckPolicyResponse {
    pub policy: String,
    pub key: String,
    #[serde(flatten)]
    pub decision: RateLimitDecision,
}
