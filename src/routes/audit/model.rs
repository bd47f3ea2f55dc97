use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::{AuditCategory, AuditEventType, Severity};

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    /// 缺省时使用当前管理员
    pub actor_id: Option<String>,
    pub event_type: AuditEventType,
    pub category: AuditCategory,
    pub severity: Severity,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub id: Uuid,
    pub valid: bool,
}

#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    pub retention_days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub retention_days: i64,
    pub removed: u64,
}

#[derive(Debug, Deserialize)]
pub struct AnomalyQuery {
    pub actor_id: Option<String>,
}
