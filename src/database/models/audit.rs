// 安全审计实体
// 定义审计事件的领域模型与数据库行

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::AuditError;

// 为文本枚举生成 as_str / FromStr / Display
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = AuditError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(AuditError::Corrupt(format!(
                        "unknown {} `{}`",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// 审计事件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    AuthSuccess,
    AuthFailure,
    PermissionDenied,
    SuspiciousActivity,
    RoleChange,
    DataAccess,
    AdminAction,
    SecurityViolation,
    RateLimitExceeded,
    CacheInvalidation,
}

text_enum!(AuditEventType {
    AuthSuccess => "AUTH_SUCCESS",
    AuthFailure => "AUTH_FAILURE",
    PermissionDenied => "PERMISSION_DENIED",
    SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
    RoleChange => "ROLE_CHANGE",
    DataAccess => "DATA_ACCESS",
    AdminAction => "ADMIN_ACTION",
    SecurityViolation => "SECURITY_VIOLATION",
    RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
    CacheInvalidation => "CACHE_INVALIDATION",
});

/// 审计事件分类
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Authentication,
    Authorization,
    DataAccess,
    AdminOperations,
    SuspiciousBehavior,
    SystemOperation,
}

text_enum!(AuditCategory {
    Authentication => "authentication",
    Authorization => "authorization",
    DataAccess => "data_access",
    AdminOperations => "admin_operations",
    SuspiciousBehavior => "suspicious_behavior",
    SystemOperation => "system_operation",
});

/// 严重级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

text_enum!(Severity {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

/// 待写入的审计事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuditEvent {
    pub actor_id: String,
    pub event_type: AuditEventType,
    pub category: AuditCategory,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl NewAuditEvent {
    pub fn new(
        actor_id: &str,
        event_type: AuditEventType,
        category: AuditCategory,
        severity: Severity,
        description: &str,
    ) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            event_type,
            category,
            severity,
            description: description.to_string(),
            metadata: None,
            ip_address: None,
            user_agent: None,
            correlation_id: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    /// 风险评分：严重级别基础分 + 事件类型 + 分类，限制在 0..=100
    pub fn risk_score(&self) -> u8 {
        let severity = match self.severity {
            Severity::Critical => 80,
            Severity::High => 60,
            Severity::Medium => 40,
            Severity::Low => 20,
        };
        let event_type = match self.event_type {
            AuditEventType::AuthFailure => 10,
            AuditEventType::PermissionDenied => 15,
            AuditEventType::SuspiciousActivity => 25,
            AuditEventType::SecurityViolation => 30,
            _ => 0,
        };
        let category = match self.category {
            AuditCategory::Authentication => 5,
            AuditCategory::Authorization => 10,
            AuditCategory::SuspiciousBehavior => 20,
            _ => 0,
        };

        (severity + event_type + category).min(100) as u8
    }

    /// 生成不可变的审计事件，时间戳截断到微秒以便与 Postgres 往返一致
    pub fn into_event(self, secret: &str) -> SecurityAuditEvent {
        let risk_score = self.risk_score();
        let id = Uuid::new_v4();
        let mut event = SecurityAuditEvent {
            id,
            timestamp: Utc::now().trunc_subsecs(6),
            actor_id: self.actor_id,
            event_type: self.event_type,
            category: self.category,
            severity: self.severity,
            description: self.description,
            metadata: self
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            risk_score,
            correlation_id: self
                .correlation_id
                .unwrap_or_else(|| format!("corr_{}", id.simple())),
            digest: String::new(),
        };
        event.digest = event.compute_digest(secret);
        event
    }
}

/// 已写入的审计事件，只追加、不修改
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityAuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub event_type: AuditEventType,
    pub category: AuditCategory,
    pub severity: Severity,
    pub description: String,
    pub metadata: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub risk_score: u8,
    pub correlation_id: String,
    pub digest: String,
}

impl SecurityAuditEvent {
    /// 完整性摘要：SHA-256(secret, 关键字段)
    pub fn compute_digest(&self, secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        for field in [
            self.id.to_string(),
            self.timestamp.timestamp_micros().to_string(),
            self.actor_id.clone(),
            self.event_type.as_str().to_string(),
            self.category.as_str().to_string(),
            self.severity.as_str().to_string(),
            self.description.clone(),
            self.risk_score.to_string(),
            self.correlation_id.clone(),
        ] {
            hasher.update([0u8]);
            hasher.update(field.as_bytes());
        }

        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    pub fn verify(&self, secret: &str) -> bool {
        self.digest == self.compute_digest(secret)
    }
}

/// 审计表的数据库行
#[derive(Debug, Clone, FromRow)]
pub struct AuditEventEntity {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: String,
    pub event_type: String,
    pub category: String,
    pub severity: String,
    pub description: String,
    pub metadata: sqlx::types::Json<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub risk_score: i16,
    pub correlation_id: String,
    pub digest: String,
}

impl TryFrom<AuditEventEntity> for SecurityAuditEvent {
    type Error = AuditError;

    fn try_from(row: AuditEventEntity) -> Result<Self, Self::Error> {
        Ok(SecurityAuditEvent {
            id: row.id,
            timestamp: row.occurred_at,
            actor_id: row.actor_id,
            event_type: row.event_type.parse()?,
            category: row.category.parse()?,
            severity: row.severity.parse()?,
            description: row.description,
            metadata: row.metadata.0,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            risk_score: u8::try_from(row.risk_score)
                .map_err(|_| AuditError::Corrupt(format!("risk_score {}", row.risk_score)))?,
            correlation_id: row.correlation_id,
            digest: row.digest,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// 审计查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    pub actor_id: Option<String>,
    pub event_type: Option<AuditEventType>,
    pub category: Option<AuditCategory>,
    pub severity: Option<Severity>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub sort_order: SortOrder,
}

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
/// 允许请求的最大页码
pub const MAX_PAGE: i64 = 100_000;

impl AuditFilter {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page().min(MAX_PAGE) - 1).saturating_mul(self.limit())
    }

    pub fn validate(&self) -> Result<(), AuditError> {
        if self.page.is_some_and(|page| page > MAX_PAGE) {
            return Err(AuditError::Invalid(format!("page 不能超过 {}", MAX_PAGE)));
        }
        Ok(())
    }

    /// 内存实现使用的匹配逻辑，与 SQL 条件保持一致
    pub fn matches(&self, event: &SecurityAuditEvent) -> bool {
        self.actor_id.as_ref().is_none_or(|a| &event.actor_id == a)
            && self.event_type.is_none_or(|t| event.event_type == t)
            && self.category.is_none_or(|c| event.category == c)
            && self.severity.is_none_or(|s| event.severity == s)
            && self.date_from.is_none_or(|from| event.timestamp >= from)
            && self.date_to.is_none_or(|to| event.timestamp <= to)
            && self.search.as_ref().is_none_or(|needle| {
                event
                    .description
                    .to_lowercase()
                    .contains(&needle.to_lowercase())
            })
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPage {
    pub events: Vec<SecurityAuditEvent>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

impl AuditPage {
    pub fn new(events: Vec<SecurityAuditEvent>, total: i64, filter: &AuditFilter) -> Self {
        let limit = filter.limit();
        Self {
            events,
            total,
            page: filter.page(),
            limit,
            total_pages: (total + limit - 1) / limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorCount {
    pub actor_id: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecentActivity {
    pub last_24h: u64,
    pub last_7d: u64,
    pub last_30d: u64,
}

/// 仪表盘统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditStats {
    pub window_days: i64,
    pub total_events: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    pub by_category: BTreeMap<String, u64>,
    pub recent_activity: RecentActivity,
    pub top_actors: Vec<ActorCount>,
}

/// 最近 24 小时的安全指标
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SecurityMetrics {
    pub total_events_24h: u64,
    pub critical_events_24h: u64,
    pub unique_actors_24h: u64,
    pub auth_failures_24h: u64,
    pub suspicious_activities_24h: u64,
    pub average_risk_score: f64,
    pub security_score: u8,
}

/// 异常类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    UnusualLoginPattern,
    RateLimitAbuse,
}

/// 异常判定依据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyIndicator {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: serde_json::Value,
    pub weight: f64,
    pub description: String,
}

/// 检测到的安全异常，只在请求时计算，不落库
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityAnomaly {
    pub id: Uuid,
    pub actor_id: String,
    pub anomaly_type: AnomalyType,
    pub confidence: f64,
    pub description: String,
    pub indicators: Vec<AnomalyIndicator>,
    pub risk_level: Severity,
    pub detected_at: DateTime<Utc>,
    pub automated_actions: Vec<String>,
    pub manual_review_required: bool,
}
