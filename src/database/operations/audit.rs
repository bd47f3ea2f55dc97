// 安全审计操作
// 负责事件的评分、签名、写入以及统计

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::cache::models::RateLimitMetrics;
use crate::database::models::audit::{
    ActorCount, AnomalyIndicator, AnomalyType, AuditCategory, AuditEventType, AuditFilter,
    AuditPage, AuditStats, NewAuditEvent, RecentActivity, SecurityAnomaly, SecurityAuditEvent,
    SecurityMetrics, Severity,
};
use crate::database::repositories::audit::AuditRepository;
use crate::error::AuditError;

/// 统计窗口（天）
pub const STATS_WINDOW_DAYS: i64 = 30;
const TOP_ACTORS: usize = 10;
const HIGH_RISK_THRESHOLD: u8 = 80;
const MAX_DESCRIPTION_LEN: usize = 2000;
/// 保留期上限（天）
pub const MAX_RETENTION_DAYS: i64 = 36_500;
// 低于该置信度的异常不上报
const ANOMALY_CONFIDENCE: f64 = 0.7;
// 单个 IP 被拦截达到该次数视为滥用
const RATE_LIMIT_ABUSE_BLOCKS: u64 = 10;

pub struct AuditSystem {
    repo: Arc<dyn AuditRepository>,
    secret: String,
}

impl AuditSystem {
    pub fn new(repo: Arc<dyn AuditRepository>, secret: &str) -> Self {
        Self {
            repo,
            secret: secret.to_string(),
        }
    }

    /// 记录审计事件
    pub async fn record(&self, new: NewAuditEvent) -> Result<SecurityAuditEvent, AuditError> {
        if new.actor_id.trim().is_empty() {
            return Err(AuditError::Invalid("actor_id 不能为空".into()));
        }
        if new.description.trim().is_empty() {
            return Err(AuditError::Invalid("description 不能为空".into()));
        }
        if new.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(AuditError::Invalid(format!(
                "description 不能超过 {} 个字符",
                MAX_DESCRIPTION_LEN
            )));
        }

        let event = new.into_event(&self.secret);
        self.repo.insert(&event).await?;

        if event.severity == Severity::Critical || event.risk_score > HIGH_RISK_THRESHOLD {
            tracing::warn!(
                event_id = %event.id,
                actor_id = %event.actor_id,
                event_type = %event.event_type,
                risk_score = event.risk_score,
                "High-risk security event recorded"
            );
        } else {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Audit event recorded");
        }

        Ok(event)
    }

    pub async fn query(&self, filter: &AuditFilter) -> Result<AuditPage, AuditError> {
        filter.validate()?;
        self.repo.query(filter).await
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<SecurityAuditEvent>, AuditError> {
        self.repo.find_by_id(id).await
    }

    /// 重新计算摘要，事件不存在时返回 None
    pub async fn verify(&self, id: Uuid) -> Result<Option<bool>, AuditError> {
        let Some(event) = self.repo.find_by_id(id).await? else {
            return Ok(None);
        };

        let valid = event.verify(&self.secret);
        if !valid {
            tracing::error!(event_id = %id, "Audit event digest mismatch");
        }
        Ok(Some(valid))
    }

    /// 最近 30 天的仪表盘统计
    pub async fn stats(&self) -> Result<AuditStats, AuditError> {
        let now = Utc::now();
        let events = self
            .repo
            .since(now - Duration::days(STATS_WINDOW_DAYS))
            .await?;
        Ok(build_stats(&events, now))
    }

    /// 最近 24 小时的安全指标
    pub async fn security_metrics(&self) -> Result<SecurityMetrics, AuditError> {
        let events = self.repo.since(Utc::now() - Duration::hours(24)).await?;
        Ok(build_security_metrics(&events))
    }

    /// 删除超出保留期的事件
    pub async fn purge(&self, retention_days: i64) -> Result<u64, AuditError> {
        if !(1..=MAX_RETENTION_DAYS).contains(&retention_days) {
            return Err(AuditError::Invalid(format!(
                "retention_days 必须在 1 到 {} 之间",
                MAX_RETENTION_DAYS
            )));
        }

        let cutoff = Duration::try_days(retention_days)
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
            .ok_or_else(|| AuditError::Invalid("retention_days 超出范围".into()))?;
        let removed = self.repo.delete_before(cutoff).await?;
        tracing::info!(retention_days, removed, "Purged expired audit events");
        Ok(removed)
    }

    /// 最近 24 小时的异常检测，可按操作者过滤
    pub async fn detect_anomalies(
        &self,
        actor: Option<&str>,
        rate_limits: &RateLimitMetrics,
    ) -> Result<Vec<SecurityAnomaly>, AuditError> {
        let now = Utc::now();
        let mut events = self.repo.since(now - Duration::hours(24)).await?;
        if let Some(actor) = actor {
            events.retain(|e| e.actor_id == actor);
        }
        events.sort_by_key(|e| e.timestamp);

        let mut anomalies = detect_login_patterns(&events, now);
        anomalies.extend(detect_rate_limit_abuse(&events, rate_limits, now));
        anomalies.retain(|a| a.confidence >= ANOMALY_CONFIDENCE);

        for anomaly in &anomalies {
            tracing::warn!(
                anomaly_id = %anomaly.id,
                actor_id = %anomaly.actor_id,
                anomaly_type = ?anomaly.anomaly_type,
                confidence = anomaly.confidence,
                "Security anomaly detected"
            );
        }
        Ok(anomalies)
    }
}

fn indicator(kind: &str, value: serde_json::Value, weight: f64, description: String) -> AnomalyIndicator {
    AnomalyIndicator {
        kind: kind.to_string(),
        value,
        weight,
        description,
    }
}

// 认证事件按操作者分组；事件需按时间升序
fn detect_login_patterns(events: &[SecurityAuditEvent], now: DateTime<Utc>) -> Vec<SecurityAnomaly> {
    let auth: Vec<&SecurityAuditEvent> = events
        .iter()
        .filter(|e| e.category == AuditCategory::Authentication)
        .collect();
    if auth.len() < 3 {
        return Vec::new();
    }

    let mut by_actor: BTreeMap<&str, Vec<&SecurityAuditEvent>> = BTreeMap::new();
    for event in auth {
        by_actor.entry(event.actor_id.as_str()).or_default().push(event);
    }

    let mut anomalies = Vec::new();
    for (actor_id, actor_events) in by_actor {
        let failures: Vec<_> = actor_events
            .iter()
            .filter(|e| e.event_type == AuditEventType::AuthFailure)
            .collect();
        let successes: Vec<_> = actor_events
            .iter()
            .filter(|e| e.event_type == AuditEventType::AuthSuccess)
            .collect();
        let mut indicators = Vec::new();

        // 多次失败后登录成功
        if let (Some(last_failure), Some(first_success)) = (failures.last(), successes.first()) {
            if failures.len() >= 3 && first_success.timestamp > last_failure.timestamp {
                indicators.push(indicator(
                    "brute_force_success",
                    json!({
                        "failures": failures.len(),
                        "time_diff_ms": (first_success.timestamp - last_failure.timestamp).num_milliseconds(),
                    }),
                    0.8,
                    format!("{} 次失败后登录成功", failures.len()),
                ));
            }
        }

        let ips: BTreeSet<&str> = actor_events
            .iter()
            .filter_map(|e| e.ip_address.as_deref())
            .collect();
        if ips.len() >= 3 {
            indicators.push(indicator(
                "multiple_ips",
                json!({ "ip_count": ips.len(), "ips": ips }),
                0.6,
                format!("来自 {} 个不同 IP 的登录", ips.len()),
            ));
        }

        // 按 UTC 计算登录小时
        let unusual_hours: Vec<u32> = successes
            .iter()
            .map(|e| e.timestamp.hour())
            .filter(|hour| *hour < 6 || *hour > 22)
            .collect();
        if !unusual_hours.is_empty() {
            indicators.push(indicator(
                "unusual_hours",
                json!({ "unusual_count": unusual_hours.len(), "hours": unusual_hours }),
                0.4,
                format!("{} 次非常规时段登录", unusual_hours.len()),
            ));
        }

        let weight: f64 = indicators.iter().map(|i| i.weight).sum();
        if indicators.len() < 2 || weight < ANOMALY_CONFIDENCE {
            continue;
        }

        let summary = indicators
            .iter()
            .map(|i| i.description.as_str())
            .collect::<Vec<_>>()
            .join("，");
        anomalies.push(SecurityAnomaly {
            id: Uuid::new_v4(),
            actor_id: actor_id.to_string(),
            anomaly_type: AnomalyType::UnusualLoginPattern,
            confidence: weight.min(1.0),
            description: format!("检测到异常登录模式：{}", summary),
            indicators,
            risk_level: if weight > 0.8 { Severity::High } else { Severity::Medium },
            detected_at: now,
            automated_actions: vec!["log_incident".into(), "notify_security_team".into()],
            manual_review_required: weight > 0.8,
        });
    }
    anomalies
}

fn detect_rate_limit_abuse(
    events: &[SecurityAuditEvent],
    rate_limits: &RateLimitMetrics,
    now: DateTime<Utc>,
) -> Vec<SecurityAnomaly> {
    if rate_limits.blocked_requests == 0 {
        return Vec::new();
    }

    rate_limits
        .top_blocked_ips
        .iter()
        .filter(|ip| ip.count >= RATE_LIMIT_ABUSE_BLOCKS)
        .map(|ip| {
            let mut indicators = vec![indicator(
                "rate_limit_violations",
                json!({ "count": ip.count, "ip": ip.name }),
                0.8,
                format!("IP {} 触发限流 {} 次", ip.name, ip.count),
            )];

            // 按首次出现的顺序保留操作者
            let mut actors: Vec<&str> = Vec::new();
            for event in events.iter().filter(|e| e.ip_address.as_deref() == Some(ip.name.as_str())) {
                if !actors.contains(&event.actor_id.as_str()) {
                    actors.push(event.actor_id.as_str());
                }
            }
            if actors.len() > 1 {
                indicators.push(indicator(
                    "multiple_users_same_ip",
                    json!({ "user_count": actors.len(), "ip": ip.name }),
                    0.6,
                    format!("同一 IP 下有 {} 个不同用户", actors.len()),
                ));
            }

            SecurityAnomaly {
                id: Uuid::new_v4(),
                actor_id: actors.first().copied().unwrap_or("unknown").to_string(),
                anomaly_type: AnomalyType::RateLimitAbuse,
                confidence: 0.8,
                description: format!("检测到来自 IP {} 的限流滥用", ip.name),
                indicators,
                risk_level: Severity::High,
                detected_at: now,
                automated_actions: vec!["block_ip".into(), "log_incident".into()],
                manual_review_required: false,
            }
        })
        .collect()
}

fn build_stats(events: &[SecurityAuditEvent], now: DateTime<Utc>) -> AuditStats {
    let mut by_type = BTreeMap::new();
    let mut by_severity = BTreeMap::new();
    let mut by_category = BTreeMap::new();
    let mut actors: HashMap<&str, u64> = HashMap::new();
    let mut recent = RecentActivity::default();

    let day = now - Duration::hours(24);
    let week = now - Duration::days(7);

    for event in events {
        *by_type.entry(event.event_type.as_str().to_string()).or_insert(0) += 1;
        *by_severity.entry(event.severity.as_str().to_string()).or_insert(0) += 1;
        *by_category.entry(event.category.as_str().to_string()).or_insert(0) += 1;
        *actors.entry(event.actor_id.as_str()).or_insert(0) += 1;

        recent.last_30d += 1;
        if event.timestamp >= week {
            recent.last_7d += 1;
        }
        if event.timestamp >= day {
            recent.last_24h += 1;
        }
    }

    let mut top_actors: Vec<ActorCount> = actors
        .into_iter()
        .map(|(actor_id, count)| ActorCount {
            actor_id: actor_id.to_string(),
            count,
        })
        .collect();
    top_actors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.actor_id.cmp(&b.actor_id)));
    top_actors.truncate(TOP_ACTORS);

    AuditStats {
        window_days: STATS_WINDOW_DAYS,
        total_events: events.len() as u64,
        by_type,
        by_severity,
        by_category,
        recent_activity: recent,
        top_actors,
    }
}

fn build_security_metrics(events: &[SecurityAuditEvent]) -> SecurityMetrics {
    let count_type = |t: AuditEventType| events.iter().filter(|e| e.event_type == t).count() as u64;

    let critical = events
        .iter()
        .filter(|e| e.severity == Severity::Critical)
        .count() as u64;
    let auth_failures = count_type(AuditEventType::AuthFailure);
    let suspicious = count_type(AuditEventType::SuspiciousActivity);
    let unique_actors = events
        .iter()
        .map(|e| e.actor_id.as_str())
        .collect::<HashSet<_>>()
        .len() as u64;
    let average_risk_score = if events.is_empty() {
        0.0
    } else {
        events.iter().map(|e| e.risk_score as f64).sum::<f64>() / events.len() as f64
    };

    SecurityMetrics {
        total_events_24h: events.len() as u64,
        critical_events_24h: critical,
        unique_actors_24h: unique_actors,
        auth_failures_24h: auth_failures,
        suspicious_activities_24h: suspicious,
        average_risk_score,
        security_score: security_score(critical, auth_failures, suspicious),
    }
}

/// 100 - 10·critical - 2·(auth_failures-10) - 5·(suspicious-5)，限制在 0..=100
pub fn security_score(critical: u64, auth_failures: u64, suspicious: u64) -> u8 {
    let penalty = critical.saturating_mul(10)
        + auth_failures.saturating_sub(10).saturating_mul(2)
        + suspicious.saturating_sub(5).saturating_mul(5);
    100u64.saturating_sub(penalty) as u8
}
