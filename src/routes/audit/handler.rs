use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, header},
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    AppState,
    cache::{CachePolicy, models::InvalidationReason, operations::WarmupReport},
    database::{AuditCategory, AuditEventType, AuditFilter, NewAuditEvent, Severity},
    error::AppError,
    utils::{Claims, client_ip, success_to_api_response},
};

use super::model::{
    AnomalyQuery, CreateEventRequest, PurgeRequest, PurgeResponse, VerifyResponse,
};

// 审计统计的缓存键，位于 ANALYTICS_DATA 命名空间下
const STATS_CACHE_KEY: &str = "audit:stats";
const METRICS_CACHE_KEY: &str = "audit:security_metrics";
const AUDIT_CACHE_PATTERN: &str = "analytics:audit:*";

fn analytics_policy() -> Result<CachePolicy, AppError> {
    CachePolicy::preset("ANALYTICS_DATA").ok_or_else(|| {
        tracing::error!("Missing ANALYTICS_DATA cache preset");
        AppError::InternalServerError
    })
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}

pub async fn create_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    Json(req): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, AppError> {
    let actor_id = req.actor_id.unwrap_or_else(|| claims.sub.clone());
    let mut event = NewAuditEvent::new(
        &actor_id,
        req.event_type,
        req.category,
        req.severity,
        &req.description,
    )
    .with_client(Some(client_ip(&headers, None)), user_agent(&headers));
    event.metadata = req.metadata;
    event.correlation_id = req.correlation_id;

    let recorded = state.audit.record(event).await?;
    Ok(success_to_api_response(recorded))
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(filter): Query<AuditFilter>,
) -> Result<impl IntoResponse, AppError> {
    let page = state.audit.query(&filter).await?;
    Ok(success_to_api_response(page))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let event = state
        .audit
        .find(id)
        .await?
        .ok_or_else(|| AppError::NotFound("审计事件".to_string()))?;
    Ok(success_to_api_response(event))
}

pub async fn verify_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let valid = state
        .audit
        .verify(id)
        .await?
        .ok_or_else(|| AppError::NotFound("审计事件".to_string()))?;
    Ok(success_to_api_response(VerifyResponse { id, valid }))
}

/// 统计结果经缓存读穿，15 分钟内复用
pub async fn audit_stats(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let policy = analytics_policy()?;
    let stats = state
        .cache
        .get_or_compute(STATS_CACHE_KEY, &policy, || state.audit.stats())
        .await?;
    Ok(success_to_api_response(stats))
}

pub async fn audit_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let policy = analytics_policy()?;
    let metrics = state
        .cache
        .get_or_compute(METRICS_CACHE_KEY, &policy, || state.audit.security_metrics())
        .await?;
    Ok(success_to_api_response(metrics))
}

/// 启动时预先计算审计统计
pub async fn warm_audit_stats(state: &AppState) -> Result<WarmupReport, AppError> {
    let policy = analytics_policy()?;
    let audit = state.audit.clone();
    Ok(state
        .cache
        .warmup(&[STATS_CACHE_KEY.to_string()], &policy, |_| audit.stats())
        .await)
}

pub async fn audit_anomalies(
    State(state): State<AppState>,
    Query(query): Query<AnomalyQuery>,
) -> Result<impl IntoResponse, AppError> {
    let rate_limits = state.limiter.metrics().snapshot();
    let anomalies = state
        .audit
        .detect_anomalies(query.actor_id.as_deref(), &rate_limits)
        .await?;
    Ok(success_to_api_response(anomalies))
}

/// 按保留期删除旧事件，删除操作本身也会留下审计记录
pub async fn purge_events(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    req: Result<Json<PurgeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    // 请求体可省略
    let retention_days = req
        .ok()
        .and_then(|Json(req)| req.retention_days)
        .unwrap_or(state.config.audit_retention_days);

    let removed = state.audit.purge(retention_days).await?;

    let event = NewAuditEvent::new(
        &claims.sub,
        AuditEventType::AdminAction,
        AuditCategory::AdminOperations,
        Severity::High,
        &format!("Purged audit events older than {} days", retention_days),
    )
    .with_metadata(json!({ "retention_days": retention_days, "removed": removed }))
    .with_client(Some(client_ip(&headers, None)), user_agent(&headers));
    state.audit.record(event).await?;

    // 删除后缓存的统计已过时
    state
        .cache
        .invalidate(
            AUDIT_CACHE_PATTERN,
            InvalidationReason::DependencyChanged,
            Some(claims.sub.clone()),
        )
        .await;

    Ok(success_to_api_response(PurgeResponse {
        retention_days,
        removed,
    }))
}
