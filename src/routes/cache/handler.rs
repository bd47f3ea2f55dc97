use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, header},
    response::IntoResponse,
};
use serde_json::json;

use crate::{
    AppState,
    cache::models::InvalidationReason,
    database::{AuditCategory, AuditEventType, NewAuditEvent, Severity},
    error::AppError,
    utils::{Claims, client_ip, success_to_api_response},
};

use super::model::{CacheMetricsResponse, InvalidateRequest, InvalidateResponse};

// 最多在响应里返回的键数量
const MAX_RETURNED_KEYS: usize = 100;

pub async fn cache_metrics(State(state): State<AppState>) -> impl IntoResponse {
    success_to_api_response(CacheMetricsResponse {
        prefixes: state.cache.metrics(),
        invalidations: state.cache.invalidation_history(),
    })
}

/// 按模式失效缓存，并写入审计事件
pub async fn invalidate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    Json(req): Json<InvalidateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let pattern = req.pattern.trim();
    if pattern.is_empty() {
        return Err(AppError::Validation("pattern 不能为空".to_string()));
    }

    let reason = req.reason.unwrap_or(InvalidationReason::Manual);
    let keys = state
        .cache
        .invalidate(pattern, reason, Some(claims.sub.clone()))
        .await;

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    let event = NewAuditEvent::new(
        &claims.sub,
        AuditEventType::CacheInvalidation,
        AuditCategory::AdminOperations,
        Severity::Medium,
        &format!("Cache invalidated for pattern {}", pattern),
    )
    .with_metadata(json!({
        "pattern": pattern,
        "reason": reason,
        "affected_keys": keys.len(),
    }))
    .with_client(Some(client_ip(&headers, None)), user_agent);

    // 审计失败不影响失效结果
    if let Err(e) = state.audit.record(event).await {
        tracing::error!(pattern, "Failed to record cache invalidation audit event: {}", e);
    }

    Ok(success_to_api_response(InvalidateResponse {
        pattern: pattern.to_string(),
        affected_keys: keys.len(),
        keys: keys.into_iter().take(MAX_RETURNED_KEYS).collect(),
    }))
}
