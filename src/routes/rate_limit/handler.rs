use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, State, rejection::ExtensionRejection},
    http::HeaderMap,
    response::IntoResponse,
};

use crate::{
    AppState,
    cache::{RateLimitPolicy, keys::ip_key},
    error::AppError,
    utils::{client_ip, success_to_api_response},
};

use super::model::{CheckPolicyRequest, CheckPolicyResponse};

// 预检计数与真实请求计数分开
const CHECK_NAMESPACE: &str = "check";

/// 按预置策略评估一次调用
pub async fn check_policy(
    State(state): State<AppState>,
    connect_info: Result<ConnectInfo<SocketAddr>, ExtensionRejection>,
    headers: HeaderMap,
    Json(req): Json<CheckPolicyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let policy = RateLimitPolicy::preset(&req.policy)
        .ok_or_else(|| AppError::Validation(format!("未知的限流策略: {}", req.policy)))?;

    let subject = match req.key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => {
            let remote = connect_info.ok().map(|ConnectInfo(addr)| addr.ip().to_string());
            ip_key(&client_ip(&headers, remote))
        }
    };
    let key = format!("{}:{}:{}", CHECK_NAMESPACE, policy.name, subject);
    let decision = state.limiter.check(&key, &policy).await;

    Ok(success_to_api_response(CheckPolicyResponse {
        policy: policy.name,
        key: subject,
        decision,
    }))
}

pub async fn rate_limit_metrics(State(state): State<AppState>) -> impl IntoResponse {
    success_to_api_response(state.limiter.metrics().snapshot())
}
