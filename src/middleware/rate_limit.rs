use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    cache::{
        RateLimitPolicy, RateLimiter, RequestMeta, keys::hybrid_key, models::RateLimitDecision,
    },
    config::Config,
    utils::{client_ip, error_codes, error_to_api_response, verify_token},
};

/// 限流中间件的状态：一个限流器 + 一条策略
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<RateLimiter>,
    policy: Arc<RateLimitPolicy>,
    config: Arc<Config>,
}

impl RateLimitState {
    pub fn new(limiter: Arc<RateLimiter>, policy: RateLimitPolicy, config: Arc<Config>) -> Self {
        Self {
            limiter,
            policy: Arc::new(policy),
            config,
        }
    }
}

// 未命中任何路由的请求共用一个端点名
const UNMATCHED_ENDPOINT: &str = "unmatched";

// 携带有效令牌时按用户计数，否则按IP
fn bearer_subject(headers: &HeaderMap, config: &Config) -> Option<String> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))?;
    verify_token(token.trim(), config).ok().map(|claims| claims.sub)
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    // 重置时间以秒为单位，向上取整
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from((decision.reset_at + 999).div_euclid(1000)),
    );
    if let Some(retry_after) = decision.retry_after {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    }
}

pub async fn rate_limit(
    State(state): State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // 从连接信息获取原始IP
    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());
    let ip = client_ip(req.headers(), remote_ip);
    let user_id = bearer_subject(req.headers(), &state.config);
    // 使用路由模板而非原始路径，避免每个不同的 URL 各占一个计数
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string());

    let key = hybrid_key(user_id.as_deref(), &ip, &endpoint);
    let meta = RequestMeta { ip, endpoint };
    let decision = state.limiter.check_request(&key, &state.policy, &meta).await;

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        (
            StatusCode::TOO_MANY_REQUESTS,
            error_to_api_response::<()>(error_codes::RATE_LIMIT, state.policy.message.clone()),
        )
            .into_response()
    };

    apply_headers(response.headers_mut(), &decision);
    response
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{Router, middleware::from_fn_with_state, routing::get};
    use tower::ServiceExt;

    use super::*;
    use crate::cache::{KvStore, MemoryStore};
    use crate::utils::generate_token;

    fn app(max_requests: u32) -> (Router, Arc<RateLimiter>) {
        let remote: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let limiter = Arc::new(RateLimiter::new(remote, Arc::new(MemoryStore::new())));
        let policy = RateLimitPolicy::new("test", max_requests, Duration::from_secs(3600));
        let state = RateLimitState::new(limiter.clone(), policy, Arc::new(Config::for_tests()));

        let router = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .route("/items/{id}", get(|| async { "item" }))
            .layer(from_fn_with_state(state, rate_limit));
        (router, limiter)
    }

    fn request(ip: &str, token: Option<&str>) -> Request<Body> {
        request_to("/ping", ip, token)
    }

    fn request_to(uri: &str, ip: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri).header("x-forwarded-for", ip);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_blocks_with_429_after_limit() {
        let (app, limiter) = app(2);

        for remaining in ["1", "0"] {
            let response = app.clone().oneshot(request("1.2.3.4", None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["x-ratelimit-limit"], "2");
            assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
            assert!(response.headers().get(header::RETRY_AFTER).is_none());
        }

        let response = app.clone().oneshot(request("1.2.3.4", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        assert!(response.headers().contains_key("x-ratelimit-reset"));

        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], error_codes::RATE_LIMIT);

        let metrics = limiter.metrics().snapshot();
        assert_eq!(metrics.blocked_requests, 1);
        assert_eq!(metrics.top_blocked_ips[0].name, "1.2.3.4");
    }

    #[tokio::test]
    async fn test_clients_are_counted_separately() {
        let (app, _) = app(1);
        let config = Config::for_tests();
        let (token, _) = generate_token("user-7", "customer", &config).unwrap();

        assert_eq!(
            app.clone().oneshot(request("1.1.1.1", None)).await.unwrap().status(),
            StatusCode::OK
        );
        assert_eq!(
            app.clone().oneshot(request("2.2.2.2", None)).await.unwrap().status(),
            StatusCode::OK
        );
        // 同一IP但携带用户令牌，使用用户键
        assert_eq!(
            app.clone()
                .oneshot(request("1.1.1.1", Some(&token)))
                .await
                .unwrap()
                .status(),
            StatusCode::OK
        );
        assert_eq!(
            app.clone().oneshot(request("1.1.1.1", None)).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_endpoints_are_tracked_by_route_template() {
        let (app, limiter) = app(100);

        for uri in ["/items/1", "/items/2", "/items/3"] {
            let response = app.clone().oneshot(request_to(uri, "3.3.3.3", None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        for uri in ["/nope/a", "/nope/b"] {
            let response = app.clone().oneshot(request_to(uri, "3.3.3.3", None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        let metrics = limiter.metrics().snapshot();
        assert_eq!(metrics.top_endpoints.len(), 2);
        assert_eq!(metrics.top_endpoints[0].name, "/items/{id}");
        assert_eq!(metrics.top_endpoints[0].count, 3);
        assert_eq!(metrics.top_endpoints[1].name, "unmatched");
        assert_eq!(metrics.top_endpoints[1].count, 2);
    }

    #[tokio::test]
    async fn test_one_budget_per_route_template() {
        let (app, _) = app(2);

        for uri in ["/items/1", "/items/2"] {
            let response = app.clone().oneshot(request_to(uri, "4.4.4.4", None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        // 换一个 id 不会得到新的配额
        let response = app.clone().oneshot(request_to("/items/3", "4.4.4.4", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
