pub mod audit;
pub mod cache;
pub mod health;
pub mod rate_limit;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::{
        AppState, build_router,
        cache::{
            CachePolicy, RequestMeta,
            models::{RateLimitDecision, RateLimitSource},
        },
        testing,
        utils::{error_codes, generate_token},
    };

    fn admin_token(state: &AppState) -> String {
        generate_token("admin-1", "admin", &state.config).unwrap().0
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = build_router(testing::state());
        let (status, body) = send(&app, "GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resp_data"]["status"], "ok");
        assert_eq!(body["resp_data"]["store"], "memory");
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin_token() {
        let state = testing::state();
        let app = build_router(state.clone());

        let (status, body) = send(&app, "GET", "/api/admin/audit/stats", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], error_codes::AUTH_FAILED);

        let (token, _) = generate_token("u1", "customer", &state.config).unwrap();
        let (status, _) = send(&app, "GET", "/api/admin/cache/metrics", Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_policy_check_uses_presets() {
        let app = build_router(testing::state());

        let (status, body) = send(
            &app,
            "POST",
            "/api/rate-limit/check",
            None,
            Some(json!({ "policy": "NOPE" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], error_codes::VALIDATION_ERROR);

        let request = json!({ "policy": "CRITICAL_AUTH", "key": "user:42" });
        for _ in 0..3 {
            let (_, body) = send(&app, "POST", "/api/rate-limit/check", None, Some(request.clone())).await;
            assert_eq!(body["resp_data"]["allowed"], true);
        }
        let (status, body) = send(&app, "POST", "/api/rate-limit/check", None, Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resp_data"]["allowed"], false);
        assert_eq!(body["resp_data"]["limit"], 3);
        assert_eq!(body["resp_data"]["source"], "remote");
        assert!(body["resp_data"]["retry_after"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_audit_event_lifecycle() {
        let state = testing::state();
        let app = build_router(state.clone());
        let token = admin_token(&state);

        let (status, body) = send(
            &app,
            "POST",
            "/api/admin/audit/events",
            Some(&token),
            Some(json!({
                "event_type": "PERMISSION_DENIED",
                "category": "authorization",
                "severity": "high",
                "description": "Access to refunds denied",
                "metadata": { "resource": "refunds" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let event = &body["resp_data"];
        assert_eq!(event["actor_id"], "admin-1");
        assert_eq!(event["risk_score"], 85);
        let id = event["id"].as_str().unwrap().to_string();

        let (_, body) = send(
            &app,
            "GET",
            "/api/admin/audit/events?event_type=PERMISSION_DENIED&limit=5",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(body["resp_data"]["total"], 1);
        assert_eq!(body["resp_data"]["limit"], 5);

        let (_, body) = send(
            &app,
            "GET",
            &format!("/api/admin/audit/events/{}/verify", id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(body["resp_data"]["valid"], true);

        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/admin/audit/events/{}", id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resp_data"]["metadata"]["resource"], "refunds");

        let (status, _) = send(
            &app,
            "GET",
            &format!("/api/admin/audit/events/{}", uuid::Uuid::new_v4()),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            "GET",
            &format!("/api/admin/audit/events/{}/verify", uuid::Uuid::new_v4()),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(&app, "GET", "/api/admin/audit/stats", Some(&token), None).await;
        assert_eq!(body["resp_data"]["by_category"]["authorization"], 1);

        let (_, body) = send(&app, "GET", "/api/admin/audit/metrics", Some(&token), None).await;
        assert_eq!(body["resp_data"]["security_score"], 100);
    }

    #[tokio::test]
    async fn test_invalid_audit_event_is_rejected() {
        let state = testing::state();
        let app = build_router(state.clone());
        let token = admin_token(&state);

        let (status, body) = send(
            &app,
            "POST",
            "/api/admin/audit/events",
            Some(&token),
            Some(json!({
                "event_type": "ADMIN_ACTION",
                "category": "admin_operations",
                "severity": "low",
                "description": "   "
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], error_codes::VALIDATION_ERROR);
    }

    #[tokio::test]
    async fn test_cache_invalidation_is_audited() {
        let state = testing::state();
        let app = build_router(state.clone());
        let token = admin_token(&state);

        let policy = CachePolicy::new("products_smart", Duration::from_secs(60));
        state.cache.set("1", &json!({ "sku": 1 }), &policy).await;
        state.cache.set("2", &json!({ "sku": 2 }), &policy).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/admin/cache/invalidate",
            Some(&token),
            Some(json!({ "pattern": "products_smart:*" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resp_data"]["affected_keys"], 2);
        assert!(state.cache.get::<Value>("1", &policy).await.is_none());

        let (_, body) = send(
            &app,
            "GET",
            "/api/admin/audit/events?event_type=CACHE_INVALIDATION",
            Some(&token),
            None,
        )
        .await;
        let events = body["resp_data"]["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["metadata"]["affected_keys"], 2);

        let (_, body) = send(&app, "GET", "/api/admin/cache/metrics", Some(&token), None).await;
        assert_eq!(body["resp_data"]["invalidations"][0]["triggered_by"], "admin-1");
    }

    #[tokio::test]
    async fn test_purge_defaults_to_configured_retention() {
        let state = testing::state();
        let app = build_router(state.clone());
        let token = admin_token(&state);

        let (status, body) = send(&app, "POST", "/api/admin/audit/purge", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resp_data"]["retention_days"], 365);
        assert_eq!(body["resp_data"]["removed"], 0);

        let (status, _) = send(
            &app,
            "POST",
            "/api/admin/audit/purge",
            Some(&token),
            Some(json!({ "retention_days": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_out_of_range_numbers_are_rejected() {
        let state = testing::state();
        let app = build_router(state.clone());
        let token = admin_token(&state);

        let (status, body) = send(
            &app,
            "POST",
            "/api/admin/audit/purge",
            Some(&token),
            Some(json!({ "retention_days": i64::MAX })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], error_codes::VALIDATION_ERROR);

        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/admin/audit/events?page={}", i64::MAX),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], error_codes::VALIDATION_ERROR);
    }

    #[tokio::test]
    async fn test_audit_stats_are_served_from_cache() {
        let state = testing::state();
        let app = build_router(state.clone());
        let token = admin_token(&state);

        for _ in 0..2 {
            let (status, _) = send(&app, "GET", "/api/admin/audit/stats", Some(&token), None).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (_, body) = send(&app, "GET", "/api/admin/cache/metrics", Some(&token), None).await;
        let analytics = &body["resp_data"]["prefixes"]["analytics"];
        assert_eq!(analytics["hits"], 1);
        assert_eq!(analytics["misses"], 1);
        assert_eq!(analytics["sets"], 1);

        // 删除事件后统计缓存失效
        let (status, _) = send(&app, "POST", "/api/admin/audit/purge", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&app, "GET", "/api/admin/audit/stats", Some(&token), None).await;
        assert_eq!(body["resp_data"]["by_type"]["ADMIN_ACTION"], 1);
    }

    #[tokio::test]
    async fn test_warmup_fills_audit_stats_cache() {
        let state = testing::state();
        let app = build_router(state.clone());
        let token = admin_token(&state);

        let report = super::audit::warm_audit_stats(&state).await.unwrap();
        assert_eq!(report.loaded, 1);

        let (status, _) = send(&app, "GET", "/api/admin/audit/stats", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let analytics = state.cache.metrics()["analytics"].clone();
        assert_eq!(analytics.hits, 1);
    }

    #[tokio::test]
    async fn test_anomalies_include_rate_limit_abuse() {
        let state = testing::state();
        let app = build_router(state.clone());
        let token = admin_token(&state);

        let (status, body) = send(&app, "GET", "/api/admin/audit/anomalies", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resp_data"], json!([]));

        // 同一 IP 被拦截多次
        let blocked = RateLimitDecision {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_at: 60_000,
            retry_after: Some(60),
            source: RateLimitSource::Remote,
        };
        let meta = RequestMeta {
            ip: "9.9.9.9".into(),
            endpoint: "/api/rate-limit/check".into(),
        };
        for _ in 0..12 {
            state.limiter.metrics().record(&blocked, Some(&meta), Duration::ZERO);
        }

        let (status, body) = send(&app, "GET", "/api/admin/audit/anomalies", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let anomalies = body["resp_data"].as_array().unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0]["anomaly_type"], "rate_limit_abuse");
        assert_eq!(anomalies[0]["indicators"][0]["value"]["ip"], "9.9.9.9");
        assert_eq!(anomalies[0]["indicators"][0]["value"]["count"], 12);

        let (status, body) = send(
            &app,
            "GET",
            "/api/admin/audit/anomalies?actor_id=nobody",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resp_data"][0]["actor_id"], "unknown");
    }

    #[tokio::test]
    async fn test_global_limiter_adds_headers() {
        let app = build_router(testing::state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-ratelimit-limit"], "1000");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "999");
    }
}
