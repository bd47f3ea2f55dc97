use std::sync::Arc;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};

use cache::{CacheSystem, KvStore, RateLimitPolicy, RateLimiter};
use config::Config;
use database::AuditSystem;
use middleware::{RateLimitState, log_errors, rate_limit, require_admin};

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// 远程存储（Redis），健康检查使用
    pub store: Arc<dyn KvStore>,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<CacheSystem>,
    pub audit: Arc<AuditSystem>,
}

impl AppState {
    /// 由配置生成的默认限流策略
    pub fn default_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(
            "DEFAULT",
            self.config.rate_limit_requests,
            self.config.rate_limit_window(),
        )
    }
}

/// 组装全部路由与中间件
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(routes::health::health))
        .route("/rate-limit/check", post(routes::rate_limit::check_policy));

    let admin_routes = Router::new()
        .route(
            "/admin/rate-limit/metrics",
            get(routes::rate_limit::rate_limit_metrics),
        )
        .route("/admin/cache/metrics", get(routes::cache::cache_metrics))
        .route("/admin/cache/invalidate", post(routes::cache::invalidate))
        .route(
            "/admin/audit/events",
            post(routes::audit::create_event).get(routes::audit::list_events),
        )
        .route("/admin/audit/events/{id}", get(routes::audit::get_event))
        .route(
            "/admin/audit/events/{id}/verify",
            get(routes::audit::verify_event),
        )
        .route("/admin/audit/stats", get(routes::audit::audit_stats))
        .route("/admin/audit/metrics", get(routes::audit::audit_metrics))
        .route("/admin/audit/anomalies", get(routes::audit::audit_anomalies))
        .route("/admin/audit/purge", post(routes::audit::purge_events))
        .layer(from_fn_with_state(state.config.clone(), require_admin));

    let rate_limit_state = RateLimitState::new(
        state.limiter.clone(),
        state.default_policy(),
        state.config.clone(),
    );

    Router::new()
        .nest(
            &state.config.api_base_uri,
            Router::new().merge(public_routes).merge(admin_routes),
        )
        .layer(from_fn(log_errors))
        .layer(from_fn_with_state(rate_limit_state, rate_limit))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::database::MemoryAuditRepository;

    /// 全部使用进程内存储的应用状态
    pub fn state() -> AppState {
        let mut config = Config::for_tests();
        config.rate_limit_requests = 1000;
        let config = Arc::new(config);
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        AppState {
            limiter: Arc::new(RateLimiter::new(store.clone(), Arc::new(MemoryStore::new()))),
            cache: Arc::new(CacheSystem::new(store.clone())),
            audit: Arc::new(AuditSystem::new(
                Arc::new(MemoryAuditRepository::new()),
                &config.audit_secret,
            )),
            store,
            config,
        }
    }
}
