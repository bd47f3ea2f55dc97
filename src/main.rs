use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use storefront_guard::{
    AppState, build_router,
    cache::{CacheSystem, KvStore, MemoryStore, RateLimiter, RedisStore},
    config::Config,
    database::{AuditSystem, PgAuditRepository},
};
#[cfg(debug_assertions)]
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Arc::new(Config::from_env().expect("Failed to load configuration"));

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'storefront_guard';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    // 设置 Redis 客户端，连接管理器在首次使用时建立并自动重连，启动时 Redis 不可用也能运行
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let store: Arc<dyn KvStore> = Arc::new(RedisStore::new(Arc::new(redis_client)));
    if let Err(e) = store.ping().await {
        tracing::warn!("Redis unavailable at startup, rate limiting falls back to memory: {}", e);
    }

    // 进程内备用存储及其清理任务
    let fallback = Arc::new(MemoryStore::new());
    fallback
        .clone()
        .spawn_sweeper(config.memory_sweep_interval());

    // 设置应用状态
    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        limiter: Arc::new(RateLimiter::new(store.clone(), fallback)),
        cache: Arc::new(CacheSystem::new(store)),
        audit: Arc::new(AuditSystem::new(
            Arc::new(PgAuditRepository::new(Arc::new(pool))),
            &config.audit_secret,
        )),
    };

    if let Err(e) = storefront_guard::routes::audit::warm_audit_stats(&state).await {
        tracing::warn!("Audit stats warmup failed: {:?}", e);
    }

    let router = build_router(state);

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
