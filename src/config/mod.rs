use std::env;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub audit_secret: String,
    pub audit_retention_days: i64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub memory_sweep_interval_secs: u64,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let jwt_secret = env::var("JWT_SECRET")?;
        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.trim_end_matches('h').parse::<u64>().ok())
            .unwrap_or(24);

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            server_port: parse_or("SERVER_PORT", 3000),
            api_base_uri: env::var("API_BASE_URI").unwrap_or_else(|_| "/api".into()),
            audit_secret: env::var("AUDIT_SECRET").unwrap_or_else(|_| jwt_secret.clone()),
            jwt_secret,
            jwt_expiration_secs: jwt_expiration * 3600,
            audit_retention_days: parse_or("AUDIT_RETENTION_DAYS", 365),
            rate_limit_window_secs: parse_or("RATE_LIMIT_WINDOW", 60),
            rate_limit_requests: parse_or("RATE_LIMIT_REQUESTS", 100),
            memory_sweep_interval_secs: parse_or("MEMORY_SWEEP_INTERVAL", 300),
        })
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn memory_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.memory_sweep_interval_secs)
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost/test".into(),
            redis_url: "redis://127.0.0.1/".into(),
            jwt_secret: "test-secret".into(),
            jwt_expiration_secs: 3600,
            audit_secret: "audit-secret".into(),
            audit_retention_days: 365,
            rate_limit_window_secs: 60,
            rate_limit_requests: 3,
            memory_sweep_interval_secs: 300,
            server_host: "127.0.0.1".into(),
            server_port: 3000,
            api_base_uri: "/api".into(),
        }
    }
}

// 缺失或无法解析时使用默认值
fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
