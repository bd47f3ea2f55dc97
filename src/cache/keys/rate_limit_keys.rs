/// 速率限制计数键前缀
pub const RATE_LIMIT_PREFIX: &str = "rate_limit:";

/// 计算固定窗口序号（以 Unix 纪元对齐）
pub fn window_index(now_ms: i64, window_ms: i64) -> i64 {
    now_ms.div_euclid(window_ms.max(1))
}

/// 生成某个窗口的计数键
pub fn rate_limit_key(key: &str, window: i64) -> String {
    format!("{}{}:{}", RATE_LIMIT_PREFIX, key, window)
}

/// 按IP限流的键
pub fn ip_key(ip: &str) -> String {
    format!("ip:{}", ip)
}

/// 按用户限流的键，没有用户时退回IP
pub fn user_key(user_id: Option<&str>, ip: &str) -> String {
    match user_id {
        Some(id) => format!("user:{}", id),
        None => ip_key(ip),
    }
}

/// 按IP + 路由限流的键
pub fn endpoint_key(ip: &str, path: &str) -> String {
    format!("endpoint:{}:{}", ip, path)
}

/// 用户（或IP）+ 路由的混合键
pub fn hybrid_key(user_id: Option<&str>, ip: &str, path: &str) -> String {
    format!("{}:{}", user_key(user_id, ip), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_index_is_epoch_aligned() {
        assert_eq!(window_index(0, 60_000), 0);
        assert_eq!(window_index(59_999, 60_000), 0);
        assert_eq!(window_index(60_000, 60_000), 1);
    }

    #[test]
    fn test_hybrid_key_prefers_user() {
        assert_eq!(hybrid_key(Some("42"), "1.2.3.4", "/api/x"), "user:42:/api/x");
        assert_eq!(hybrid_key(None, "1.2.3.4", "/api/x"), "ip:1.2.3.4:/api/x");
        assert_eq!(rate_limit_key("ip:1.2.3.4", 7), "rate_limit:ip:1.2.3.4:7");
    }
}
