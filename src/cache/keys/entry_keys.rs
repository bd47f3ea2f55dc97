/// 生成带命名空间的缓存键
pub fn entry_key(prefix: &str, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

/// 命名空间下全部键的匹配模式
pub fn prefix_pattern(prefix: &str) -> String {
    format!("{}:*", prefix)
}

/// 简单的 glob 匹配，只支持 `*` 与 `?`，与 Redis SCAN MATCH 的常用子集一致
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    let (mut pi, mut ki) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ki));
            pi += 1;
        } else if let Some((sp, sk)) = star {
            pi = sp + 1;
            ki = sk + 1;
            star = Some((sp, sk + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}
