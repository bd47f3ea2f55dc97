use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cache::models::{CacheMetrics, InvalidationEvent, InvalidationReason};

#[derive(Debug, Serialize)]
pub struct CacheMetricsResponse {
    pub prefixes: BTreeMap<String, CacheMetrics>,
    pub invalidations: Vec<InvalidationEvent>,
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    /// glob 模式，如 products_smart:*
    pub pattern: String,
    pub reason: Option<InvalidationReason>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub pattern: String,
    pub affected_keys: usize,
    pub keys: Vec<String>,
}
