// 审计存储库
// 只提供追加、查询和按保留期删除，没有更新操作

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::database::models::audit::{
    AuditEventEntity, AuditFilter, AuditPage, SecurityAuditEvent, SortOrder,
};
use crate::error::AuditError;

const SELECT_COLUMNS: &str = "SELECT id, occurred_at, actor_id, event_type, category, severity, \
     description, metadata, ip_address, user_agent, risk_score, correlation_id, digest \
     FROM security_audit_events";

#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// 追加事件，id 已存在时返回 Duplicate
    async fn insert(&self, event: &SecurityAuditEvent) -> Result<(), AuditError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<SecurityAuditEvent>, AuditError>;

    async fn query(&self, filter: &AuditFilter) -> Result<AuditPage, AuditError>;

    /// cutoff 之后（含）的全部事件，供统计使用
    async fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SecurityAuditEvent>, AuditError>;

    /// 删除 cutoff 之前的事件，返回删除数量
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError>;
}

/// Postgres 审计存储库
pub struct PgAuditRepository {
    db: Arc<PgPool>,
}

impl PgAuditRepository {
    pub fn new(db: Arc<PgPool>) -> Self {
        Self { db }
    }
}

// 拼接过滤条件，查询和计数共用
fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &AuditFilter) {
    builder.push(" WHERE TRUE");
    if let Some(actor_id) = &filter.actor_id {
        builder.push(" AND actor_id = ").push_bind(actor_id.clone());
    }
    if let Some(event_type) = filter.event_type {
        builder.push(" AND event_type = ").push_bind(event_type.as_str());
    }
    if let Some(category) = filter.category {
        builder.push(" AND category = ").push_bind(category.as_str());
    }
    if let Some(severity) = filter.severity {
        builder.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(from) = filter.date_from {
        builder.push(" AND occurred_at >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        builder.push(" AND occurred_at <= ").push_bind(to);
    }
    if let Some(search) = &filter.search {
        builder
            .push(" AND description ILIKE ")
            .push_bind(format!("%{}%", escape_like(search)))
            .push(" ESCAPE '\\'");
    }
}

// 搜索词按字面匹配，转义 LIKE 通配符
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn into_events(rows: Vec<AuditEventEntity>) -> Result<Vec<SecurityAuditEvent>, AuditError> {
    rows.into_iter().map(SecurityAuditEvent::try_from).collect()
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn insert(&self, event: &SecurityAuditEvent) -> Result<(), AuditError> {
        let result = sqlx::query(
            r#"
            INSERT INTO security_audit_events (
                id, occurred_at, actor_id, event_type, category, severity, description,
                metadata, ip_address, user_agent, risk_score, correlation_id, digest
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(event.id)
        .bind(event.timestamp)
        .bind(&event.actor_id)
        .bind(event.event_type.as_str())
        .bind(event.category.as_str())
        .bind(event.severity.as_str())
        .bind(&event.description)
        .bind(sqlx::types::Json(&event.metadata))
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(event.risk_score as i16)
        .bind(&event.correlation_id)
        .bind(&event.digest)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e)
                if e
                    .as_database_error()
                    .is_some_and(|db_err| db_err.is_unique_violation()) =>
            {
                Err(AuditError::Duplicate(event.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<SecurityAuditEvent>, AuditError> {
        let row = sqlx::query_as::<_, AuditEventEntity>(&format!("{} WHERE id = $1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;

        row.map(SecurityAuditEvent::try_from).transpose()
    }

    async fn query(&self, filter: &AuditFilter) -> Result<AuditPage, AuditError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM security_audit_events");
        push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&*self.db).await?;

        let mut select = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        push_filters(&mut select, filter);
        select.push(match filter.sort_order {
            SortOrder::Asc => " ORDER BY occurred_at ASC, id ASC",
            SortOrder::Desc => " ORDER BY occurred_at DESC, id DESC",
        });
        select.push(" LIMIT ").push_bind(filter.limit());
        select.push(" OFFSET ").push_bind(filter.offset());

        let rows: Vec<AuditEventEntity> = select.build_query_as().fetch_all(&*self.db).await?;
        Ok(AuditPage::new(into_events(rows)?, total, filter))
    }

    async fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SecurityAuditEvent>, AuditError> {
        let rows = sqlx::query_as::<_, AuditEventEntity>(&format!(
            "{} WHERE occurred_at >= $1 ORDER BY occurred_at DESC",
            SELECT_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&*self.db)
        .await?;

        into_events(rows)
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let result = sqlx::query("DELETE FROM security_audit_events WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(&*self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

/// 进程内审计存储库，用于测试和无数据库的本地运行
#[derive(Default)]
pub struct MemoryAuditRepository {
    events: RwLock<Vec<SecurityAuditEvent>>,
}

impl MemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditRepository for MemoryAuditRepository {
    async fn insert(&self, event: &SecurityAuditEvent) -> Result<(), AuditError> {
        let mut events = self.events.write();
        if events.iter().any(|e| e.id == event.id) {
            return Err(AuditError::Duplicate(event.id));
        }
        events.push(event.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<SecurityAuditEvent>, AuditError> {
        Ok(self.events.read().iter().find(|e| e.id == id).cloned())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<AuditPage, AuditError> {
        let mut matched: Vec<SecurityAuditEvent> = self
            .events
            .read()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();

        matched.sort_by(|a, b| (a.timestamp, a.id).cmp(&(b.timestamp, b.id)));
        if filter.sort_order == SortOrder::Desc {
            matched.reverse();
        }

        let total = matched.len() as i64;
        let events = matched
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect();
        Ok(AuditPage::new(events, total, filter))
    }

    async fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SecurityAuditEvent>, AuditError> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .cloned()
            .collect())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        Ok((before - events.len()) as u64)
    }
}
