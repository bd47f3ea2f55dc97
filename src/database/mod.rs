// 数据库模块
// 包含安全审计的实体、存储库和操作

pub mod models; // 数据库实体定义
pub mod operations; // 数据库操作实现
pub mod repositories; // 存储库抽象

// 重新导出常用类型，方便其他模块使用
pub use models::audit::{
    AuditCategory, AuditEventType, AuditFilter, NewAuditEvent, SecurityAuditEvent, Severity,
};
pub use operations::audit::AuditSystem;
pub use repositories::audit::{AuditRepository, MemoryAuditRepository, PgAuditRepository};
