use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use uuid::Uuid;

use crate::utils::{error_codes, error_to_api_response};

/// 键值存储错误（Redis 或进程内存储）
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("value at {0} is not an integer")]
    NotAnInteger(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// 审计存储错误
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("audit event {0} already exists")]
    Duplicate(Uuid),

    #[error("invalid audit event: {0}")]
    Invalid(String),

    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

#[derive(Debug)]
pub enum AppError {
    Unauthorized,
    Forbidden,
    NotFound(String),
    Validation(String),
    Audit(AuditError),
    InternalServerError,
}

impl From<AuditError> for AppError {
    fn from(err: AuditError) -> Self {
        AppError::Audit(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = match self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                "未授权访问".to_string(),
            ),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                error_codes::PERMISSION_DENIED,
                "权限不足".to_string(),
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                error_codes::NOT_FOUND,
                format!("{}不存在", what),
            ),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR, msg)
            }
            AppError::Audit(AuditError::Duplicate(id)) => (
                StatusCode::CONFLICT,
                error_codes::CONFLICT,
                format!("审计事件 {} 已存在", id),
            ),
            AppError::Audit(AuditError::Invalid(msg)) => {
                (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR, msg)
            }
            AppError::Audit(err) => {
                tracing::error!("Audit store failure: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_codes::INTERNAL_ERROR,
                    "审计存储失败".to_string(),
                )
            }
            AppError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "内部服务器错误".to_string(),
            ),
        };

        (status, error_to_api_response::<()>(code, error_message)).into_response()
    }
}
