//! AppError 与 HTTP 错误响应
//!
//! 跨租户访问统一映射为 `NotFound`，不暴露目标是否存在。
//! 5xx 的内部细节只写日志，响应体里只有通用描述。

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::middleware::current_request_id;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration: {0}")]
    Config(String),

    #[error("unauthenticated")]
    Unauthorized,

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("missing permission {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        use AppError::*;
        match self {
            Unauthorized | Authentication(_) => StatusCode::UNAUTHORIZED,
            Forbidden(_) => StatusCode::FORBIDDEN,
            NotFound(_) => StatusCode::NOT_FOUND,
            BadRequest(_) | Validation(_) => StatusCode::BAD_REQUEST,
            Conflict(_) => StatusCode::CONFLICT,
            Database(_) | Config(_) | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    /// 机器可读的错误类别，随响应返回
    pub fn kind(&self) -> &'static str {
        use AppError::*;
        match self {
            Unauthorized | Authentication(_) => "unauthenticated",
            Forbidden(_) => "forbidden",
            NotFound(_) => "not_found",
            BadRequest(_) => "bad_request",
            Validation(_) => "validation",
            Conflict(_) => "conflict",
            Database(_) | Config(_) | Internal(_) => "internal",
        }
    }

    /// 返回给调用方的描述
    pub fn user_message(&self) -> String {
        use AppError::*;
        match self {
            Unauthorized => "Authentication failed".to_string(),
            Forbidden(permission) => format!("Permission denied: {}", permission),
            NotFound(what) => format!("Resource not found: {}", what),
            Authentication(msg) | BadRequest(msg) | Validation(msg) | Conflict(msg) => msg.clone(),
            Database(_) => "Database error occurred".to_string(),
            Config(_) | Internal(_) => "Internal server error".to_string(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        AppError::Authentication(msg.into())
    }

    pub fn forbidden(permission: impl Into<String>) -> Self {
        AppError::Forbidden(permission.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorPayload,
}

#[derive(Serialize)]
struct ErrorPayload {
    code: u16,
    kind: &'static str,
    message: String,
    request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // 与响应头 x-request-id 一致；脱离 HTTP 请求时单独生成
        let request_id = current_request_id().unwrap_or_else(|| Uuid::new_v4().to_string());

        if status.is_server_error() {
            tracing::error!(code = status.as_u16(), error = %self, request_id = %request_id, "request failed");
        } else {
            // 4xx 属于调用方问题
            tracing::debug!(code = status.as_u16(), error = %self, request_id = %request_id, "request rejected");
        }

        let body = ErrorBody {
            error: ErrorPayload {
                code: status.as_u16(),
                kind: self.kind(),
                message: self.user_message(),
                request_id,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

/// 保留字段级别的细节，按字段名排序
impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = e
            .field_errors()
            .iter()
            .map(|(field, errors)| {
                let reasons = errors
                    .iter()
                    .map(|err| match &err.message {
                        Some(message) => message.to_string(),
                        None => err.code.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}: {}", field, reasons)
            })
            .collect();
        fields.sort();
        AppError::Validation(fields.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::Unauthorized.code(), 401);
        assert_eq!(AppError::authentication("expired").code(), 401);
        assert_eq!(AppError::forbidden("webhooks.delete").code(), 403);
        assert_eq!(AppError::not_found("subscription").code(), 404);
        assert_eq!(AppError::validation("bad").code(), 400);
        assert_eq!(AppError::conflict("already processed").code(), 409);
        assert_eq!(AppError::internal_error("boom").code(), 500);
    }

    #[test]
    fn test_server_errors_hide_detail() {
        let db = AppError::Database(sqlx::Error::RowNotFound);
        assert_eq!(db.user_message(), "Database error occurred");

        let internal = AppError::internal_error("pool exhausted at 10.0.0.3");
        assert!(!internal.user_message().contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn test_response_body_shape() {
        let response = AppError::forbidden("audit.read").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], 403);
        assert_eq!(json["error"]["kind"], "forbidden");
        assert_eq!(json["error"]["message"], "Permission denied: audit.read");
        assert!(json["error"]["request_id"].is_string());
    }

    #[test]
    fn test_validation_errors_keep_field_detail() {
        use validator::Validate;

        #[derive(Validate)]
        struct InboundName {
            #[validate(length(min = 1, message = "must not be empty"))]
            event_name: String,
        }

        let err: AppError = InboundName {
            event_name: String::new(),
        }
        .validate()
        .unwrap_err()
        .into();

        assert_eq!(err.user_message(), "event_name: must not be empty");
    }
}
