use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::database::StoreError;
use crate::llm::LlmError;
use crate::utils::error_codes;

/// 接口层错误，转换为带稳定 `kind` 的 JSON 响应
///
/// 模型与存储的内部原因只写日志，不返回给调用方。
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("username already exists")]
    DuplicateUser,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("model backend unavailable: {0}")]
    ModelUnavailable(#[from] LlmError),
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: i32,
    kind: &'static str,
    error: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::DuplicateUser | AppError::InvalidCredentials => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::ModelUnavailable(_) | AppError::Store(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::DuplicateUser => "duplicate_user",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::Unauthenticated => "unauthenticated",
            AppError::ModelUnavailable(_) => "model_unavailable",
            AppError::Store(_) | AppError::Internal(_) => "internal_error",
        }
    }

    fn code(&self) -> i32 {
        match self {
            AppError::Validation(_) => error_codes::VALIDATION_ERROR,
            AppError::DuplicateUser => error_codes::DUPLICATE_USER,
            AppError::InvalidCredentials => error_codes::INVALID_CREDENTIALS,
            AppError::Unauthenticated => error_codes::UNAUTHENTICATED,
            AppError::ModelUnavailable(_) => error_codes::MODEL_UNAVAILABLE,
            AppError::Store(_) | AppError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Validation(m) => m.clone(),
            AppError::DuplicateUser => "用户已存在".to_string(),
            AppError::InvalidCredentials => "用户名或密码错误".to_string(),
            AppError::Unauthenticated => "未登录，请先登录".to_string(),
            AppError::ModelUnavailable(_) => "模型服务暂不可用".to_string(),
            AppError::Store(_) | AppError::Internal(_) => "内部服务器错误".to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateUser => AppError::DuplicateUser,
            StoreError::UnknownIdentity(_) => AppError::Unauthenticated,
            other => AppError::Store(other),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(format!("请求体无效: {}", rejection.body_text()))
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(e: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("bcrypt: {}", e))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("blocking task failed: {}", e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::ModelUnavailable(e) => tracing::error!("Model backend error: {}", e),
            AppError::Store(e) => tracing::error!("Store error: {}", e),
            AppError::Internal(m) => tracing::error!("Internal error: {}", m),
            _ => {}
        }

        let status = self.status();
        let body = Json(ErrorResponse {
            code: self.code(),
            kind: self.kind(),
            error: self.client_message(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use serde_json::Value;

    use super::*;

    async fn body_of(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validation_error_is_bad_request() {
        let (status, body) = body_of(AppError::Validation("提示词不能为空".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation_error");
        assert_eq!(body["code"], 1000);
        assert_eq!(body["error"], "提示词不能为空");
    }

    #[test]
    fn store_errors_map_to_auth_and_conflict() {
        let err: AppError = StoreError::UnknownIdentity(uuid::Uuid::new_v4()).into();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err: AppError = StoreError::DuplicateUser.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "duplicate_user");
    }

    #[tokio::test]
    async fn internal_details_are_not_leaked() {
        let io = std::io::Error::other("/var/lib/secret path");
        let (status, body) = body_of(StoreError::Io(io).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "internal_error");
        assert!(!body["error"].as_str().unwrap().contains("secret"));
    }
}
