//! HTTP 에러 응답
//!
//! 모든 핸들러는 `Result<T, ApiError>`를 반환하며, 에러는 `{"error": "..."}` JSON 본문으로 변환됩니다.
//! 내부 에러는 상세 내용을 로그로만 남기고 클라이언트에는 일반 메시지를 보냅니다.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::rag::RagError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// 사용자 식별 헤더 없음
    #[error("Missing user identity")]
    Unauthorized,

    #[error(transparent)]
    Rag(#[from] RagError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Rag(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 클라이언트에 노출할 메시지
    fn client_message(&self) -> String {
        match self {
            ApiError::BadRequest(m) | ApiError::NotFound(m) => m.clone(),
            ApiError::Unauthorized => self.to_string(),
            ApiError::Rag(e) => match e {
                RagError::EmbeddingFailure(detail) => {
                    tracing::error!("Embedding failure: {}", detail);
                    "Embedding generation failed".to_string()
                }
                RagError::IndexUnavailable(detail) => {
                    tracing::error!("Index unavailable: {}", detail);
                    "Document index unavailable".to_string()
                }
                RagError::IndexingFailed(detail) => {
                    tracing::error!("Indexing failed: {}", detail);
                    "Indexing failed even after recreation".to_string()
                }
                other => other.to_string(),
            },
            ApiError::Internal(detail) => {
                tracing::error!("Internal server error: {}", detail);
                "internal server error".to_string()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.client_message();
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", e))
    }
}
