//! HTTP 서버 (axum)
//!
//! # Endpoints
//!
//! | Method   | Path                    | Description                         |
//! |----------|-------------------------|-------------------------------------|
//! | `GET`    | `/health`               | 상태 확인                           |
//! | `GET`    | `/api/chat`             | 사용자 세션 목록                    |
//! | `POST`   | `/api/chat`             | 질문 → SSE 스트리밍 답변            |
//! | `GET`    | `/api/chat/{id}`        | 세션 메시지                         |
//! | `PATCH`  | `/api/chat/{id}`        | 메시지 목록 교체                    |
//! | `DELETE` | `/api/chat/{id}`        | 세션 삭제                           |
//! | `PATCH`  | `/api/chat/{id}/title`  | 제목 변경                           |
//! | `POST`   | `/api/chat/upload`      | 텍스트 문서 인덱싱                  |
//!
//! 사용자 식별은 앞단 게이트웨이가 넣어 주는 `X-User-Id` 헤더를 신뢰합니다.

mod error;

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::request::Parts;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures::stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::history::{ChatSession, ChatSummary, ChatTurn, ConversationStore};
use crate::rag::{AnswerEvent, AnswerRequest, DocumentIndexer, Orchestrator};

pub use error::ApiError;

/// 사용자 식별 헤더
pub const USER_HEADER: &str = "x-user-id";

// ============================================================================
// State
// ============================================================================

/// 핸들러 공유 상태
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub indexer: Arc<DocumentIndexer>,
    pub store: Arc<dyn ConversationStore>,
}

/// 라우터 생성
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/chat", get(handle_list_chats).post(handle_chat))
        .route("/api/chat/upload", post(handle_upload))
        .route(
            "/api/chat/{id}",
            get(handle_get_chat)
                .patch(handle_update_messages)
                .delete(handle_delete_chat),
        )
        .route("/api/chat/{id}/title", patch(handle_update_title))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// 서버 실행 (Ctrl+C로 종료)
pub async fn run_server(state: AppState, bind: &str) -> anyhow::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Server listening on http://{}", bind);
    println!("[*] 서버 시작: http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    println!("[OK] 서버 종료");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

// ============================================================================
// Extractors
// ============================================================================

/// `X-User-Id` 헤더에서 꺼낸 사용자 ID
#[derive(Debug, Clone, PartialEq)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or(ApiError::Unauthorized)
    }
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatBody {
    #[serde(default)]
    messages: Vec<ChatTurn>,
    model_name: Option<String>,
    chat_id: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesBody {
    messages: Vec<ChatTurn>,
}

#[derive(Debug, Deserialize)]
struct TitleBody {
    #[serde(default)]
    title: String,
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_list_chats(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    Ok(Json(state.store.list_sessions(&user_id).await?))
}

async fn handle_get_chat(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> Result<Json<Vec<ChatTurn>>, ApiError> {
    state
        .store
        .get_session(&user_id, &id)
        .await?
        .map(|session| Json(session.messages))
        .ok_or_else(|| ApiError::NotFound("Chat not found or not authorized".to_string()))
}

async fn handle_delete_chat(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.store.delete_session(&user_id, &id).await? {
        tracing::info!("Deleted chat {} for {}", id, user_id);
        Ok(Json(json!({ "message": "Chat deleted successfully" })))
    } else {
        Err(ApiError::NotFound("Chat not found or not authorized".to_string()))
    }
}

async fn handle_update_messages(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
    payload: Result<Json<MessagesBody>, JsonRejection>,
) -> Result<Json<ChatSession>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    state
        .store
        .replace_messages(&user_id, &id, &body.messages)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::BadRequest("Chat not found or update failed".to_string()))
}

async fn handle_update_title(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
    payload: Result<Json<TitleBody>, JsonRejection>,
) -> Result<Json<ChatSession>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    state
        .store
        .rename_session(&user_id, &id, &body.title)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::BadRequest("An error has occurred while updating the chat".to_string())
        })
}

/// 질문 → SSE 스트림
///
/// 스트리밍 시작 전 실패는 JSON 에러 응답, 이후 실패는 `data: {"error": ...}` 이벤트입니다.
async fn handle_chat(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload.map_err(|e| {
        tracing::warn!("Rejected chat request body: {}", e.body_text());
        ApiError::BadRequest("Invalid messages format".to_string())
    })?;

    let rx = state
        .orchestrator
        .answer(AnswerRequest {
            user_id,
            messages: body.messages,
            model: body.model_name,
            chat_id: body.chat_id,
            title: body.title,
        })
        .await?;

    Ok(sse_response(rx))
}

/// 이벤트 채널을 SSE 응답으로 변환
fn sse_response(rx: mpsc::Receiver<AnswerEvent>) -> Response {
    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<Event, Infallible>(Event::default().data(event.sse_data())), rx))
    });

    let mut response = Sse::new(events).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

/// 텍스트 문서 업로드 → 인덱싱
async fn handle_upload(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !content_type.trim_start().starts_with("text/") {
        let shown = if content_type.is_empty() { "none" } else { content_type };
        return Err(ApiError::BadRequest(format!("Unsupported file type: {}", shown)));
    }

    tracing::info!("Upload from {} ({} bytes)", user_id, body.len());
    let text = decode_text(&body);
    let report = state.indexer.index_text(&text).await?;

    let message = if report.recreated {
        "File indexed successfully (after index recreation)"
    } else {
        "File indexed successfully"
    };

    Ok(Json(json!({
        "message": message,
        "documentCount": report.document_count,
    })))
}

/// UTF-8 디코딩, 실패하면 Latin-1 (바이트 → U+0000..U+00FF)
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            tracing::warn!("Upload is not valid UTF-8, decoding as Latin-1");
            bytes.iter().map(|&b| char::from(b)).collect()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
