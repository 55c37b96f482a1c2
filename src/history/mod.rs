//! History 모듈 - 채팅 세션 저장소
//!
//! - 타입: Role, ChatTurn, ChatSession, ChatSummary
//! - ConversationStore: 사용자별 세션 CRUD 인터페이스 (소유자만 접근 가능)
//! - SqliteConversationStore: rusqlite 구현

mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use sqlite::SqliteConversationStore;

// ============================================================================
// Types
// ============================================================================

/// 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 대화 한 턴
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    /// 답변 생성에 사용된 검색 문서 (assistant 턴만)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<String>>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            context: None,
        }
    }

    pub fn assistant(content: impl Into<String>, context: Vec<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            context: Some(context),
        }
    }
}

/// 저장된 채팅 세션
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub messages: Vec<ChatTurn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 목록 조회용 세션 요약
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// ConversationStore Trait
// ============================================================================

/// 대화 저장소 트레이트
///
/// 모든 조회/수정은 `(user_id, chat_id)` 쌍으로 이루어지며,
/// 다른 사용자의 세션은 존재하지 않는 것처럼 동작합니다.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 세션 저장
    ///
    /// `chat_id`가 없으면 새 세션을 만들고, 있으면 해당 세션의 메시지 목록을 교체합니다.
    /// 소유하지 않은 `chat_id`는 에러입니다.
    async fn save_session(
        &self,
        user_id: &str,
        chat_id: Option<&str>,
        title: &str,
        messages: &[ChatTurn],
    ) -> Result<ChatSession>;

    /// 사용자 세션 목록 (최근 수정 순)
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSummary>>;

    /// 세션 조회
    async fn get_session(&self, user_id: &str, chat_id: &str) -> Result<Option<ChatSession>>;

    /// 제목 변경
    async fn rename_session(
        &self,
        user_id: &str,
        chat_id: &str,
        title: &str,
    ) -> Result<Option<ChatSession>>;

    /// 메시지 목록 전체 교체
    async fn replace_messages(
        &self,
        user_id: &str,
        chat_id: &str,
        messages: &[ChatTurn],
    ) -> Result<Option<ChatSession>>;

    /// 세션 삭제
    async fn delete_session(&self, user_id: &str, chat_id: &str) -> Result<bool>;
}

// ============================================================================
// Tests
// ============================================================================
