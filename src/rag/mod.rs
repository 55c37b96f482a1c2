//! RAG 모듈 - 검색 증강 답변 오케스트레이터
//!
//! 한 번의 사용자 턴을 처리합니다:
//!
//! 1. 입력 검증 (마지막 메시지는 user)
//! 2. 질문 임베딩
//! 3. 인덱스 존재/문서 수 확인
//! 4. 단계적 검색 (0.7 → 0.5 → 0.3)
//! 5. 프롬프트 조립
//! 6. 스트리밍 생성 (조각을 채널로 즉시 전달)
//! 7. 완료 후 대화 저장, 종료 이벤트
//!
//! 1~5단계 실패는 `RagError`로 즉시 반환되고,
//! 6단계 이후 실패는 채널의 `AnswerEvent::Error`로 전달됩니다.

mod error;
mod indexer;
pub mod prompt;
mod retrieval;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;

use crate::config::{AppConfig, RetrievalConfig};
use crate::embedding::EmbeddingProvider;
use crate::history::{ChatTurn, ConversationStore, Role};
use crate::index::DocumentIndex;
use crate::llm::{ChatModel, PromptMessage};

pub use error::RagError;
pub use indexer::{clean_content, DocumentIndexer, IndexReport};
pub use retrieval::{cascading_search, Retrieval};

/// 자동 제목 길이 (문자 수)
pub const TITLE_CHARS: usize = 20;

/// 이벤트 채널 버퍼 (느린 클라이언트가 생성을 늦추도록 작게 유지)
const EVENT_BUFFER: usize = 32;

// ============================================================================
// Types
// ============================================================================

/// 답변 요청
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub user_id: String,
    /// 이전 턴 + 마지막 user 턴
    pub messages: Vec<ChatTurn>,
    /// 없으면 기본 모델
    pub model: Option<String>,
    /// 이어서 저장할 기존 세션
    pub chat_id: Option<String>,
    /// 없으면 질문 앞 20자
    pub title: Option<String>,
}

/// 스트림 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerEvent {
    /// 모델이 생성한 텍스트 조각
    Fragment(String),
    /// 생성 중 실패 (종료 이벤트)
    Error(String),
    /// 정상 종료. 저장에 성공하면 세션 ID
    Done { chat_id: Option<String> },
}

impl AnswerEvent {
    /// SSE `data:` 페이로드
    pub fn sse_data(&self) -> String {
        match self {
            AnswerEvent::Fragment(content) => json!({ "content": content }).to_string(),
            AnswerEvent::Error(error) => json!({ "error": error }).to_string(),
            AnswerEvent::Done { .. } => "[DONE]".to_string(),
        }
    }

    /// `Error` 또는 `Done`이면 이후 이벤트 없음
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AnswerEvent::Fragment(_))
    }
}

/// 오케스트레이터 설정
#[derive(Debug, Clone)]
pub struct RagSettings {
    pub index_name: String,
    pub default_model: String,
    pub retrieval: RetrievalConfig,
}

impl RagSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            index_name: config.index_name.clone(),
            default_model: config.chat_model.clone(),
            retrieval: config.retrieval.clone(),
        }
    }
}

/// 스트리밍 직전까지 준비된 턴
struct PreparedTurn {
    user_id: String,
    chat_id: Option<String>,
    title: String,
    model: String,
    /// 이전 턴 + user 턴 (저장용)
    messages: Vec<ChatTurn>,
    prompt: Vec<PromptMessage>,
    context: Vec<String>,
}

enum StreamOutcome {
    Completed(String),
    Disconnected,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// RAG 오케스트레이터
///
/// 모든 협력 객체는 생성 시 주입되며, 수명은 프로세스 부트스트랩이 관리합니다.
pub struct Orchestrator {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn DocumentIndex>,
    chat: Arc<dyn ChatModel>,
    store: Arc<dyn ConversationStore>,
    settings: RagSettings,
}

impl Orchestrator {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn DocumentIndex>,
        chat: Arc<dyn ChatModel>,
        store: Arc<dyn ConversationStore>,
        settings: RagSettings,
    ) -> Self {
        Self {
            embedder,
            index,
            chat,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    /// 한 턴에 답변
    ///
    /// 검증/임베딩/인덱스 확인 실패는 Err로 즉시 반환됩니다.
    /// 성공하면 이벤트 수신 채널을 반환하며, 채널은 항상 `Error` 또는 `Done`으로 끝납니다.
    pub async fn answer(
        &self,
        request: AnswerRequest,
    ) -> Result<mpsc::Receiver<AnswerEvent>, RagError> {
        let turn = self.prepare(request).await?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let chat = Arc::clone(&self.chat);
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            stream_and_persist(turn, chat, store, tx).await;
        });

        Ok(rx)
    }

    /// 검증 → 임베딩 → 인덱스 확인 → 검색 → 프롬프트
    ///
    /// 마지막 사용자 메시지가 공백뿐이면 외부 호출 전에 `InvalidInput`으로 거부합니다.
    async fn prepare(&self, request: AnswerRequest) -> Result<PreparedTurn, RagError> {
        let AnswerRequest {
            user_id,
            messages,
            model,
            chat_id,
            title,
        } = request;

        let last = messages
            .last()
            .ok_or_else(|| RagError::InvalidInput("Invalid messages format".to_string()))?;
        if last.role != Role::User {
            return Err(RagError::InvalidInput(
                "Last message must be a user message".to_string(),
            ));
        }

        let question = last.content.trim().to_string();
        if question.is_empty() {
            return Err(RagError::InvalidInput("User message is empty".to_string()));
        }

        // 임베딩
        let embedding = match self.embedder.embed(&question).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => {
                tracing::error!("Embedding provider returned an empty vector");
                return Err(RagError::EmbeddingFailure("empty embedding".to_string()));
            }
            Err(e) => {
                tracing::error!("Query embedding failed: {:#}", e);
                return Err(RagError::EmbeddingFailure(e.to_string()));
            }
        };

        // 인덱스 확인
        let index_name = &self.settings.index_name;
        match self.index.exists(index_name).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!("Index {} does not exist", index_name);
                return Err(RagError::NoIndex);
            }
            Err(e) => {
                tracing::error!("Failed to check index {}: {:#}", index_name, e);
                return Err(RagError::IndexUnavailable(e.to_string()));
            }
        }

        match self.index.count(index_name).await {
            Ok(0) => {
                tracing::error!("Index {} has no documents", index_name);
                return Err(RagError::NoIndex);
            }
            Ok(count) => tracing::debug!("Index {} holds {} documents", index_name, count),
            Err(e) => tracing::error!("Failed to get index stats: {:#}", e),
        }

        // 검색
        let retrieval = cascading_search(
            self.index.as_ref(),
            index_name,
            &embedding,
            &self.settings.retrieval,
        )
        .await;
        let context = retrieval.texts();

        // 프롬프트
        let prompt = prompt::build_prompt(&question, &context);
        match retrieval.min_score {
            Some(min_score) => tracing::info!(
                "Prepared prompt: {} context documents at min_score {}, {} characters",
                context.len(),
                min_score,
                prompt.iter().map(|m| m.content.len()).sum::<usize>()
            ),
            None => tracing::info!(
                "Prepared prompt without context, {} characters",
                prompt.iter().map(|m| m.content.len()).sum::<usize>()
            ),
        }
        tracing::debug!("User question: {}", question);

        let title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| fallback_title(&question));

        Ok(PreparedTurn {
            user_id,
            chat_id,
            title,
            model: model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| self.settings.default_model.clone()),
            messages,
            prompt,
            context,
        })
    }
}

/// 질문 앞 20자 (문자 경계 안전)
pub fn fallback_title(question: &str) -> String {
    question.chars().take(TITLE_CHARS).collect()
}

// ============================================================================
// Streaming
// ============================================================================

/// 생성 → 전달 → 저장 → 종료 이벤트
async fn stream_and_persist(
    turn: PreparedTurn,
    chat: Arc<dyn ChatModel>,
    store: Arc<dyn ConversationStore>,
    tx: mpsc::Sender<AnswerEvent>,
) {
    let full_response = match forward_fragments(chat.as_ref(), &turn, &tx).await {
        Ok(StreamOutcome::Completed(text)) => text,
        Ok(StreamOutcome::Disconnected) => {
            tracing::info!("Client disconnected, abandoning generation for {}", turn.user_id);
            return;
        }
        Err(e) => {
            tracing::error!("Generation error: {:#}", e);
            let _ = tx.send(AnswerEvent::Error(e.to_string())).await;
            return;
        }
    };

    let PreparedTurn {
        user_id,
        chat_id,
        title,
        mut messages,
        context,
        ..
    } = turn;

    messages.push(ChatTurn::assistant(full_response, context));

    let saved_id = match store
        .save_session(&user_id, chat_id.as_deref(), &title, &messages)
        .await
    {
        Ok(session) => {
            tracing::info!("Saved chat {} ({} messages)", session.id, session.messages.len());
            Some(session.id)
        }
        Err(e) => {
            tracing::error!("Failed to persist chat for {}: {:#}", user_id, e);
            None
        }
    };

    let _ = tx.send(AnswerEvent::Done { chat_id: saved_id }).await;
}

/// 모델 조각을 받는 즉시 전달하고 전체 응답을 누적
async fn forward_fragments(
    chat: &dyn ChatModel,
    turn: &PreparedTurn,
    tx: &mpsc::Sender<AnswerEvent>,
) -> anyhow::Result<StreamOutcome> {
    let mut stream = chat.stream_chat(&turn.model, &turn.prompt).await?;
    let mut full_response = String::new();

    while let Some(item) = stream.next().await {
        let chunk = item?;

        if !chunk.content.is_empty() {
            full_response.push_str(&chunk.content);
            if tx.send(AnswerEvent::Fragment(chunk.content)).await.is_err() {
                return Ok(StreamOutcome::Disconnected);
            }
        }

        if chunk.done {
            return Ok(StreamOutcome::Completed(full_response));
        }
    }

    anyhow::bail!("Model stream ended before completion")
}

// ============================================================================
// Tests
// ============================================================================
