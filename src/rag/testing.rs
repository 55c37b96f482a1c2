//! 테스트용 스크립트 협력 객체

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;

use super::AnswerEvent;
use crate::embedding::EmbeddingProvider;
use crate::history::{ChatSession, ChatSummary, ChatTurn, ConversationStore};
use crate::index::{DocumentIndex, IndexedDocument, ScoredDocument};
use crate::llm::{ChatChunk, ChatModel, ChatStream, PromptMessage};

pub async fn collect(mut rx: mpsc::Receiver<AnswerEvent>) -> Vec<AnswerEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn fragment(content: &str) -> ChatChunk {
    ChatChunk {
        content: content.to_string(),
        done: false,
    }
}

// ============================================================================
// Embedder
// ============================================================================

pub struct StubEmbedder {
    vector: Vec<f32>,
    fail: bool,
    calls: AtomicUsize,
    texts: Mutex<Vec<String>>,
}

impl StubEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            fail: false,
            calls: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![1.0])
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().push(text.to_string());
        if self.fail {
            anyhow::bail!("embedding service down");
        }
        Ok(self.vector.clone())
    }

    fn dimension(&self) -> usize {
        self.vector.len()
    }

    fn name(&self) -> &str {
        "stub"
    }
}

// ============================================================================
// Index
// ============================================================================

pub struct ScriptedIndex {
    exists: Option<bool>,
    count: Option<usize>,
    hits: Vec<(f32, Vec<String>)>,
    fail_at: Option<f32>,
    insert_failures: AtomicUsize,
    searched: Mutex<Vec<f32>>,
    ops: Mutex<Vec<String>>,
    inserted: Mutex<Vec<IndexedDocument>>,
}

impl ScriptedIndex {
    /// 존재하고 문서가 있는 인덱스 (검색 결과 없음)
    pub fn new() -> Self {
        Self {
            exists: Some(true),
            count: Some(10),
            hits: Vec::new(),
            fail_at: None,
            insert_failures: AtomicUsize::new(0),
            searched: Mutex::new(Vec::new()),
            ops: Mutex::new(Vec::new()),
            inserted: Mutex::new(Vec::new()),
        }
    }

    pub fn missing() -> Self {
        Self {
            exists: Some(false),
            count: Some(0),
            ..Self::new()
        }
    }

    pub fn empty() -> Self {
        Self {
            count: Some(0),
            ..Self::new()
        }
    }

    /// 해당 임계값 검색이 반환할 문서
    pub fn hit(mut self, min_score: f32, texts: &[&str]) -> Self {
        self.hits
            .push((min_score, texts.iter().map(|t| t.to_string()).collect()));
        self
    }

    pub fn failing_at(mut self, min_score: f32) -> Self {
        self.fail_at = Some(min_score);
        self
    }

    /// 존재 확인 자체가 실패
    pub fn failing_exists(mut self) -> Self {
        self.exists = None;
        self
    }

    pub fn failing_count(mut self) -> Self {
        self.count = None;
        self
    }

    /// 처음 `n`번의 insert 실패
    pub fn failing_inserts(self, n: usize) -> Self {
        self.insert_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn searched(&self) -> Vec<f32> {
        self.searched.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn inserted(&self) -> Vec<IndexedDocument> {
        self.inserted.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentIndex for ScriptedIndex {
    async fn exists(&self, _index: &str) -> Result<bool> {
        self.exists
            .ok_or_else(|| anyhow::anyhow!("index backend unreachable"))
    }

    async fn count(&self, _index: &str) -> Result<usize> {
        self.count
            .ok_or_else(|| anyhow::anyhow!("stats unavailable"))
    }

    async fn search(
        &self,
        _index: &str,
        _query: &[f32],
        _max_results: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredDocument>> {
        self.searched.lock().unwrap().push(min_score);
        if self.fail_at == Some(min_score) {
            anyhow::bail!("search backend error");
        }

        let docs = self
            .hits
            .iter()
            .find(|(score, _)| *score == min_score)
            .map(|(score, texts)| {
                texts
                    .iter()
                    .map(|t| ScoredDocument {
                        text: t.clone(),
                        score: *score,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(docs)
    }

    async fn insert(&self, _index: &str, document: IndexedDocument) -> Result<()> {
        self.ops.lock().unwrap().push("insert".to_string());
        let remaining = self.insert_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.insert_failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("mapping conflict");
        }
        self.inserted.lock().unwrap().push(document);
        Ok(())
    }

    async fn delete(&self, _index: &str) -> Result<()> {
        self.ops.lock().unwrap().push("delete".to_string());
        Ok(())
    }

    async fn create(&self, _index: &str) -> Result<()> {
        self.ops.lock().unwrap().push("create".to_string());
        Ok(())
    }
}

// ============================================================================
// Chat model
// ============================================================================

pub struct ScriptedChat {
    chunks: Vec<Result<ChatChunk, String>>,
    fail_request: bool,
    prompts: Mutex<Vec<(String, Vec<PromptMessage>)>>,
}

impl ScriptedChat {
    pub fn new(chunks: Vec<Result<ChatChunk, String>>) -> Self {
        Self {
            chunks,
            fail_request: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 조각들 뒤에 done 청크
    pub fn answering(fragments: &[&str]) -> Self {
        let mut chunks: Vec<Result<ChatChunk, String>> =
            fragments.iter().map(|f| Ok(fragment(f))).collect();
        chunks.push(Ok(ChatChunk {
            content: String::new(),
            done: true,
        }));
        Self::new(chunks)
    }

    pub fn failing_request() -> Self {
        Self {
            fail_request: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn prompts(&self) -> Vec<(String, Vec<PromptMessage>)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn stream_chat(&self, model: &str, messages: &[PromptMessage]) -> Result<ChatStream> {
        self.prompts
            .lock()
            .unwrap()
            .push((model.to_string(), messages.to_vec()));
        if self.fail_request {
            anyhow::bail!("connection refused");
        }

        let items: Vec<Result<ChatChunk>> = self
            .chunks
            .iter()
            .cloned()
            .map(|r| r.map_err(anyhow::Error::msg))
            .collect();
        Ok(stream::iter(items).boxed())
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct SavedCall {
    pub user_id: String,
    pub chat_id: Option<String>,
    pub title: String,
    pub messages: Vec<ChatTurn>,
}

#[derive(Default)]
pub struct RecordingStore {
    fail: bool,
    saved: Mutex<Vec<SavedCall>>,
}

impl RecordingStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Vec<SavedCall> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationStore for RecordingStore {
    async fn save_session(
        &self,
        user_id: &str,
        chat_id: Option<&str>,
        title: &str,
        messages: &[ChatTurn],
    ) -> Result<ChatSession> {
        if self.fail {
            anyhow::bail!("disk full");
        }

        let mut saved = self.saved.lock().unwrap();
        saved.push(SavedCall {
            user_id: user_id.to_string(),
            chat_id: chat_id.map(str::to_string),
            title: title.to_string(),
            messages: messages.to_vec(),
        });

        let now = Utc::now();
        Ok(ChatSession {
            id: chat_id
                .map(str::to_string)
                .unwrap_or_else(|| format!("chat-{}", saved.len())),
            user_id: user_id.to_string(),
            title: title.to_string(),
            messages: messages.to_vec(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn list_sessions(&self, _user_id: &str) -> Result<Vec<ChatSummary>> {
        Ok(Vec::new())
    }

    async fn get_session(&self, _user_id: &str, _chat_id: &str) -> Result<Option<ChatSession>> {
        Ok(None)
    }

    async fn rename_session(
        &self,
        _user_id: &str,
        _chat_id: &str,
        _title: &str,
    ) -> Result<Option<ChatSession>> {
        Ok(None)
    }

    async fn replace_messages(
        &self,
        _user_id: &str,
        _chat_id: &str,
        _messages: &[ChatTurn],
    ) -> Result<Option<ChatSession>> {
        Ok(None)
    }

    async fn delete_session(&self, _user_id: &str, _chat_id: &str) -> Result<bool> {
        Ok(false)
    }
}
