//! docchat-rag - 문서 기반 RAG 채팅 백엔드
//!
//! 질문을 임베딩해 LanceDB 인덱스에서 단계적 임계값(0.7 → 0.5 → 0.3)으로 문서를 찾고,
//! 문서 블록으로 감싼 프롬프트를 Ollama 채팅 모델에 보내 답변을 SSE로 스트리밍한 뒤
//! 대화를 SQLite에 저장합니다.

pub mod app;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod history;
pub mod index;
pub mod llm;
pub mod rag;
pub mod server;

// Re-exports
pub use app::Services;
pub use config::{get_data_dir, AppConfig, RetrievalConfig};
pub use embedding::{EmbeddingProvider, OllamaEmbedding};
pub use history::{ChatSession, ChatSummary, ChatTurn, ConversationStore, Role, SqliteConversationStore};
pub use index::{DocumentIndex, IndexedDocument, LanceDocumentIndex, MemoryDocumentIndex, ScoredDocument};
pub use llm::{ChatChunk, ChatModel, OllamaChat, PromptMessage};
pub use rag::{AnswerEvent, AnswerRequest, DocumentIndexer, IndexReport, Orchestrator, RagError, RagSettings};
