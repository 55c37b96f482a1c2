//! 서비스 조립
//!
//! 설정으로부터 협력 객체(임베딩, 인덱스, 채팅 모델, 대화 저장소)를 한 번 생성하고
//! 오케스트레이터와 인덱서에 주입합니다. CLI와 서버가 같은 조립 결과를 공유합니다.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::embedding::{EmbeddingProvider, OllamaEmbedding};
use crate::history::{ConversationStore, SqliteConversationStore};
use crate::index::{DocumentIndex, LanceDocumentIndex};
use crate::llm::{ChatModel, OllamaChat};
use crate::rag::{DocumentIndexer, Orchestrator, RagSettings};
use crate::server::AppState;

/// 프로세스 전역 서비스 핸들
#[derive(Clone)]
pub struct Services {
    pub config: Arc<AppConfig>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn DocumentIndex>,
    pub chat: Arc<dyn ChatModel>,
    pub store: Arc<dyn ConversationStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub indexer: Arc<DocumentIndexer>,
}

impl Services {
    /// 설정으로 모든 서비스 열기
    pub async fn open(config: AppConfig) -> Result<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data directory: {}", config.data_dir.display())
        })?;

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            OllamaEmbedding::new(
                &config.ollama_host,
                config.embed_model.clone(),
                config.embed_dimension,
            )
            .context("Failed to create embedding client")?,
        );

        let index: Arc<dyn DocumentIndex> = Arc::new(
            LanceDocumentIndex::open(&config.index_path(), config.embed_dimension)
                .await
                .context("Failed to open document index")?,
        );

        let chat: Arc<dyn ChatModel> = Arc::new(
            OllamaChat::new(&config.ollama_host).context("Failed to create chat client")?,
        );

        let store: Arc<dyn ConversationStore> = Arc::new(
            SqliteConversationStore::open(&config.history_db_path())
                .context("Failed to open conversation store")?,
        );

        Self::assemble(config, embedder, index, chat, store)
    }

    /// 이미 만든 협력 객체로 조립
    ///
    /// 임베딩 차원이 설정과 다르면 인덱스 스키마와 맞지 않으므로 거부합니다.
    pub fn assemble(
        config: AppConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn DocumentIndex>,
        chat: Arc<dyn ChatModel>,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self> {
        if embedder.dimension() != config.embed_dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: {} produces {}, index expects {}",
                embedder.name(),
                embedder.dimension(),
                config.embed_dimension
            );
        }

        let orchestrator = Orchestrator::new(
            Arc::clone(&embedder),
            Arc::clone(&index),
            Arc::clone(&chat),
            Arc::clone(&store),
            RagSettings::from_config(&config),
        );

        let indexer = DocumentIndexer::new(
            Arc::clone(&embedder),
            Arc::clone(&index),
            config.index_name.clone(),
        );

        tracing::debug!(
            "Services assembled (index: {}, model: {}, embedder: {})",
            config.index_name,
            config.chat_model,
            embedder.name()
        );

        Ok(Self {
            config: Arc::new(config),
            embedder,
            index,
            chat,
            store,
            orchestrator: Arc::new(orchestrator),
            indexer: Arc::new(indexer),
        })
    }

    /// HTTP 핸들러 상태
    pub fn app_state(&self) -> AppState {
        AppState {
            orchestrator: Arc::clone(&self.orchestrator),
            indexer: Arc::clone(&self.indexer),
            store: Arc::clone(&self.store),
        }
    }
}
