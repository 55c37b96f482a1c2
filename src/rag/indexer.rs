//! 문서 인덱서
//!
//! 업로드된 텍스트 하나를 정리 → 임베딩 → 삽입합니다.
//! 삽입이 실패하면 인덱스를 지우고 다시 만든 뒤 한 번 더 시도합니다.
//! 재생성은 기존 문서를 모두 잃는 파괴적 복구입니다.

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::index::{DocumentIndex, IndexedDocument};

use super::RagError;

/// 검증 검색에 쓰는 앞부분 길이 (문자 수)
const SAMPLE_CHARS: usize = 100;
/// 검증 검색 최소 점수
const VERIFY_MIN_SCORE: f32 = 0.3;

/// 인덱싱 결과
#[derive(Debug, Clone, PartialEq)]
pub struct IndexReport {
    /// 삽입 후 문서 수 (조회 실패 시 None)
    pub document_count: Option<usize>,
    /// 재생성 복구가 일어났는지
    pub recreated: bool,
    /// 검증 검색이 방금 문서를 찾았는지
    pub verified: bool,
}

/// 공백 정규화 (연속 공백/개행을 공백 하나로, 앞뒤 제거)
pub fn clean_content(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct DocumentIndexer {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn DocumentIndex>,
    index_name: String,
}

impl DocumentIndexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn DocumentIndex>,
        index_name: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            index_name: index_name.into(),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// 텍스트 하나를 인덱싱
    pub async fn index_text(&self, raw: &str) -> Result<IndexReport, RagError> {
        let content = clean_content(raw);
        if content.is_empty() {
            return Err(RagError::EmptyContent);
        }
        tracing::info!("Indexing document ({} characters)", content.chars().count());

        let embedding = match self.embedder.embed(&content).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => {
                tracing::error!("Embedding provider returned an empty vector");
                return Err(RagError::EmbeddingFailure("empty embedding".to_string()));
            }
            Err(e) => {
                tracing::error!("Document embedding failed: {:#}", e);
                return Err(RagError::EmbeddingFailure(e.to_string()));
            }
        };

        let name = &self.index_name;
        self.log_diagnostics().await;

        let document = IndexedDocument {
            text: content.clone(),
            embedding,
        };

        let mut recreated = false;
        if let Err(e) = self.index.insert(name, document.clone()).await {
            tracing::error!("Insert into {} failed: {:#}", name, e);
            tracing::warn!("Recreating index {} (existing documents will be lost)", name);

            self.recreate()
                .await
                .map_err(|e| RagError::IndexingFailed(format!("{:#}", e)))?;
            recreated = true;

            self.index.insert(name, document).await.map_err(|e| {
                tracing::error!("Insert after recreation failed: {:#}", e);
                RagError::IndexingFailed(format!("{:#}", e))
            })?;
        }

        let report = IndexReport {
            document_count: self.index.count(name).await.ok(),
            recreated,
            verified: self.verify(&content).await,
        };
        tracing::info!(
            "Indexed document into {} (count: {:?}, recreated: {}, verified: {})",
            name,
            report.document_count,
            report.recreated,
            report.verified
        );
        Ok(report)
    }

    /// 삽입 전 상태 로그 (실패해도 진행)
    async fn log_diagnostics(&self) {
        let name = &self.index_name;
        match self.index.exists(name).await {
            Ok(true) => match self.index.count(name).await {
                Ok(count) => tracing::info!("Index {} holds {} documents before insert", name, count),
                Err(e) => tracing::warn!("Failed to get index stats: {:#}", e),
            },
            Ok(false) => tracing::info!("Index {} does not exist yet", name),
            Err(e) => tracing::warn!("Failed to check index {}: {:#}", name, e),
        }
    }

    async fn recreate(&self) -> anyhow::Result<()> {
        let name = &self.index_name;
        if self.index.exists(name).await? {
            self.index.delete(name).await?;
        }
        self.index.create(name).await
    }

    /// 앞부분으로 검색해 방금 넣은 문서가 잡히는지 확인 (실패해도 진행)
    async fn verify(&self, content: &str) -> bool {
        let sample: String = content.chars().take(SAMPLE_CHARS).collect();

        let query = match self.embedder.embed(&sample).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Verification embedding failed: {:#}", e);
                return false;
            }
        };

        match self
            .index
            .search(&self.index_name, &query, 1, VERIFY_MIN_SCORE)
            .await
        {
            Ok(hits) => !hits.is_empty(),
            Err(e) => {
                tracing::warn!("Verification search failed: {:#}", e);
                false
            }
        }
    }
}
