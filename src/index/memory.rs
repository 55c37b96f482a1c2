//! In-memory Document Index
//!
//! 인덱스 이름별 문서 목록을 보관하고 코사인 유사도로 전수 검색합니다.
//! 테스트와 단일 프로세스 실행용입니다.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{cosine_similarity, rank, DocumentIndex, IndexedDocument, ScoredDocument};

/// 프로세스 내 문서 인덱스
pub struct MemoryDocumentIndex {
    dimension: usize,
    indices: RwLock<HashMap<String, Vec<IndexedDocument>>>,
}

impl MemoryDocumentIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            indices: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DocumentIndex for MemoryDocumentIndex {
    async fn exists(&self, index: &str) -> Result<bool> {
        Ok(self.indices.read().await.contains_key(index))
    }

    async fn count(&self, index: &str) -> Result<usize> {
        Ok(self.indices.read().await.get(index).map_or(0, Vec::len))
    }

    async fn search(
        &self,
        index: &str,
        query: &[f32],
        max_results: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredDocument>> {
        let indices = self.indices.read().await;
        let Some(docs) = indices.get(index) else {
            return Ok(vec![]);
        };

        let scored = docs
            .iter()
            .map(|d| ScoredDocument {
                text: d.text.clone(),
                score: cosine_similarity(query, &d.embedding),
            })
            .collect();

        Ok(rank(scored, max_results, min_score))
    }

    async fn insert(&self, index: &str, document: IndexedDocument) -> Result<()> {
        if document.embedding.len() != self.dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                document.embedding.len()
            );
        }

        self.indices
            .write()
            .await
            .entry(index.to_string())
            .or_default()
            .push(document);
        Ok(())
    }

    async fn delete(&self, index: &str) -> Result<()> {
        self.indices.write().await.remove(index);
        Ok(())
    }

    async fn create(&self, index: &str) -> Result<()> {
        let mut indices = self.indices.write().await;
        if indices.contains_key(index) {
            anyhow::bail!("Index {} already exists", index);
        }
        indices.insert(index.to_string(), Vec::new());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
