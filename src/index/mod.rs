//! Index 모듈 - 문서 벡터 인덱스
//!
//! - DocumentIndex: 이름 있는 인덱스 단위의 존재/개수/검색/삽입/삭제/생성
//! - LanceDocumentIndex: LanceDB 테이블 = 인덱스
//! - MemoryDocumentIndex: 프로세스 내 인덱스 (코사인 유사도 전수 검색)

mod lance;
mod memory;

use anyhow::Result;
use async_trait::async_trait;

pub use lance::LanceDocumentIndex;
pub use memory::MemoryDocumentIndex;

// ============================================================================
// Types
// ============================================================================

/// 인덱싱할 문서
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub text: String,
    pub embedding: Vec<f32>,
}

/// 검색된 문서
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub text: String,
    /// 유사도 스코어 (높을수록 관련성 높음)
    pub score: f32,
}

// ============================================================================
// DocumentIndex Trait
// ============================================================================

/// 문서 인덱스 트레이트
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// 인덱스 존재 여부
    async fn exists(&self, index: &str) -> Result<bool>;

    /// 문서 개수 (인덱스가 없으면 0)
    async fn count(&self, index: &str) -> Result<usize>;

    /// 벡터 유사도 검색
    ///
    /// `min_score` 이상인 문서만 스코어 내림차순으로 최대 `max_results`개 반환합니다.
    async fn search(
        &self,
        index: &str,
        query: &[f32],
        max_results: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredDocument>>;

    /// 문서 삽입 (인덱스가 없으면 스키마와 함께 생성)
    async fn insert(&self, index: &str, document: IndexedDocument) -> Result<()>;

    /// 인덱스 삭제
    async fn delete(&self, index: &str) -> Result<()>;

    /// 빈 인덱스 생성
    async fn create(&self, index: &str) -> Result<()>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 스코어 필터 + 내림차순 정렬 + 개수 제한
pub(crate) fn rank(mut docs: Vec<ScoredDocument>, max_results: usize, min_score: f32) -> Vec<ScoredDocument> {
    docs.retain(|d| d.score >= min_score);
    docs.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    docs.truncate(max_results);
    docs
}

// ============================================================================
// Tests
// ============================================================================
