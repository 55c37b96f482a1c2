//! 단계적 검색 (Cascading retrieval)
//!
//! 높은 최소 점수부터 차례로 검색하고, 결과가 1개 이상 나오는 첫 임계값에서 멈춥니다.
//! 모든 임계값에서 결과가 없으면 빈 컨텍스트로 진행합니다.

use crate::config::RetrievalConfig;
use crate::index::{DocumentIndex, ScoredDocument};

/// 검색 결과
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieval {
    /// 채택된 문서 (스코어 내림차순)
    pub documents: Vec<ScoredDocument>,
    /// 결과를 낸 임계값 (없으면 None)
    pub min_score: Option<f32>,
}

impl Retrieval {
    /// 프롬프트/저장용 문서 텍스트
    pub fn texts(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.text.clone()).collect()
    }
}

/// 임계값을 내려가며 검색
///
/// 특정 임계값에서 검색 자체가 실패하면 로그만 남기고 다음 임계값으로 넘어갑니다.
pub async fn cascading_search(
    index: &dyn DocumentIndex,
    index_name: &str,
    query: &[f32],
    policy: &RetrievalConfig,
) -> Retrieval {
    for &min_score in &policy.min_scores {
        match index
            .search(index_name, query, policy.max_results, min_score)
            .await
        {
            Ok(mut documents) if !documents.is_empty() => {
                documents.truncate(policy.max_results);
                tracing::info!(
                    "Found {} documents with min_score {}",
                    documents.len(),
                    min_score
                );
                return Retrieval {
                    documents,
                    min_score: Some(min_score),
                };
            }
            Ok(_) => {
                tracing::info!(
                    "No documents found with min_score {}, trying lower threshold",
                    min_score
                );
            }
            Err(e) => {
                tracing::error!("Search failed at min_score {}: {:#}", min_score, e);
            }
        }
    }

    tracing::info!("No relevant context found");
    Retrieval::default()
}
