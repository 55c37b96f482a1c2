//! RAG 에러 타입
//!
//! 스트리밍 시작 전에 발생하는 실패만 이 타입으로 반환됩니다.
//! 스트리밍 중 실패는 `AnswerEvent::Error` 로 전달됩니다.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// 메시지 목록이 비었거나 마지막 메시지가 user가 아님
    #[error("{0}")]
    InvalidInput(String),

    /// 임베딩 생성 실패 또는 빈 벡터
    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    /// 인덱스가 없거나 문서가 0개
    #[error("No documents have been indexed yet")]
    NoIndex,

    /// 인덱스 존재 여부조차 확인 불가
    #[error("Document index unavailable: {0}")]
    IndexUnavailable(String),

    /// 정리 후 빈 업로드 내용
    #[error("Content is empty after cleaning")]
    EmptyContent,

    /// 인덱스 재생성 후에도 삽입 실패
    #[error("Indexing failed even after recreation: {0}")]
    IndexingFailed(String),
}

impl RagError {
    /// 대응하는 HTTP 상태 코드
    pub fn status_code(&self) -> u16 {
        match self {
            RagError::InvalidInput(_) | RagError::EmptyContent => 400,
            RagError::NoIndex => 404,
            RagError::EmbeddingFailure(_)
            | RagError::IndexUnavailable(_)
            | RagError::IndexingFailed(_) => 500,
        }
    }
}
