//! LanceDB Document Index - 디스크 기반 벡터 인덱스
//!
//! 인덱스 하나가 LanceDB 테이블 하나에 대응합니다.
//! 스키마: text (Utf8), embedding (FixedSizeList<Float32, dim>)
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use super::{rank, DocumentIndex, IndexedDocument, ScoredDocument};

// ============================================================================
// LanceDocumentIndex
// ============================================================================

/// LanceDB 문서 인덱스
pub struct LanceDocumentIndex {
    db: Connection,
    dimension: usize,
}

impl LanceDocumentIndex {
    /// LanceDB 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원 (스키마 생성에 사용)
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db, dimension })
    }

    fn list_size(&self) -> Result<i32> {
        i32::try_from(self.dimension).context("Embedding dimension too large")
    }

    /// 인덱스 테이블 스키마
    fn schema(&self) -> Result<Schema> {
        Ok(Schema::new(vec![
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.list_size()?,
                ),
                false,
            ),
        ]))
    }

    /// 문서를 Arrow RecordBatch로 변환
    fn document_to_batch(&self, document: &IndexedDocument) -> Result<RecordBatch> {
        if document.embedding.len() != self.dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                document.embedding.len()
            );
        }

        let values = Float32Array::from(document.embedding.clone());
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings = FixedSizeListArray::try_new(
            field,
            self.list_size()?,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(self.schema()?),
            vec![
                Arc::new(StringArray::from(vec![document.text.as_str()])),
                Arc::new(embeddings),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    async fn open_table(&self, index: &str) -> Result<lancedb::table::Table> {
        self.db
            .open_table(index)
            .execute()
            .await
            .with_context(|| format!("Failed to open index {}", index))
    }
}

#[async_trait]
impl DocumentIndex for LanceDocumentIndex {
    async fn exists(&self, index: &str) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list LanceDB tables")?;
        Ok(names.iter().any(|n| n == index))
    }

    async fn count(&self, index: &str) -> Result<usize> {
        if !self.exists(index).await? {
            return Ok(0);
        }

        let table = self.open_table(index).await?;
        table.count_rows(None).await.context("Failed to count rows")
    }

    async fn search(
        &self,
        index: &str,
        query: &[f32],
        max_results: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredDocument>> {
        if self.count(index).await? == 0 {
            return Ok(vec![]);
        }

        let table = self.open_table(index).await?;

        let stream = table
            .vector_search(query.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(max_results)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;
        let mut results = Vec::new();

        for batch in batches {
            let texts = batch
                .column_by_name("text")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing text column"))?;

            // _distance 컬럼 (LanceDB가 자동 추가, 코사인 거리 = 1 - 유사도)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                results.push(ScoredDocument {
                    text: texts.value(i).to_string(),
                    score: 1.0 - distances.value(i),
                });
            }
        }

        Ok(rank(results, max_results, min_score))
    }

    async fn insert(&self, index: &str, document: IndexedDocument) -> Result<()> {
        let batch = self.document_to_batch(&document)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.exists(index).await? {
            let table = self.open_table(index).await?;
            table
                .add(batches)
                .execute()
                .await
                .context("Failed to add document to index")?;
        } else {
            tracing::info!("Creating index {} on first insert", index);
            self.db
                .create_table(index, batches)
                .execute()
                .await
                .context("Failed to create index table")?;
        }

        Ok(())
    }

    async fn delete(&self, index: &str) -> Result<()> {
        self.db
            .drop_table(index)
            .await
            .with_context(|| format!("Failed to drop index {}", index))
    }

    async fn create(&self, index: &str) -> Result<()> {
        self.db
            .create_empty_table(index, Arc::new(self.schema()?))
            .execute()
            .await
            .with_context(|| format!("Failed to create index {}", index))?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 4;

    fn doc(text: &str, embedding: [f32; DIM]) -> IndexedDocument {
        IndexedDocument {
            text: text.to_string(),
            embedding: embedding.to_vec(),
        }
    }

    async fn open_test_index() -> (TempDir, LanceDocumentIndex) {
        let dir = TempDir::new().unwrap();
        let index = LanceDocumentIndex::open(&dir.path().join("test.lance"), DIM)
            .await
            .unwrap();
        (dir, index)
    }

    #[tokio::test]
    async fn test_insert_creates_table() {
        let (_dir, index) = open_test_index().await;

        assert!(!index.exists("docs").await.unwrap());
        assert_eq!(index.count("docs").await.unwrap(), 0);

        index.insert("docs", doc("first", [1.0, 0.0, 0.0, 0.0])).await.unwrap();
        index.insert("docs", doc("second", [0.0, 1.0, 0.0, 0.0])).await.unwrap();

        assert!(index.exists("docs").await.unwrap());
        assert_eq!(index.count("docs").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_search_threshold_and_order() {
        let (_dir, index) = open_test_index().await;

        index.insert("docs", doc("exact", [1.0, 0.0, 0.0, 0.0])).await.unwrap();
        index.insert("docs", doc("near", [0.8, 0.6, 0.0, 0.0])).await.unwrap();
        index.insert("docs", doc("far", [0.0, 0.0, 1.0, 0.0])).await.unwrap();

        let results = index.search("docs", &[1.0, 0.0, 0.0, 0.0], 5, 0.5).await.unwrap();
        let texts: Vec<&str> = results.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["exact", "near"]);
        assert!((results[0].score - 1.0).abs() < 0.01);

        let capped = index.search("docs", &[1.0, 0.0, 0.0, 0.0], 1, 0.0).await.unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].text, "exact");
    }

    #[tokio::test]
    async fn test_delete_and_create_empty() {
        let (_dir, index) = open_test_index().await;

        index.insert("docs", doc("first", [1.0, 0.0, 0.0, 0.0])).await.unwrap();
        index.delete("docs").await.unwrap();
        assert!(!index.exists("docs").await.unwrap());

        index.create("docs").await.unwrap();
        assert!(index.exists("docs").await.unwrap());
        assert_eq!(index.count("docs").await.unwrap(), 0);
        assert!(index
            .search("docs", &[1.0, 0.0, 0.0, 0.0], 5, 0.0)
            .await
            .unwrap()
            .is_empty());

        index.insert("docs", doc("again", [1.0, 0.0, 0.0, 0.0])).await.unwrap();
        assert_eq!(index.count("docs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimension() {
        let (_dir, index) = open_test_index().await;
        let bad = IndexedDocument {
            text: "bad".to_string(),
            embedding: vec![1.0, 0.0],
        };
        assert!(index.insert("docs", bad).await.is_err());
    }
}
