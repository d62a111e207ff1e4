use crate::models::{ChunkMetadata, StoredChunk};
use crate::store::IndexHit;
use crate::IndexError;
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Adds entries given as parallel slices. Re-adding an id with identical
    /// text and metadata replaces it; an id with different content is rejected.
    async fn upsert(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        texts: &[String],
        metadatas: &[ChunkMetadata],
    ) -> Result<(), IndexError>;

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError>;

    async fn exists_by_field(&self, field: &str, value: &str) -> Result<bool, IndexError> {
        self.exists_by_fields(&[(field, value)]).await
    }

    async fn exists_by_fields(&self, fields: &[(&str, &str)]) -> Result<bool, IndexError>;

    async fn delete_by_field(&self, field: &str, value: &str) -> Result<usize, IndexError>;

    /// Swaps every entry whose `field` equals `value` for the given batch.
    /// On error the previous entries stay in place. Returns how many old
    /// entries are gone.
    async fn replace_by_field(
        &self,
        field: &str,
        value: &str,
        ids: &[String],
        vectors: &[Vec<f32>],
        texts: &[String],
        metadatas: &[ChunkMetadata],
    ) -> Result<usize, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;

    async fn clear_all(&self) -> Result<(), IndexError>;

    async fn list_all(&self) -> Result<Vec<StoredChunk>, IndexError>;
}

pub(crate) fn check_batch_lengths(
    ids: &[String],
    vectors: &[Vec<f32>],
    texts: &[String],
    metadatas: &[ChunkMetadata],
) -> Result<(), IndexError> {
    if vectors.len() != ids.len() || texts.len() != ids.len() || metadatas.len() != ids.len() {
        return Err(IndexError::Request(format!(
            "batch length mismatch: {} ids, {} vectors, {} texts, {} metadatas",
            ids.len(),
            vectors.len(),
            texts.len(),
            metadatas.len()
        )));
    }
    Ok(())
}
