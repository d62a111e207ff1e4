use crate::embeddings::Embedder;
use crate::models::{Advisory, SearchHit, SearchOutcome};
use crate::traits::VectorIndex;
use crate::SearchError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalOptions {
    pub similarity_threshold: f64,
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub min_query_words: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 10.0,
            default_top_k: 10,
            max_top_k: 20,
            min_query_words: 3,
        }
    }
}

impl RetrievalOptions {
    pub fn clamp_top_k(&self, top_k: usize) -> usize {
        top_k.clamp(1, self.max_top_k.max(1))
    }
}

/// `max(0, (1 - distance) * 100)` rounded to two decimals.
pub fn similarity_percentage(distance: f64) -> f64 {
    let percentage = ((1.0 - distance) * 100.0).max(0.0);
    (percentage * 100.0).round() / 100.0
}

pub fn validate_query(query: &str, min_words: usize) -> Result<(), Advisory> {
    if query.split_whitespace().count() < min_words {
        return Err(Advisory::query_too_short());
    }
    Ok(())
}

pub struct RetrievalEngine<'a, E: ?Sized, V: ?Sized> {
    embedder: &'a E,
    index: &'a V,
    options: RetrievalOptions,
}

impl<'a, E, V> RetrievalEngine<'a, E, V>
where
    E: Embedder + ?Sized,
    V: VectorIndex + ?Sized,
{
    pub fn new(embedder: &'a E, index: &'a V, options: RetrievalOptions) -> Self {
        Self {
            embedder,
            index,
            options,
        }
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    pub async fn search_default(&self, query: &str) -> Result<SearchOutcome, SearchError> {
        self.search(query, self.options.default_top_k).await
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<SearchOutcome, SearchError> {
        if let Err(advisory) = validate_query(query, self.options.min_query_words) {
            debug!(query, "query rejected as too short");
            return Ok(SearchOutcome::Advisory(advisory));
        }

        let top_k = self.options.clamp_top_k(top_k);
        let query_vector = self.embedder.embed_one(query.trim())?;
        let neighbours = self.index.query(&query_vector, top_k).await?;
        let returned = neighbours.len();

        let mut hits = neighbours
            .into_iter()
            .map(|hit| SearchHit {
                similarity_percentage: similarity_percentage(hit.distance),
                text: hit.text,
                metadata: hit.metadata,
                chunk_id: hit.id,
            })
            .filter(|hit| hit.similarity_percentage >= self.options.similarity_threshold)
            .collect::<Vec<_>>();

        // Stable, so equal scores keep the index's order.
        hits.sort_by(|left, right| {
            right
                .similarity_percentage
                .total_cmp(&left.similarity_percentage)
        });

        info!(top_k, returned, kept = hits.len(), "search finished");

        if hits.is_empty() {
            return Ok(SearchOutcome::Advisory(Advisory::no_results()));
        }
        Ok(SearchOutcome::Results(hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdvisoryKind, ChunkMetadata, StoredChunk};
    use crate::store::IndexHit;
    use crate::{EmbeddingError, IndexError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeEmbedder {
        calls: Mutex<Vec<String>>,
    }

    impl Embedder for FakeEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.extend(texts.iter().cloned());
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct FakeVectorIndex {
        distances: Vec<(&'static str, f64)>,
        requested_k: Mutex<Option<usize>>,
    }

    impl FakeVectorIndex {
        fn with(distances: Vec<(&'static str, f64)>) -> Self {
            Self {
                distances,
                requested_k: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl VectorIndex for FakeVectorIndex {
        async fn upsert(
            &self,
            _ids: &[String],
            _vectors: &[Vec<f32>],
            _texts: &[String],
            _metadatas: &[ChunkMetadata],
        ) -> Result<(), IndexError> {
            Ok(())
        }

        async fn query(&self, _vector: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
            if let Ok(mut requested) = self.requested_k.lock() {
                *requested = Some(k);
            }
            Ok(self
                .distances
                .iter()
                .take(k)
                .enumerate()
                .map(|(position, (id, distance))| IndexHit {
                    id: id.to_string(),
                    text: format!("text of {id}"),
                    metadata: ChunkMetadata {
                        filename: "doc.txt".to_string(),
                        chunk_index: position as u64 + 1,
                        file_hash: "hash".to_string(),
                        word_count: 30,
                    },
                    distance: *distance,
                })
                .collect())
        }

        async fn exists_by_fields(&self, _fields: &[(&str, &str)]) -> Result<bool, IndexError> {
            Ok(false)
        }

        async fn delete_by_field(&self, _field: &str, _value: &str) -> Result<usize, IndexError> {
            Ok(0)
        }

        async fn replace_by_field(
            &self,
            _field: &str,
            _value: &str,
            _ids: &[String],
            _vectors: &[Vec<f32>],
            _texts: &[String],
            _metadatas: &[ChunkMetadata],
        ) -> Result<usize, IndexError> {
            Ok(0)
        }

        async fn count(&self) -> Result<usize, IndexError> {
            Ok(self.distances.len())
        }

        async fn clear_all(&self) -> Result<(), IndexError> {
            Ok(())
        }

        async fn list_all(&self) -> Result<Vec<StoredChunk>, IndexError> {
            Ok(Vec::new())
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl VectorIndex for BrokenIndex {
        async fn upsert(
            &self,
            _ids: &[String],
            _vectors: &[Vec<f32>],
            _texts: &[String],
            _metadatas: &[ChunkMetadata],
        ) -> Result<(), IndexError> {
            Err(IndexError::Request("offline".to_string()))
        }

        async fn query(&self, _vector: &[f32], _k: usize) -> Result<Vec<IndexHit>, IndexError> {
            Err(IndexError::Request("offline".to_string()))
        }

        async fn exists_by_fields(&self, _fields: &[(&str, &str)]) -> Result<bool, IndexError> {
            Err(IndexError::Request("offline".to_string()))
        }

        async fn delete_by_field(&self, _field: &str, _value: &str) -> Result<usize, IndexError> {
            Err(IndexError::Request("offline".to_string()))
        }

        async fn replace_by_field(
            &self,
            _field: &str,
            _value: &str,
            _ids: &[String],
            _vectors: &[Vec<f32>],
            _texts: &[String],
            _metadatas: &[ChunkMetadata],
        ) -> Result<usize, IndexError> {
            Err(IndexError::Request("offline".to_string()))
        }

        async fn count(&self) -> Result<usize, IndexError> {
            Err(IndexError::Request("offline".to_string()))
        }

        async fn clear_all(&self) -> Result<(), IndexError> {
            Err(IndexError::Request("offline".to_string()))
        }

        async fn list_all(&self) -> Result<Vec<StoredChunk>, IndexError> {
            Err(IndexError::Request("offline".to_string()))
        }
    }

    #[test]
    fn distances_convert_to_clamped_percentages() {
        assert_eq!(similarity_percentage(0.0), 100.0);
        assert_eq!(similarity_percentage(1.0), 0.0);
        assert_eq!(similarity_percentage(1.5), 0.0);
        assert_eq!(similarity_percentage(0.123456), 87.65);
    }

    #[test]
    fn queries_need_three_words() {
        assert!(validate_query("hi", 3).is_err());
        assert!(validate_query("hi there", 3).is_err());
        assert!(validate_query("  hi   there  ", 3).is_err());
        assert!(validate_query("what is this", 3).is_ok());
    }

    #[test]
    fn top_k_is_clamped_to_range() {
        let options = RetrievalOptions::default();
        assert_eq!(options.clamp_top_k(0), 1);
        assert_eq!(options.clamp_top_k(5), 5);
        assert_eq!(options.clamp_top_k(50), 20);
    }

    #[tokio::test]
    async fn short_query_is_advisory_and_skips_embedding() {
        let embedder = FakeEmbedder::default();
        let index = FakeVectorIndex::with(vec![("a", 0.1)]);
        let engine = RetrievalEngine::new(&embedder, &index, RetrievalOptions::default());

        let outcome = engine.search("hi there", 10).await.expect("search succeeds");
        assert_eq!(
            outcome.advisory().map(|advisory| advisory.kind),
            Some(AdvisoryKind::QueryTooShort)
        );
        assert!(embedder.calls.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn results_are_filtered_and_ranked() {
        let embedder = FakeEmbedder::default();
        let index = FakeVectorIndex::with(vec![
            ("low", 0.6),
            ("boundary", 0.9),
            ("below", 0.9001),
            ("best", 0.05),
            ("tie", 0.6),
        ]);
        let engine = RetrievalEngine::new(&embedder, &index, RetrievalOptions::default());

        let outcome = engine
            .search("hydraulic pump pressure", 10)
            .await
            .expect("search succeeds");
        let ranked = outcome
            .hits()
            .iter()
            .map(|hit| (hit.chunk_id.as_str(), hit.similarity_percentage))
            .collect::<Vec<_>>();

        assert_eq!(
            ranked,
            vec![("best", 95.0), ("low", 40.0), ("tie", 40.0), ("boundary", 10.0)]
        );
    }

    #[tokio::test]
    async fn everything_filtered_becomes_no_results_advisory() {
        let embedder = FakeEmbedder::default();
        let index = FakeVectorIndex::with(vec![("far", 0.95), ("farther", 1.2)]);
        let engine = RetrievalEngine::new(&embedder, &index, RetrievalOptions::default());

        let outcome = engine.search("what is this", 10).await.expect("search succeeds");
        assert_eq!(outcome, SearchOutcome::Advisory(Advisory::no_results()));
    }

    #[tokio::test]
    async fn empty_index_becomes_no_results_advisory() {
        let embedder = FakeEmbedder::default();
        let index = FakeVectorIndex::with(Vec::new());
        let engine = RetrievalEngine::new(&embedder, &index, RetrievalOptions::default());

        let outcome = engine.search_default("what is this").await.expect("search succeeds");
        assert_eq!(
            outcome.advisory().map(|advisory| advisory.message.as_str()),
            Some("No relevant section found.")
        );
        assert_eq!(*index.requested_k.lock().expect("lock"), Some(10));
    }

    #[tokio::test]
    async fn requested_top_k_is_clamped_before_querying() {
        let embedder = FakeEmbedder::default();
        let index = FakeVectorIndex::with(vec![("a", 0.1)]);
        let engine = RetrievalEngine::new(&embedder, &index, RetrievalOptions::default());

        engine.search("what is this", 99).await.expect("search succeeds");
        assert_eq!(*index.requested_k.lock().expect("lock"), Some(20));
    }

    #[tokio::test]
    async fn index_failures_propagate() {
        let embedder = FakeEmbedder::default();
        let engine = RetrievalEngine::new(&embedder, &BrokenIndex, RetrievalOptions::default());

        let result = engine.search("what is this", 10).await;
        assert!(matches!(result, Err(SearchError::Index(_))));
    }
}
