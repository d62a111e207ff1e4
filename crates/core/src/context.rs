use crate::config::{EmbedderKind, IndexBackend, Settings};
use crate::embeddings::{CharacterNgramEmbedder, Embedder};
use crate::error::StartupError;
use crate::ingest::{Ingestor, UploadCache};
use crate::minilm::MiniLmEmbedder;
use crate::models::StoredChunk;
use crate::retrieval::RetrievalEngine;
use crate::stores::{LocalVectorStore, QdrantStore};
use crate::traits::VectorIndex;
use crate::IndexError;
use tracing::info;

pub struct AppContext {
    pub settings: Settings,
    embedder: Box<dyn Embedder>,
    index: Box<dyn VectorIndex>,
    uploads: UploadCache,
}

impl AppContext {
    pub fn new(
        settings: Settings,
        embedder: Box<dyn Embedder>,
        index: Box<dyn VectorIndex>,
    ) -> Result<Self, StartupError> {
        let uploads = UploadCache::open(settings.upload_dir())?;
        Ok(Self {
            settings,
            embedder,
            index,
            uploads,
        })
    }

    pub async fn from_settings(settings: Settings) -> Result<Self, StartupError> {
        let embedder: Box<dyn Embedder> = match settings.embedder {
            EmbedderKind::Minilm => {
                let acquisition = MiniLmEmbedder::acquire(
                    settings.model_dir.as_deref(),
                    &settings.cache_dir(),
                );
                info!(source = acquisition.source(), "embedding model acquisition finished");
                Box::new(acquisition.into_result()?)
            }
            EmbedderKind::Ngram => Box::new(CharacterNgramEmbedder::default()),
        };

        let index: Box<dyn VectorIndex> = match settings.index_backend {
            IndexBackend::Local => Box::new(LocalVectorStore::open(&settings.index_dir()).await?),
            IndexBackend::Qdrant => {
                let store = QdrantStore::new(
                    &settings.qdrant.url,
                    settings.qdrant.collection.clone(),
                    embedder.dimensions(),
                )?;
                store.ensure_collection().await?;
                Box::new(store)
            }
        };

        Self::new(settings, embedder, index)
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub fn uploads(&self) -> &UploadCache {
        &self.uploads
    }

    pub fn retrieval(&self) -> RetrievalEngine<'_, dyn Embedder, dyn VectorIndex> {
        RetrievalEngine::new(
            self.embedder.as_ref(),
            self.index.as_ref(),
            self.settings.retrieval,
        )
    }

    pub fn ingestor(&self) -> Ingestor<'_, dyn Embedder, dyn VectorIndex> {
        Ingestor::new(
            self.embedder.as_ref(),
            self.index.as_ref(),
            &self.uploads,
            self.settings.document_identity,
        )
    }

    pub async fn total_chunks(&self) -> Result<usize, IndexError> {
        self.index.count().await
    }

    pub async fn list_chunks(&self) -> Result<Vec<StoredChunk>, IndexError> {
        self.index.list_all().await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClearState {
    #[default]
    Unconfirmed,
    PendingConfirm,
    Executed,
}

/// Confirm-then-execute guard in front of [`VectorIndex::clear_all`].
#[derive(Debug, Default)]
pub struct ClearRequest {
    state: ClearState,
}

impl ClearRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ClearState {
        self.state
    }

    /// First call arms the request, the second one wipes the index.
    /// A failed clear leaves the request pending.
    pub async fn advance(&mut self, index: &dyn VectorIndex) -> Result<ClearState, IndexError> {
        self.state = match self.state {
            ClearState::Unconfirmed | ClearState::Executed => ClearState::PendingConfirm,
            ClearState::PendingConfirm => {
                index.clear_all().await?;
                info!("vector index cleared");
                ClearState::Executed
            }
        };
        Ok(self.state)
    }

    pub fn cancel(&mut self) {
        self.state = ClearState::Unconfirmed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use tempfile::tempdir;

    async fn context(root: &std::path::Path) -> AppContext {
        let settings = Settings {
            data_root: root.to_path_buf(),
            embedder: EmbedderKind::Ngram,
            ..Settings::default()
        };
        AppContext::from_settings(settings)
            .await
            .expect("context builds")
    }

    async fn seed(index: &dyn VectorIndex) {
        index
            .upsert(
                &["a.txt_0".to_string()],
                &[vec![1.0, 0.0]],
                &["alpha".to_string()],
                &[ChunkMetadata {
                    filename: "a.txt".to_string(),
                    chunk_index: 1,
                    file_hash: "h".to_string(),
                    word_count: 1,
                }],
            )
            .await
            .expect("seed");
    }

    #[tokio::test]
    async fn local_context_creates_data_directories() {
        let dir = tempdir().expect("tempdir");
        let context = context(dir.path()).await;

        assert!(dir.path().join("uploaded_docs").is_dir());
        assert!(dir.path().join("vectors").is_dir());
        assert_eq!(context.embedder().dimensions(), 128);
        assert_eq!(context.total_chunks().await.expect("count"), 0);
        assert!(context.list_chunks().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn clear_needs_a_second_step() {
        let dir = tempdir().expect("tempdir");
        let context = context(dir.path()).await;
        seed(context.index()).await;

        let mut request = ClearRequest::new();
        assert_eq!(request.state(), ClearState::Unconfirmed);

        let state = request.advance(context.index()).await.expect("arm");
        assert_eq!(state, ClearState::PendingConfirm);
        assert_eq!(context.total_chunks().await.expect("count"), 1);

        let state = request.advance(context.index()).await.expect("execute");
        assert_eq!(state, ClearState::Executed);
        assert_eq!(context.total_chunks().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn cancelled_request_starts_over() {
        let dir = tempdir().expect("tempdir");
        let context = context(dir.path()).await;
        seed(context.index()).await;

        let mut request = ClearRequest::new();
        request.advance(context.index()).await.expect("arm");
        request.cancel();
        assert_eq!(request.state(), ClearState::Unconfirmed);

        request.advance(context.index()).await.expect("arm again");
        assert_eq!(context.total_chunks().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn executed_request_rearms_before_clearing_again() {
        let dir = tempdir().expect("tempdir");
        let context = context(dir.path()).await;

        let mut request = ClearRequest::new();
        request.advance(context.index()).await.expect("arm");
        request.advance(context.index()).await.expect("execute");
        seed(context.index()).await;

        let state = request.advance(context.index()).await.expect("re-arm");
        assert_eq!(state, ClearState::PendingConfirm);
        assert_eq!(context.total_chunks().await.expect("count"), 1);
    }
}
