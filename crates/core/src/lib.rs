pub mod chunking;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod minilm;
pub mod models;
pub mod retrieval;
pub mod store;
pub mod stores;
pub mod traits;
pub mod truncation;

pub use chunking::{build_chunks, chunk_words, clean_text, ChunkingConfig};
pub use config::{EmbedderKind, IndexBackend, QdrantSettings, Settings};
pub use context::{AppContext, ClearRequest, ClearState};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ConfigError, EmbeddingError, IndexError, IngestError, SearchError, StartupError};
pub use extractor::{extract_document, DocumentFormat, LopdfExtractor, PdfExtractor, PdfText};
pub use ingest::{
    digest_file, discover_documents, DocumentIdentity, DuplicateReason, IngestOutcome, Ingestor,
    IngestionReport, SkippedFile, UploadCache,
};
pub use minilm::{MiniLmEmbedder, ModelAcquisition, MINILM_DIMENSIONS};
pub use models::{
    Advisory, AdvisoryKind, ChunkMetadata, DocumentChunk, DocumentFingerprint, SearchHit,
    SearchOutcome, StoredChunk, NO_RESULTS_MESSAGE, QUERY_TOO_SHORT_MESSAGE,
};
pub use retrieval::{similarity_percentage, RetrievalEngine, RetrievalOptions};
pub use store::{cosine_distance, cosine_similarity, IndexHit};
pub use stores::{LocalVectorStore, QdrantStore};
pub use traits::VectorIndex;
pub use truncation::{TokenTruncator, MAX_EMBEDDING_TOKENS};
