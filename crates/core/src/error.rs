use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file format: {0} (only .pdf and .txt are accepted)")]
    UnsupportedFormat(String),

    #[error("scanned image detected in {0}; OCR is not supported")]
    ScannedDocumentUnsupported(String),

    #[error("no text could be extracted from {0}")]
    EmptyDocument(String),

    #[error("{filename} is too short to create meaningful chunks ({words} words)")]
    DocumentTooShort { filename: String, words: usize },

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("no .pdf or .txt files found in {0}")]
    NoDocuments(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector index failed: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("embedding inference failed: {0}")]
    Inference(String),

    #[error("embedding count {actual} doesn't match input count {expected}")]
    CountMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index request rejected: {0}")]
    Request(String),

    #[error("chunk id {0} already stored with different content")]
    DuplicateId(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector index failed: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
