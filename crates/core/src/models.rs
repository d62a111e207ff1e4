use chrono::{DateTime, Utc};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};

pub const QUERY_TOO_SHORT_MESSAGE: &str = "Query too short. Please provide at least 3 words.";
pub const NO_RESULTS_MESSAGE: &str = "No relevant section found.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub filename: String,
    pub file_hash: String,
    pub source_path: String,
    pub ingested_at: DateTime<Utc>,
}

/// Metadata stored next to every chunk vector.
///
/// `chunk_index` is 1-based within the owning document and serializes as
/// `chunk_id` to keep the persisted shape stable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub filename: String,
    #[serde(rename = "chunk_id")]
    pub chunk_index: u64,
    pub file_hash: String,
    pub word_count: usize,
}

impl ChunkMetadata {
    pub fn field_value(&self, field: &str) -> Option<String> {
        match field {
            "filename" => Some(self.filename.clone()),
            "chunk_id" => Some(self.chunk_index.to_string()),
            "file_hash" => Some(self.file_hash.clone()),
            "word_count" => Some(self.word_count.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl DocumentChunk {
    /// Index key for the chunk: `<filename>_<position>` with a 0-based position.
    pub fn point_id(&self) -> String {
        chunk_point_id(
            &self.metadata.filename,
            self.metadata.chunk_index.saturating_sub(1),
        )
    }
}

pub fn chunk_point_id(filename: &str, position: u64) -> String {
    format!("{filename}_{position}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub text: String,
    pub similarity_percentage: f64,
    pub metadata: ChunkMetadata,
    pub chunk_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AdvisoryKind {
    QueryTooShort,
    NoResultsFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisory {
    pub kind: AdvisoryKind,
    pub message: String,
}

impl Advisory {
    pub fn query_too_short() -> Self {
        Self {
            kind: AdvisoryKind::QueryTooShort,
            message: QUERY_TOO_SHORT_MESSAGE.to_string(),
        }
    }

    pub fn no_results() -> Self {
        Self {
            kind: AdvisoryKind::NoResultsFound,
            message: NO_RESULTS_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Results(Vec<SearchHit>),
    Advisory(Advisory),
}

impl SearchOutcome {
    pub fn hits(&self) -> &[SearchHit] {
        match self {
            SearchOutcome::Results(hits) => hits,
            SearchOutcome::Advisory(_) => &[],
        }
    }

    pub fn advisory(&self) -> Option<&Advisory> {
        match self {
            SearchOutcome::Results(_) => None,
            SearchOutcome::Advisory(advisory) => Some(advisory),
        }
    }
}

#[derive(Serialize)]
struct AdvisoryEntry<'a> {
    error: &'a str,
}

// Advisories render as a one-element list so callers handle a single shape.
impl Serialize for SearchOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SearchOutcome::Results(hits) => hits.serialize(serializer),
            SearchOutcome::Advisory(advisory) => {
                let mut seq = serializer.serialize_seq(Some(1))?;
                seq.serialize_element(&AdvisoryEntry {
                    error: &advisory.message,
                })?;
                seq.end()
            }
        }
    }
}
