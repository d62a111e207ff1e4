use crate::error::IngestError;
use crate::models::{ChunkMetadata, DocumentChunk, DocumentFingerprint};

pub const CHUNK_WORDS: usize = 300;
pub const CHUNK_OVERLAP_WORDS: usize = 50;
pub const MIN_CHUNK_WORDS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub window_words: usize,
    pub overlap_words: usize,
    pub min_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_words: CHUNK_WORDS,
            overlap_words: CHUNK_OVERLAP_WORDS,
            min_words: MIN_CHUNK_WORDS,
        }
    }
}

impl ChunkingConfig {
    fn stride(&self) -> Result<usize, IngestError> {
        if self.window_words == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "window must contain at least one word".to_string(),
            ));
        }
        if self.overlap_words >= self.window_words {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than window {}",
                self.overlap_words, self.window_words
            )));
        }
        Ok(self.window_words - self.overlap_words)
    }
}

pub fn clean_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Slides a `window_words` window over the word sequence in steps of
/// `window_words - overlap_words`, keeping windows of at least `min_words`.
pub fn chunk_words(normalized: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    let stride = config.stride()?;
    let words = normalized.split_whitespace().collect::<Vec<_>>();

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + config.window_words).min(words.len());
        let window = &words[start..end];
        if window.len() >= config.min_words {
            chunks.push(window.join(" "));
        }
        start += stride;
    }

    Ok(chunks)
}

pub fn build_chunks(
    document: &DocumentFingerprint,
    normalized: &str,
    config: ChunkingConfig,
) -> Result<Vec<DocumentChunk>, IngestError> {
    let windows = chunk_words(normalized, config)?;

    if windows.is_empty() {
        return Err(IngestError::DocumentTooShort {
            filename: document.filename.clone(),
            words: normalized.split_whitespace().count(),
        });
    }

    let chunks = windows
        .into_iter()
        .enumerate()
        .map(|(position, text)| {
            let word_count = text.split_whitespace().count();
            DocumentChunk {
                metadata: ChunkMetadata {
                    filename: document.filename.clone(),
                    chunk_index: position as u64 + 1,
                    file_hash: document.file_hash.clone(),
                    word_count,
                },
                text,
            }
        })
        .collect();

    Ok(chunks)
}
