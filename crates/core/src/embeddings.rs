use crate::error::EmbeddingError;
use crate::truncation::{TokenTruncator, MAX_EMBEDDING_TOKENS};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Maps text to fixed-length vectors.
///
/// Implementations truncate inputs to their token budget before embedding,
/// so long inputs never fail on length.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_many(&[text.to_string()])?
            .pop()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                actual: 0,
            })
    }
}

pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
    truncator: TokenTruncator,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            truncator: TokenTruncator::whitespace(MAX_EMBEDDING_TOKENS),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts
            .iter()
            .map(|text| {
                let truncated = self.truncator.truncate(text)?;
                Ok(self.embed_text(&truncated))
            })
            .collect()
    }
}
