use crate::models::{ChunkMetadata, StoredChunk};

#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: f64,
}

impl IndexHit {
    pub fn into_stored(self) -> StoredChunk {
        StoredChunk {
            id: self.id,
            text: self.text,
            metadata: self.metadata,
        }
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let (mut dot, mut left_norm, mut right_norm) = (0f64, 0f64, 0f64);
    for (a, b) in left.iter().zip(right) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

pub fn cosine_distance(left: &[f32], right: &[f32]) -> f64 {
    1.0 - cosine_similarity(left, right)
}
