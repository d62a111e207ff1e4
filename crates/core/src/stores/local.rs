use crate::models::{ChunkMetadata, StoredChunk};
use crate::store::{cosine_distance, IndexHit};
use crate::traits::{check_batch_lengths, VectorIndex};
use crate::IndexError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

const COLLECTION_FILE: &str = "documents.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    id: String,
    text: String,
    metadata: ChunkMetadata,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Collection {
    entries: Vec<StoredEntry>,
}

impl Collection {
    fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|entry| entry.vector.len())
    }

    fn remove_matching(&mut self, field: &str, value: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !field_matches(&entry.metadata, field, value));
        before - self.entries.len()
    }

    /// Checks the whole batch first, so an error leaves the collection as it was.
    fn apply_batch(
        &mut self,
        ids: &[String],
        vectors: &[Vec<f32>],
        texts: &[String],
        metadatas: &[ChunkMetadata],
    ) -> Result<(), IndexError> {
        check_batch_lengths(ids, vectors, texts, metadatas)?;
        let Some(first) = vectors.first() else {
            return Ok(());
        };

        let dimension = self.dimension().unwrap_or(first.len());
        if let Some(vector) = vectors.iter().find(|vector| vector.len() != dimension) {
            return Err(IndexError::Request(format!(
                "embedding dimension {} != {}",
                vector.len(),
                dimension
            )));
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(IndexError::Request(format!(
                "chunk id {duplicate} appears twice in one batch"
            )));
        }

        let positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.id.clone(), position))
            .collect::<HashMap<_, _>>();

        for ((id, text), metadata) in ids.iter().zip(texts).zip(metadatas) {
            if let Some(position) = positions.get(id) {
                let existing = &self.entries[*position];
                if &existing.text != text || &existing.metadata != metadata {
                    return Err(IndexError::DuplicateId(id.clone()));
                }
            }
        }

        for (((id, vector), text), metadata) in ids.iter().zip(vectors).zip(texts).zip(metadatas) {
            let entry = StoredEntry {
                id: id.clone(),
                text: text.clone(),
                metadata: metadata.clone(),
                vector: vector.clone(),
            };
            match positions.get(id) {
                Some(position) => self.entries[*position] = entry,
                None => self.entries.push(entry),
            }
        }
        Ok(())
    }
}

/// Embedded vector index persisted as one JSON collection file.
///
/// Queries are brute-force cosine scans. Writes are staged on a copy, flushed
/// atomically and only then become visible.
pub struct LocalVectorStore {
    path: PathBuf,
    collection: RwLock<Collection>,
}

impl LocalVectorStore {
    pub async fn open(directory: &Path) -> Result<Self, IndexError> {
        tokio::fs::create_dir_all(directory).await?;
        let path = directory.join(COLLECTION_FILE);

        let collection = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Collection>(&bytes)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Collection::default(),
            Err(error) => return Err(error.into()),
        };

        info!(
            path = %path.display(),
            entries = collection.entries.len(),
            "opened local vector index"
        );

        Ok(Self {
            path,
            collection: RwLock::new(collection),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, collection: &Collection) -> Result<(), IndexError> {
        let bytes = serde_json::to_vec(collection)?;
        let temp = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        debug!(
            path = %self.path.display(),
            entries = collection.entries.len(),
            "persisted collection"
        );
        Ok(())
    }
}

fn field_matches(metadata: &ChunkMetadata, field: &str, value: &str) -> bool {
    metadata.field_value(field).as_deref() == Some(value)
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    async fn upsert(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        texts: &[String],
        metadatas: &[ChunkMetadata],
    ) -> Result<(), IndexError> {
        check_batch_lengths(ids, vectors, texts, metadatas)?;
        if ids.is_empty() {
            return Ok(());
        }

        let mut collection = self.collection.write().await;
        let mut staged = collection.clone();
        staged.apply_batch(ids, vectors, texts, metadatas)?;

        self.persist(&staged).await?;
        *collection = staged;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
        let collection = self.collection.read().await;

        if let Some(dimension) = collection.dimension() {
            if vector.len() != dimension {
                return Err(IndexError::Request(format!(
                    "query vector dim {} is not {}",
                    vector.len(),
                    dimension
                )));
            }
        }

        let mut hits = collection
            .entries
            .iter()
            .map(|entry| IndexHit {
                id: entry.id.clone(),
                text: entry.text.clone(),
                metadata: entry.metadata.clone(),
                distance: cosine_distance(vector, &entry.vector),
            })
            .collect::<Vec<_>>();

        hits.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        hits.truncate(k);
        Ok(hits)
    }

    async fn exists_by_fields(&self, fields: &[(&str, &str)]) -> Result<bool, IndexError> {
        let collection = self.collection.read().await;
        Ok(collection.entries.iter().any(|entry| {
            fields
                .iter()
                .all(|(field, value)| field_matches(&entry.metadata, field, value))
        }))
    }

    async fn delete_by_field(&self, field: &str, value: &str) -> Result<usize, IndexError> {
        let mut collection = self.collection.write().await;
        let mut staged = collection.clone();
        let removed = staged.remove_matching(field, value);

        if removed > 0 {
            self.persist(&staged).await?;
            *collection = staged;
        }
        Ok(removed)
    }

    async fn replace_by_field(
        &self,
        field: &str,
        value: &str,
        ids: &[String],
        vectors: &[Vec<f32>],
        texts: &[String],
        metadatas: &[ChunkMetadata],
    ) -> Result<usize, IndexError> {
        let mut collection = self.collection.write().await;
        let mut staged = collection.clone();
        let removed = staged.remove_matching(field, value);
        staged.apply_batch(ids, vectors, texts, metadatas)?;

        self.persist(&staged).await?;
        *collection = staged;
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.collection.read().await.entries.len())
    }

    async fn clear_all(&self) -> Result<(), IndexError> {
        let mut collection = self.collection.write().await;
        let cleared = Collection::default();
        self.persist(&cleared).await?;
        *collection = cleared;
        info!(path = %self.path.display(), "cleared local vector index");
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<StoredChunk>, IndexError> {
        let collection = self.collection.read().await;
        Ok(collection
            .entries
            .iter()
            .map(|entry| StoredChunk {
                id: entry.id.clone(),
                text: entry.text.clone(),
                metadata: entry.metadata.clone(),
            })
            .collect())
    }
}
