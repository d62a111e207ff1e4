use crate::models::{ChunkMetadata, StoredChunk};
use crate::store::IndexHit;
use crate::traits::{check_batch_lengths, VectorIndex};
use crate::IndexError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

const SCROLL_PAGE: usize = 256;

pub struct QdrantStore {
    endpoint: Url,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, IndexError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        })
    }

    fn url(&self, suffix: &str) -> Result<Url, IndexError> {
        Ok(self
            .endpoint
            .join(&format!("collections/{}{}", self.collection, suffix))?)
    }

    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self.client.get(self.url("")?).send().await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.url("")?)
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;
        expect_success(response).await?;
        info!(collection = %self.collection, size = self.vector_size, "created qdrant collection");
        Ok(())
    }

    async fn count_matching(&self, filter: Option<Value>) -> Result<usize, IndexError> {
        let mut body = json!({ "exact": true });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }

        let response = self
            .client
            .post(self.url("/points/count")?)
            .json(&body)
            .send()
            .await?;
        let parsed = expect_success(response).await?;

        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| malformed("count response has no result.count"))
    }

    async fn fetch_points(&self, ids: &[String]) -> Result<Vec<StoredChunk>, IndexError> {
        let uuids = ids
            .iter()
            .map(|id| point_uuid(id).to_string())
            .collect::<Vec<_>>();

        let response = self
            .client
            .post(self.url("/points")?)
            .json(&json!({
                "ids": uuids,
                "with_payload": true,
                "with_vector": false,
            }))
            .send()
            .await?;
        let parsed = expect_success(response).await?;

        parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .map(|points| points.iter().map(parse_point).collect::<Result<Vec<_>, _>>())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn build_points(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        texts: &[String],
        metadatas: &[ChunkMetadata],
    ) -> Result<Vec<Value>, IndexError> {
        check_batch_lengths(ids, vectors, texts, metadatas)?;

        ids.iter()
            .zip(vectors)
            .zip(texts)
            .zip(metadatas)
            .map(|(((id, vector), text), metadata)| {
                if vector.len() != self.vector_size {
                    return Err(IndexError::Request(format!(
                        "embedding dimension {} != {}",
                        vector.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": point_uuid(id).to_string(),
                    "vector": vector,
                    "payload": {
                        "chunk_id": id,
                        "text": text,
                        "metadata": metadata,
                    },
                }))
            })
            .collect()
    }

    async fn put_points(&self, points: Vec<Value>) -> Result<(), IndexError> {
        let count = points.len();
        let response = self
            .client
            .put(self.url("/points?wait=true")?)
            .json(&json!({ "points": points }))
            .send()
            .await?;
        expect_success(response).await?;
        debug!(points = count, collection = %self.collection, "upserted qdrant points");
        Ok(())
    }
}

/// Qdrant accepts only unsigned integers or UUIDs as point ids.
fn point_uuid(chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes())
}

fn fields_filter(fields: &[(&str, &str)]) -> Value {
    let must = fields
        .iter()
        .map(|(field, value)| {
            json!({ "key": format!("metadata.{field}"), "match": { "value": value } })
        })
        .collect::<Vec<_>>();
    json!({ "must": must })
}

/// Matches `field == value` except the points in `keep`.
fn stale_filter(field: &str, value: &str, keep: &[String]) -> Value {
    let mut filter = fields_filter(&[(field, value)]);
    let keep = keep
        .iter()
        .map(|id| point_uuid(id).to_string())
        .collect::<Vec<_>>();
    filter["must_not"] = json!([{ "has_id": keep }]);
    filter
}

/// First batch id already stored with other text or metadata. Stored points
/// whose `replaced` field matches are about to go and never conflict.
fn first_conflict<'a>(
    existing: &[StoredChunk],
    ids: &'a [String],
    texts: &[String],
    metadatas: &[ChunkMetadata],
    replaced: Option<(&str, &str)>,
) -> Option<&'a String> {
    ids.iter().zip(texts).zip(metadatas).find_map(|((id, text), metadata)| {
        existing
            .iter()
            .filter(|stored| match replaced {
                Some((field, value)) => {
                    stored.metadata.field_value(field).as_deref() != Some(value)
                }
                None => true,
            })
            .find(|stored| &stored.id == id)
            .filter(|stored| &stored.text != text || &stored.metadata != metadata)
            .map(|_| id)
    })
}

fn backend_error(status: StatusCode) -> IndexError {
    IndexError::BackendResponse {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

fn malformed(details: &str) -> IndexError {
    IndexError::BackendResponse {
        backend: "qdrant".to_string(),
        details: details.to_string(),
    }
}

async fn expect_success(response: Response) -> Result<Value, IndexError> {
    if !response.status().is_success() {
        return Err(backend_error(response.status()));
    }
    Ok(response.json().await?)
}

fn parse_point(point: &Value) -> Result<StoredChunk, IndexError> {
    let id = point
        .pointer("/payload/chunk_id")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("point payload has no chunk_id"))?
        .to_string();
    let text = point
        .pointer("/payload/text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let metadata = point
        .pointer("/payload/metadata")
        .cloned()
        .ok_or_else(|| malformed("point payload has no metadata"))?;
    let metadata: ChunkMetadata = serde_json::from_value(metadata)?;

    Ok(StoredChunk { id, text, metadata })
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn upsert(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        texts: &[String],
        metadatas: &[ChunkMetadata],
    ) -> Result<(), IndexError> {
        let points = self.build_points(ids, vectors, texts, metadatas)?;
        if points.is_empty() {
            return Ok(());
        }

        let existing = self.fetch_points(ids).await?;
        if let Some(id) = first_conflict(&existing, ids, texts, metadatas, None) {
            return Err(IndexError::DuplicateId(id.clone()));
        }

        self.put_points(points).await
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
        if vector.len() != self.vector_size {
            return Err(IndexError::Request(format!(
                "query vector dim {} is not {}",
                vector.len(),
                self.vector_size
            )));
        }

        let response = self
            .client
            .post(self.url("/points/search")?)
            .json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;
        let parsed = expect_success(response).await?;

        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        hits.iter()
            .map(|hit| {
                let stored = parse_point(hit)?;
                let similarity = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
                Ok(IndexHit {
                    id: stored.id,
                    text: stored.text,
                    metadata: stored.metadata,
                    distance: 1.0 - similarity,
                })
            })
            .collect()
    }

    async fn exists_by_fields(&self, fields: &[(&str, &str)]) -> Result<bool, IndexError> {
        Ok(self.count_matching(Some(fields_filter(fields))).await? > 0)
    }

    async fn delete_by_field(&self, field: &str, value: &str) -> Result<usize, IndexError> {
        let filter = fields_filter(&[(field, value)]);
        let matching = self.count_matching(Some(filter.clone())).await?;
        if matching == 0 {
            return Ok(0);
        }

        let response = self
            .client
            .post(self.url("/points/delete?wait=true")?)
            .json(&json!({ "filter": filter }))
            .send()
            .await?;
        expect_success(response).await?;
        Ok(matching)
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
        let points = self.build_points(ids, vectors, texts, metadatas)?;

        let existing = self.fetch_points(ids).await?;
        if let Some(id) = first_conflict(&existing, ids, texts, metadatas, Some((field, value))) {
            return Err(IndexError::DuplicateId(id.clone()));
        }

        // New points land first, so a failure here keeps the old set intact.
        let overwritten = existing
            .iter()
            .filter(|stored| stored.metadata.field_value(field).as_deref() == Some(value))
            .count();
        if !points.is_empty() {
            self.put_points(points).await?;
        }

        let filter = stale_filter(field, value, ids);
        let stale = self.count_matching(Some(filter.clone())).await?;
        if stale > 0 {
            let response = self
                .client
                .post(self.url("/points/delete?wait=true")?)
                .json(&json!({ "filter": filter }))
                .send()
                .await?;
            expect_success(response).await?;
        }
        Ok(stale + overwritten)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        self.count_matching(None).await
    }

    async fn clear_all(&self) -> Result<(), IndexError> {
        let response = self.client.delete(self.url("")?).send().await?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }
        self.ensure_collection().await
    }

    async fn list_all(&self) -> Result<Vec<StoredChunk>, IndexError> {
        let mut chunks = Vec::new();
        let mut offset = Value::Null;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": true,
                "with_vector": false,
            });
            if !offset.is_null() {
                body["offset"] = offset.clone();
            }

            let response = self
                .client
                .post(self.url("/points/scroll")?)
                .json(&body)
                .send()
                .await?;
            let parsed = expect_success(response).await?;

            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for point in &points {
                chunks.push(parse_point(point)?);
            }

            offset = parsed
                .pointer("/result/next_page_offset")
                .cloned()
                .unwrap_or(Value::Null);
            if offset.is_null() || points.is_empty() {
                break;
            }
        }

        Ok(chunks)
    }
}
