use crate::chunking::{build_chunks, clean_text, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::extractor::{extract_document, DocumentFormat, LopdfExtractor};
use crate::models::DocumentFingerprint;
use crate::traits::VectorIndex;
use crate::{EmbeddingError, IngestError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentIdentity {
    Filename,
    /// Any stored chunk with the same content hash, whatever its name. New
    /// content under a known filename replaces the stored chunks.
    ContentHash,
    /// Same filename and hash is a duplicate; same filename with new content
    /// replaces the stored chunks.
    #[default]
    FilenameAndHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    SameFilename,
    SameContent,
    AlreadyIndexed,
}

impl fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DuplicateReason::SameFilename => "a document with this filename is already indexed",
            DuplicateReason::SameContent => "a document with identical content is already indexed",
            DuplicateReason::AlreadyIndexed => "this exact document is already indexed",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Indexed {
        fingerprint: DocumentFingerprint,
        chunk_count: usize,
    },
    Replaced {
        fingerprint: DocumentFingerprint,
        chunk_count: usize,
        removed: usize,
    },
    Skipped {
        filename: String,
        reason: DuplicateReason,
    },
}

impl IngestOutcome {
    pub fn chunk_count(&self) -> usize {
        match self {
            IngestOutcome::Indexed { chunk_count, .. }
            | IngestOutcome::Replaced { chunk_count, .. } => *chunk_count,
            IngestOutcome::Skipped { .. } => 0,
        }
    }
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub outcomes: Vec<IngestOutcome>,
    pub skipped_files: Vec<SkippedFile>,
}

impl IngestionReport {
    pub fn chunk_count(&self) -> usize {
        self.outcomes.iter().map(IngestOutcome::chunk_count).sum()
    }
}

#[derive(Debug, Clone)]
pub struct UploadCache {
    dir: PathBuf,
}

impl UploadCache {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, IngestError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store(&self, source: &Path) -> Result<PathBuf, IngestError> {
        let filename = file_name(source)?;
        let target = self.dir.join(filename);

        let same_file = match (fs::canonicalize(source), fs::canonicalize(&target)) {
            (Ok(left), Ok(right)) => left == right,
            _ => false,
        };
        if !same_file {
            fs::copy(source, &target)?;
        }
        Ok(target)
    }
}

fn file_name(path: &Path) -> Result<&str, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if DocumentFormat::from_path(entry.path()).is_ok() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub struct Ingestor<'a, E: ?Sized, V: ?Sized> {
    embedder: &'a E,
    index: &'a V,
    uploads: &'a UploadCache,
    identity: DocumentIdentity,
}

impl<'a, E, V> Ingestor<'a, E, V>
where
    E: Embedder + ?Sized,
    V: VectorIndex + ?Sized,
{
    pub fn new(
        embedder: &'a E,
        index: &'a V,
        uploads: &'a UploadCache,
        identity: DocumentIdentity,
    ) -> Self {
        Self {
            embedder,
            index,
            uploads,
            identity,
        }
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<IngestOutcome, IngestError> {
        let format = DocumentFormat::from_path(path)?;
        let filename = file_name(path)?.to_string();
        let cached = self.uploads.store(path)?;
        let file_hash = digest_file(&cached)?;

        let replace = match self.duplicate_check(&filename, &file_hash).await? {
            DuplicateCheck::Duplicate(reason) => {
                warn!(%filename, %reason, "skipping duplicate document");
                return Ok(IngestOutcome::Skipped { filename, reason });
            }
            DuplicateCheck::Replace => true,
            DuplicateCheck::New => false,
        };

        let fingerprint = DocumentFingerprint {
            filename: filename.clone(),
            file_hash,
            source_path: path.to_string_lossy().to_string(),
            ingested_at: Utc::now(),
        };

        let text = extract_document(&cached, format, &LopdfExtractor)?;
        let chunks = build_chunks(&fingerprint, &clean_text(&text), ChunkingConfig::default())?;

        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
        let embeddings = self.embedder.embed_many(&texts)?;
        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: embeddings.len(),
            }
            .into());
        }

        let ids = chunks.iter().map(|chunk| chunk.point_id()).collect::<Vec<_>>();
        let metadatas = chunks
            .into_iter()
            .map(|chunk| chunk.metadata)
            .collect::<Vec<_>>();

        let removed = if replace {
            let removed = self
                .index
                .replace_by_field("filename", &filename, &ids, &embeddings, &texts, &metadatas)
                .await?;
            warn!(%filename, removed, "replaced chunks of changed document");
            removed
        } else {
            self.index
                .upsert(&ids, &embeddings, &texts, &metadatas)
                .await?;
            0
        };

        let chunk_count = ids.len();
        info!(%filename, chunk_count, "document indexed");

        Ok(if replace {
            IngestOutcome::Replaced {
                fingerprint,
                chunk_count,
                removed,
            }
        } else {
            IngestOutcome::Indexed {
                fingerprint,
                chunk_count,
            }
        })
    }

    async fn duplicate_check(
        &self,
        filename: &str,
        file_hash: &str,
    ) -> Result<DuplicateCheck, IngestError> {
        let check = match self.identity {
            DocumentIdentity::Filename => {
                if self.index.exists_by_field("filename", filename).await? {
                    DuplicateCheck::Duplicate(DuplicateReason::SameFilename)
                } else {
                    DuplicateCheck::New
                }
            }
            DocumentIdentity::ContentHash => {
                if self.index.exists_by_field("file_hash", file_hash).await? {
                    DuplicateCheck::Duplicate(DuplicateReason::SameContent)
                } else if self.index.exists_by_field("filename", filename).await? {
                    DuplicateCheck::Replace
                } else {
                    DuplicateCheck::New
                }
            }
            DocumentIdentity::FilenameAndHash => {
                if self
                    .index
                    .exists_by_fields(&[("filename", filename), ("file_hash", file_hash)])
                    .await?
                {
                    DuplicateCheck::Duplicate(DuplicateReason::AlreadyIndexed)
                } else if self.index.exists_by_field("filename", filename).await? {
                    DuplicateCheck::Replace
                } else {
                    DuplicateCheck::New
                }
            }
        };
        Ok(check)
    }

    pub async fn ingest_folder(&self, folder: &Path) -> Result<IngestionReport, IngestError> {
        let files = discover_documents(folder);

        if files.is_empty() {
            return Err(IngestError::NoDocuments(folder.display().to_string()));
        }

        let mut outcomes = Vec::new();
        let mut skipped_files = Vec::new();

        for path in files {
            match self.ingest_file(&path).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => skipped_files.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                }),
            }
        }

        Ok(IngestionReport {
            outcomes,
            skipped_files,
        })
    }
}

enum DuplicateCheck {
    New,
    Replace,
    Duplicate(DuplicateReason),
}
