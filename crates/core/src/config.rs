use crate::error::ConfigError;
use crate::ingest::DocumentIdentity;
use crate::retrieval::RetrievalOptions;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "DOCQA_";
pub const DEFAULT_CONFIG_FILE: &str = "docqa.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    #[default]
    Minilm,
    Ngram,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    #[default]
    Local,
    Qdrant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantSettings {
    pub url: String,
    pub collection: String,
}

impl Default for QdrantSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            collection: "documents".to_string(),
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_root: PathBuf,
    pub embedder: EmbedderKind,
    pub model_dir: Option<PathBuf>,
    pub model_cache_dir: Option<PathBuf>,
    pub index_backend: IndexBackend,
    pub qdrant: QdrantSettings,
    pub document_identity: DocumentIdentity,
    pub retrieval: RetrievalOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            embedder: EmbedderKind::default(),
            model_dir: None,
            model_cache_dir: None,
            index_backend: IndexBackend::default(),
            qdrant: QdrantSettings::default(),
            document_identity: DocumentIdentity::default(),
            retrieval: RetrievalOptions::default(),
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|error| ConfigError::from(Box::new(error)))
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_root.join("vectors")
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.data_root.join("uploaded_docs")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.model_cache_dir
            .clone()
            .unwrap_or_else(|| self.data_root.join("models"))
    }
}
