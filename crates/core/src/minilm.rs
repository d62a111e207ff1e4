use crate::embeddings::Embedder;
use crate::error::EmbeddingError;
use crate::truncation::{TokenTruncator, MAX_EMBEDDING_TOKENS};
use fastembed::{
    EmbeddingModel, InitOptions, InitOptionsUserDefined, Pooling, TextEmbedding, TokenizerFiles,
    UserDefinedEmbeddingModel,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use walkdir::WalkDir;

pub const MINILM_DIMENSIONS: usize = 384;
pub const MINILM_MODEL_NAME: &str = "all-MiniLM-L6-v2";

const MODEL_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";
const CONFIG_FILE: &str = "config.json";
const SPECIAL_TOKENS_FILE: &str = "special_tokens_map.json";
const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

pub struct MiniLmEmbedder {
    model: Mutex<TextEmbedding>,
    truncator: TokenTruncator,
}

pub enum ModelAcquisition {
    Local(MiniLmEmbedder),
    Remote(MiniLmEmbedder),
    Failed(String),
}

impl ModelAcquisition {
    pub fn source(&self) -> &'static str {
        match self {
            ModelAcquisition::Local(_) => "local",
            ModelAcquisition::Remote(_) => "remote",
            ModelAcquisition::Failed(_) => "failed",
        }
    }

    pub fn into_result(self) -> Result<MiniLmEmbedder, EmbeddingError> {
        match self {
            ModelAcquisition::Local(embedder) | ModelAcquisition::Remote(embedder) => Ok(embedder),
            ModelAcquisition::Failed(reason) => Err(EmbeddingError::ModelUnavailable(reason)),
        }
    }
}

impl MiniLmEmbedder {
    pub fn acquire(model_dir: Option<&Path>, cache_dir: &Path) -> ModelAcquisition {
        let local_failure = match model_dir {
            Some(dir) => match Self::load_local(dir) {
                Ok(embedder) => {
                    info!(
                        model_dir = %dir.display(),
                        "loaded {MINILM_MODEL_NAME} from local files"
                    );
                    return ModelAcquisition::Local(embedder);
                }
                Err(error) => {
                    warn!(
                        model_dir = %dir.display(),
                        %error,
                        "local model unavailable, downloading"
                    );
                    error.to_string()
                }
            },
            None => "no local model directory configured".to_string(),
        };

        match Self::load_remote(cache_dir) {
            Ok(embedder) => {
                info!(
                    cache_dir = %cache_dir.display(),
                    "loaded {MINILM_MODEL_NAME} from model hub"
                );
                ModelAcquisition::Remote(embedder)
            }
            Err(error) => {
                ModelAcquisition::Failed(format!("local: {local_failure}; remote: {error}"))
            }
        }
    }

    pub fn load_local(dir: &Path) -> Result<Self, EmbeddingError> {
        let read = |name: &str| {
            let path = dir.join(name);
            fs::read(&path).map_err(|error| {
                EmbeddingError::ModelUnavailable(format!("{}: {error}", path.display()))
            })
        };

        let onnx = read(MODEL_FILE)?;
        let tokenizer_file = read(TOKENIZER_FILE)?;
        let truncator = TokenTruncator::from_bytes(&tokenizer_file, MAX_EMBEDDING_TOKENS)?;

        let user_model = UserDefinedEmbeddingModel::new(
            onnx,
            TokenizerFiles {
                tokenizer_file,
                config_file: read(CONFIG_FILE)?,
                special_tokens_map_file: read(SPECIAL_TOKENS_FILE)?,
                tokenizer_config_file: read(TOKENIZER_CONFIG_FILE)?,
            },
        )
        .with_pooling(Pooling::Mean);

        let model = TextEmbedding::try_new_from_user_defined(
            user_model,
            InitOptionsUserDefined::default().with_max_length(MAX_EMBEDDING_TOKENS),
        )
        .map_err(|error| EmbeddingError::ModelUnavailable(error.to_string()))?;

        Ok(Self {
            model: Mutex::new(model),
            truncator,
        })
    }

    pub fn load_remote(cache_dir: &Path) -> Result<Self, EmbeddingError> {
        fs::create_dir_all(cache_dir)
            .map_err(|error| EmbeddingError::ModelUnavailable(error.to_string()))?;

        let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_cache_dir(cache_dir.to_path_buf())
            .with_show_download_progress(false)
            .with_max_length(MAX_EMBEDDING_TOKENS);
        let model = TextEmbedding::try_new(options)
            .map_err(|error| EmbeddingError::ModelUnavailable(error.to_string()))?;

        let truncator = match find_cached_tokenizer(cache_dir) {
            Some(path) => TokenTruncator::from_file(&path, MAX_EMBEDDING_TOKENS)?,
            None => {
                warn!(
                    cache_dir = %cache_dir.display(),
                    "no cached tokenizer.json, truncating by words"
                );
                TokenTruncator::whitespace(MAX_EMBEDDING_TOKENS)
            }
        };

        Ok(Self {
            model: Mutex::new(model),
            truncator,
        })
    }
}

fn find_cached_tokenizer(cache_dir: &Path) -> Option<PathBuf> {
    WalkDir::new(cache_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name() == TOKENIZER_FILE)
        .find(|entry| {
            entry
                .path()
                .to_string_lossy()
                .to_ascii_lowercase()
                .contains("minilm-l6")
        })
        .map(|entry| entry.path().to_path_buf())
}

impl Embedder for MiniLmEmbedder {
    fn dimensions(&self) -> usize {
        MINILM_DIMENSIONS
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let truncated = texts
            .iter()
            .map(|text| self.truncator.truncate(text).map(|kept| kept.into_owned()))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(count = truncated.len(), "embedding texts");

        let mut model = self
            .model
            .lock()
            .map_err(|_| EmbeddingError::Inference("embedding model lock poisoned".to_string()))?;
        let vectors = model
            .embed(truncated, None)
            .map_err(|error| EmbeddingError::Inference(error.to_string()))?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }
}
