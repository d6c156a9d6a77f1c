//! Configuration types and constants for kbindex
//!
//! Defines embedding backends, chunking parameters, artifact locations
//! and the document types the loader understands.

use crate::error::{KbError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default location of the persisted index
pub const DEFAULT_INDEX_DIR: &str = "/data/vm_kb";
/// Default document root
pub const DEFAULT_DOCS_DIR: &str = "docs";
/// Default token budget per chunk
pub const DEFAULT_CHUNK_TOKENS: usize = 500;
/// Default token overlap between consecutive chunks
pub const DEFAULT_CHUNK_OVERLAP: usize = 60;
/// Default number of texts per embedding request
pub const DEFAULT_BATCH_SIZE: usize = 64;
/// Default remote embedding model
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
/// Default OpenAI-compatible endpoint
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Embedding matrix artifact
pub const VECTORS_FILE: &str = "kb_vectors.bin";
/// Chunk metadata artifact
pub const METADATA_FILE: &str = "kb_meta.json";
/// Last indexed document digest
pub const DIGEST_FILE: &str = "docs_digest.txt";

/// Supported local embedding models (all run via ONNX)
///
/// These models are downloaded on first use and cached locally.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum EmbeddingModel {
    /// Fast, small model (384 dims, ~30MB) - good for most use cases
    #[default]
    AllMiniLmL6V2,
    /// Higher quality (384 dims, ~90MB) - better semantic understanding
    BgeSmallEnV15,
    /// Long-document model (768 dims, ~90MB)
    NomicEmbedTextV15,
    /// Multilingual support (384 dims, ~470MB)
    MultilingualE5Small,
}

impl EmbeddingModel {
    /// Get the HuggingFace model identifier
    pub fn model_name(&self) -> &'static str {
        match self {
            Self::AllMiniLmL6V2 => "sentence-transformers/all-MiniLM-L6-v2",
            Self::BgeSmallEnV15 => "BAAI/bge-small-en-v1.5",
            Self::NomicEmbedTextV15 => "nomic-ai/nomic-embed-text-v1.5",
            Self::MultilingualE5Small => "intfloat/multilingual-e5-small",
        }
    }

    /// Get the embedding vector dimension
    pub fn dimension(&self) -> usize {
        match self {
            Self::AllMiniLmL6V2 => 384,
            Self::BgeSmallEnV15 => 384,
            Self::NomicEmbedTextV15 => 768,
            Self::MultilingualE5Small => 384,
        }
    }
}

impl FromStr for EmbeddingModel {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "minilm" | "all-minilm-l6-v2" | "default" => Ok(Self::AllMiniLmL6V2),
            "bge" | "bge-small" | "bge-small-en-v1.5" => Ok(Self::BgeSmallEnV15),
            "nomic" | "nomic-embed" | "nomic-embed-text-v1.5" => Ok(Self::NomicEmbedTextV15),
            "multilingual" | "e5" | "multilingual-e5-small" => Ok(Self::MultilingualE5Small),
            _ => Err(KbError::Config(format!(
                "Unknown model: {}. Valid options: minilm, bge, nomic, multilingual",
                s
            ))),
        }
    }
}

/// Where embeddings come from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// OpenAI-compatible HTTP endpoint
    #[default]
    OpenAi,
    /// Local fastembed model
    Local,
}

impl FromStr for EmbeddingBackend {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" | "remote" | "http" => Ok(Self::OpenAi),
            "local" | "fastembed" | "onnx" => Ok(Self::Local),
            _ => Err(KbError::Config(format!(
                "Unknown embedding backend: {}. Valid options: openai, local",
                s
            ))),
        }
    }
}

/// Configuration for indexing and search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the documents being indexed
    pub docs_dir: PathBuf,
    /// Directory to store index artifacts
    pub index_dir: PathBuf,
    /// Embedding backend
    pub backend: EmbeddingBackend,
    /// Model used by the local backend
    pub model: EmbeddingModel,
    /// Model name sent to the remote backend
    pub openai_model: String,
    /// Base URL of the remote backend
    pub openai_base_url: String,
    /// Chunk size in tokens
    pub chunk_tokens: usize,
    /// Overlap between chunks in tokens
    pub chunk_overlap: usize,
    /// Texts per embedding request
    pub batch_size: usize,
    /// Per-request timeout for the remote backend
    pub request_timeout_secs: u64,
    /// Attempts per embedding batch before giving up
    pub max_attempts: u32,
    /// Number of parallel workers for document extraction
    pub workers: usize,
    /// Draw progress bars while embedding
    pub show_progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docs_dir: PathBuf::from(DEFAULT_DOCS_DIR),
            index_dir: PathBuf::from(DEFAULT_INDEX_DIR),
            backend: EmbeddingBackend::default(),
            model: EmbeddingModel::default(),
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            chunk_tokens: DEFAULT_CHUNK_TOKENS,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            batch_size: DEFAULT_BATCH_SIZE,
            request_timeout_secs: 30,
            max_attempts: 3,
            workers: num_cpus::get(),
            show_progress: false,
        }
    }
}

impl Config {
    /// Create a new config for the given document root and index directory
    pub fn new(docs_dir: PathBuf, index_dir: PathBuf) -> Self {
        Self {
            docs_dir,
            index_dir,
            ..Default::default()
        }
    }

    /// Build a config from `KB_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("KB_DOCS_DIR") {
            config.docs_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("KB_INDEX_DIR") {
            config.index_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("KB_CHUNK_TOKENS") {
            config.chunk_tokens = parse_var("KB_CHUNK_TOKENS", &v)?;
        }
        if let Some(v) = lookup("KB_CHUNK_OVERLAP") {
            config.chunk_overlap = parse_var("KB_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = lookup("KB_EMBED_BATCH") {
            config.batch_size = parse_var("KB_EMBED_BATCH", &v)?;
        }
        if let Some(v) = lookup("KB_EMBED_TIMEOUT") {
            config.request_timeout_secs = parse_var("KB_EMBED_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("KB_EMBED_ATTEMPTS") {
            config.max_attempts = parse_var("KB_EMBED_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("KB_EMBED_BACKEND") {
            config.backend = v.parse()?;
        }
        if let Some(v) = lookup("KB_LOCAL_MODEL") {
            config.model = v.parse()?;
        }
        if let Some(v) = lookup("KB_OPENAI_MODEL") {
            config.openai_model = v;
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            config.openai_base_url = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_tokens == 0 {
            return Err(KbError::Config("chunk_tokens must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(KbError::Config("batch_size must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(KbError::Config("max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Set the embedding backend
    pub fn with_backend(mut self, backend: EmbeddingBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the local embedding model
    pub fn with_model(mut self, model: EmbeddingModel) -> Self {
        self.model = model;
        self
    }

    /// Set the chunk size and overlap, in tokens
    pub fn with_chunking(mut self, tokens: usize, overlap: usize) -> Self {
        self.chunk_tokens = tokens;
        self.chunk_overlap = overlap;
        self
    }

    /// Set the number of texts per embedding request
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Enable or disable progress bars
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Get path to the embedding matrix file
    pub fn vectors_path(&self) -> PathBuf {
        self.index_dir.join(VECTORS_FILE)
    }

    /// Get path to the metadata file
    pub fn metadata_path(&self) -> PathBuf {
        self.index_dir.join(METADATA_FILE)
    }

    /// Get path to the saved digest file
    pub fn digest_path(&self) -> PathBuf {
        self.index_dir.join(DIGEST_FILE)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| KbError::Config(format!("{key} has an invalid value: {value:?}")))
}

/// Extensions extracted page by page
pub const PDF_EXTENSIONS: &[&str] = &["pdf"];

/// Extensions extracted as a single Word document body
pub const DOCX_EXTENSIONS: &[&str] = &["docx"];

/// Extensions read as plain text
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md"];

/// Check if a file should be indexed based on its extension
pub fn should_index_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            PDF_EXTENSIONS
                .iter()
                .chain(DOCX_EXTENSIONS)
                .chain(TEXT_EXTENSIONS)
                .any(|known| *known == ext)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_model_parsing() {
        let model: EmbeddingModel = "minilm".parse().unwrap();
        assert_eq!(model.dimension(), 384);

        let model: EmbeddingModel = "nomic".parse().unwrap();
        assert_eq!(model.dimension(), 768);

        assert!("invalid".parse::<EmbeddingModel>().is_err());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!(
            "OpenAI".parse::<EmbeddingBackend>().unwrap(),
            EmbeddingBackend::OpenAi
        );
        assert_eq!(
            "fastembed".parse::<EmbeddingBackend>().unwrap(),
            EmbeddingBackend::Local
        );
        assert!("carrier-pigeon".parse::<EmbeddingBackend>().is_err());
    }

    #[test]
    fn test_should_index_file() {
        assert!(should_index_file(Path::new("manual.pdf")));
        assert!(should_index_file(Path::new("Manual.PDF")));
        assert!(should_index_file(Path::new("warranty.docx")));
        assert!(should_index_file(Path::new("faq.txt")));
        assert!(!should_index_file(Path::new("photo.png")));
        assert!(!should_index_file(Path::new("legacy.doc")));
        assert!(!should_index_file(Path::new("Makefile")));
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.chunk_tokens, 500);
        assert_eq!(config.chunk_overlap, 60);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.index_dir, PathBuf::from("/data/vm_kb"));
        assert_eq!(config.vectors_path(), PathBuf::from("/data/vm_kb/kb_vectors.bin"));
        assert_eq!(config.metadata_path(), PathBuf::from("/data/vm_kb/kb_meta.json"));
        assert_eq!(config.digest_path(), PathBuf::from("/data/vm_kb/docs_digest.txt"));
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("KB_DOCS_DIR", "/srv/docs"),
            ("KB_CHUNK_TOKENS", "200"),
            ("KB_CHUNK_OVERLAP", "20"),
            ("KB_EMBED_BACKEND", "local"),
            ("KB_LOCAL_MODEL", "bge"),
        ]
        .into_iter()
        .collect();

        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.docs_dir, PathBuf::from("/srv/docs"));
        assert_eq!(config.chunk_tokens, 200);
        assert_eq!(config.chunk_overlap, 20);
        assert_eq!(config.backend, EmbeddingBackend::Local);
        assert_eq!(config.model, EmbeddingModel::BgeSmallEnV15);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let bad_number = Config::from_lookup(|k| {
            (k == "KB_CHUNK_TOKENS").then(|| "lots".to_string())
        });
        assert!(matches!(bad_number, Err(KbError::Config(_))));

        let zero_batch = Config::default().with_batch_size(0);
        assert!(zero_batch.validate().is_err());
    }
}
