//! Embedding generation
//!
//! [`Embedder`] batches chunk texts, sends each batch to an
//! [`EmbeddingProvider`] with bounded retries and checks that every
//! batch comes back complete, in order and with a single dimension.
//! Two providers ship with the crate: a local fastembed (ONNX) model
//! and an OpenAI-compatible HTTP endpoint.

use crate::config::{Config, EmbeddingBackend, EmbeddingModel, DEFAULT_BATCH_SIZE};
use crate::error::{KbError, Result};
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Something that turns a batch of texts into vectors of one fixed dimension.
///
/// Implementations must return exactly one vector per input, in input order.
pub trait EmbeddingProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Embed one batch
    fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Batching, retrying front-end over an [`EmbeddingProvider`]
pub struct Embedder {
    provider: Box<dyn EmbeddingProvider>,
    batch_size: usize,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl Embedder {
    /// Wrap a provider with default batching (64) and three attempts per batch
    pub fn new(provider: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Build the provider selected in the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider: Box<dyn EmbeddingProvider> = match config.backend {
            EmbeddingBackend::Local => Box::new(FastEmbedProvider::new(&config.model)?),
            EmbeddingBackend::OpenAi => Box::new(OpenAiProvider::from_config(config)?),
        };

        Ok(Self::new(provider)
            .with_batch_size(config.batch_size)
            .with_retry(config.max_attempts, Duration::from_millis(500)))
    }

    /// Set the number of texts per provider call
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set attempts per batch and the base delay between attempts
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    /// Name of the underlying provider
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Embed a single text string
    pub fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| KbError::Embedding("No embedding returned".to_string()))
    }

    /// Embed one batch with retries, validating the provider's answer
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut attempt = 1;
        loop {
            match self.provider.embed(texts).and_then(|v| check_batch(texts.len(), v)) {
                Ok(vectors) => return Ok(vectors),
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        "{} batch of {} failed (attempt {}/{}): {}",
                        self.provider.name(),
                        texts.len(),
                        attempt,
                        self.max_attempts,
                        e
                    );
                    std::thread::sleep(self.retry_backoff * attempt);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Embed all texts in sequential batches, reporting `(done, total)` after each
    pub fn embed_batch_with_progress<F>(&self, texts: &[String], mut progress: F) -> Result<Vec<Vec<f32>>>
    where
        F: FnMut(usize, usize),
    {
        let total = texts.len();
        let mut all_embeddings: Vec<Vec<f32>> = Vec::with_capacity(total);

        for batch in texts.chunks(self.batch_size) {
            let embeddings = self.embed_batch(batch)?;

            if let (Some(first), Some(next)) = (all_embeddings.first(), embeddings.first()) {
                if first.len() != next.len() {
                    return Err(KbError::Embedding(format!(
                        "Dimension changed between batches: {} then {}",
                        first.len(),
                        next.len()
                    )));
                }
            }

            all_embeddings.extend(embeddings);
            debug!("Embedded {}/{} texts", all_embeddings.len(), total);
            progress(all_embeddings.len(), total);
        }

        Ok(all_embeddings)
    }

    /// Embed all texts in sequential batches
    pub fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch_with_progress(texts, |_, _| {})
    }
}

/// One vector per input, all of the same non-zero dimension
fn check_batch(expected: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(KbError::Embedding(format!(
            "Provider returned {} vectors for {} inputs",
            vectors.len(),
            expected
        )));
    }

    let dimension = vectors.first().map(Vec::len).unwrap_or(0);
    if dimension == 0 || vectors.iter().any(|v| v.len() != dimension) {
        return Err(KbError::Embedding(
            "Provider returned vectors of inconsistent dimension".to_string(),
        ));
    }

    Ok(vectors)
}

/// Local embedder using fastembed with ONNX runtime
pub struct FastEmbedProvider {
    model: TextEmbedding,
    name: &'static str,
}

impl FastEmbedProvider {
    /// Load the specified model
    ///
    /// On first use, downloads the model from HuggingFace (~30-470MB).
    /// Subsequent uses load from cache instantly.
    pub fn new(model_config: &EmbeddingModel) -> Result<Self> {
        info!("Loading embedding model: {:?}", model_config);

        let fastembed_model = match model_config {
            EmbeddingModel::AllMiniLmL6V2 => FastEmbedModel::AllMiniLML6V2,
            EmbeddingModel::BgeSmallEnV15 => FastEmbedModel::BGESmallENV15,
            EmbeddingModel::NomicEmbedTextV15 => FastEmbedModel::NomicEmbedTextV15,
            EmbeddingModel::MultilingualE5Small => FastEmbedModel::MultilingualE5Small,
        };

        let model = TextEmbedding::try_new(
            InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| KbError::Embedding(e.to_string()))?;

        info!("Model loaded successfully (dimension: {})", model_config.dimension());

        Ok(Self {
            model,
            name: model_config.model_name(),
        })
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<&str> = batch.iter().map(String::as_str).collect();
        self.model
            .embed(texts, None)
            .map_err(|e| KbError::Embedding(e.to_string()))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Remote embedder speaking the OpenAI `/embeddings` API
pub struct OpenAiProvider {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiProvider {
    /// Create a provider; every request carries `timeout`
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("kbindex/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| KbError::Embedding(format!("HTTP client error: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Create a provider from config, reading the key from `OPENAI_API_KEY`
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| KbError::Config("OPENAI_API_KEY is not set".to_string()))?;

        Self::new(
            &config.openai_base_url,
            &config.openai_model,
            &api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: batch,
            })
            .send()
            .map_err(|e| KbError::Embedding(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(KbError::Embedding(format!(
                "Provider returned {status}: {}",
                body.chars().take(300).collect::<String>()
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| KbError::Embedding(format!("Malformed response: {e}")))?;

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Encodes each text's length and records batch sizes
    struct Recording {
        batches: Arc<Mutex<Vec<usize>>>,
    }

    impl EmbeddingProvider for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(batch.len());
            Ok(batch.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    /// Fails the first `failures` calls
    struct Flaky {
        failures: usize,
        calls: Arc<AtomicUsize>,
    }

    impl EmbeddingProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(KbError::Embedding("timed out".into()));
            }
            Ok(batch.iter().map(|_| vec![0.5, 0.5]).collect())
        }
    }

    struct Short;

    impl EmbeddingProvider for Short {
        fn name(&self) -> &str {
            "short"
        }

        fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(batch.iter().skip(1).map(|_| vec![1.0]).collect())
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| "x".repeat(i + 1)).collect()
    }

    #[test]
    fn test_batches_preserve_order() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let embedder = Embedder::new(Box::new(Recording {
            batches: Arc::clone(&batches),
        }))
        .with_batch_size(4);

        let mut reported = Vec::new();
        let vectors = embedder
            .embed_batch_with_progress(&texts(10), |done, total| reported.push((done, total)))
            .unwrap();

        assert_eq!(*batches.lock().unwrap(), vec![4, 4, 2]);
        assert_eq!(reported, vec![(4, 10), (8, 10), (10, 10)]);
        let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lengths, (1..=10).map(|n| n as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_input_makes_no_calls() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let embedder = Embedder::new(Box::new(Recording {
            batches: Arc::clone(&batches),
        }));
        assert!(embedder.embed_all(&[]).unwrap().is_empty());
        assert!(batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_retries_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let embedder = Embedder::new(Box::new(Flaky {
            failures: 2,
            calls: Arc::clone(&calls),
        }))
        .with_retry(3, Duration::ZERO);

        let vector = embedder.embed_one("descale").unwrap();
        assert_eq!(vector, vec![0.5, 0.5]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let embedder = Embedder::new(Box::new(Flaky {
            failures: usize::MAX,
            calls: Arc::clone(&calls),
        }))
        .with_retry(2, Duration::ZERO);

        let result = embedder.embed_all(&texts(3));
        assert!(matches!(result, Err(KbError::Embedding(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rejects_missing_vectors() {
        let embedder = Embedder::new(Box::new(Short)).with_retry(1, Duration::ZERO);
        let result = embedder.embed_all(&texts(3));
        assert!(matches!(result, Err(KbError::Embedding(_))));
    }
}
