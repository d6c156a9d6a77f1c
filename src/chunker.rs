//! Token-window chunking for semantic search
//!
//! Splits raw document text into overlapping windows of at most `T`
//! tokens using the `cl100k_base` BPE. Window `n` starts at token
//! `n * max(1, T - O)`, so identical text and parameters always give
//! identical chunk boundaries.

use crate::error::{KbError, Result};
use crate::loader::RawUnit;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tiktoken_rs::{CoreBPE, Rank};

/// A chunk of text with metadata for search results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// The text content
    pub text: String,
    /// Source file path
    pub source: String,
    /// Page number for paginated sources
    pub page: Option<u32>,
    /// SHA-256 of source, page and text; a stable identity for the chunk
    pub sha: String,
}

/// Splits text into overlapping token windows
pub struct Chunker {
    bpe: CoreBPE,
    max_tokens: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a new chunker
    ///
    /// # Arguments
    /// * `max_tokens` - Maximum tokens per chunk (`T`)
    /// * `overlap` - Tokens shared by consecutive chunks (`O`)
    pub fn new(max_tokens: usize, overlap: usize) -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| KbError::Tokenizer(e.to_string()))?;
        Ok(Self {
            bpe,
            max_tokens,
            overlap,
        })
    }

    /// Token budget per chunk
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Distance between consecutive window starts
    pub fn stride(&self) -> usize {
        self.max_tokens.saturating_sub(self.overlap).max(1)
    }

    /// Number of tokens in `text`
    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Lazily iterate the windows of `text`; call again to restart
    pub fn windows(&self, text: &str) -> Windows<'_> {
        Windows {
            chunker: self,
            tokens: self.bpe.encode_ordinary(text),
            start: 0,
        }
    }

    /// All windows of `text`, in order
    pub fn split(&self, text: &str) -> Vec<String> {
        self.windows(text).collect()
    }

    /// Chunk one extracted unit, attaching source metadata and identity hashes
    pub fn chunk_unit(&self, unit: &RawUnit) -> Vec<Chunk> {
        self.windows(&unit.text)
            .map(|text| Chunk {
                sha: content_hash(&unit.source, unit.page, &text),
                text,
                source: unit.source.clone(),
                page: unit.page,
            })
            .collect()
    }

    /// Decode a window's bytes; a character split at either edge becomes U+FFFD
    fn decode(&self, tokens: &[Rank]) -> String {
        let bytes: Vec<u8> = self
            .bpe
            ._decode_native_and_split(tokens.to_vec())
            .flatten()
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Iterator over the token windows of one text
pub struct Windows<'a> {
    chunker: &'a Chunker,
    tokens: Vec<Rank>,
    start: usize,
}

impl Iterator for Windows<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.start >= self.tokens.len() {
            return None;
        }

        let end = (self.start + self.chunker.max_tokens).min(self.tokens.len());
        let window = &self.tokens[self.start..end];
        if window.is_empty() {
            return None;
        }

        let text = self.chunker.decode(window);
        self.start += self.chunker.stride();
        Some(text)
    }
}

/// Stable identity of a chunk: SHA-256 over source, page and text
pub fn content_hash(source: &str, page: Option<u32>, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    if let Some(page) = page {
        hasher.update(page.to_string().as_bytes());
    }
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
