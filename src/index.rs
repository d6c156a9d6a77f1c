//! Vector index with exact cosine search
//!
//! Holds the embedding matrix (row-major `f32`) and the positionally
//! aligned chunk metadata. An index is built whole and never edited in
//! place; the manager swaps complete indexes.
//!
//! On disk an index is two artifacts: `kb_meta.json` and
//! `kb_vectors.bin`. The vector file records the SHA-256 of the metadata
//! bytes it was written with, so a torn pair is detected on load.

use crate::chunker::Chunk;
use crate::config::Config;
use crate::error::{KbError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Added to the cosine denominator to keep zero vectors finite
const COSINE_EPSILON: f32 = 1e-8;

/// Per-row metadata, serialized as `{source, page, sha, text}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub source: String,
    pub page: Option<u32>,
    pub sha: String,
    pub text: String,
}

impl From<Chunk> for ChunkMeta {
    fn from(chunk: Chunk) -> Self {
        Self {
            source: chunk.source,
            page: chunk.page,
            sha: chunk.sha,
            text: chunk.text,
        }
    }
}

/// On-disk layout of `kb_vectors.bin`
#[derive(Serialize, Deserialize)]
struct MatrixFile {
    rows: u64,
    dim: u64,
    meta_sha256: String,
    data: Vec<f32>,
}

/// Embedding matrix plus aligned metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    vectors: Vec<f32>,
    norms: Vec<f32>,
    dimension: usize,
    metadata: Vec<ChunkMeta>,
}

impl VectorIndex {
    /// The empty index: no vectors, no metadata
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an index from one embedding per metadata record
    pub fn from_parts(embeddings: Vec<Vec<f32>>, metadata: Vec<ChunkMeta>) -> Result<Self> {
        if embeddings.len() != metadata.len() {
            return Err(KbError::Index(format!(
                "Embeddings and metadata count mismatch: {} vs {}",
                embeddings.len(),
                metadata.len()
            )));
        }
        if metadata.is_empty() {
            return Ok(Self::empty());
        }

        let dimension = embeddings[0].len();
        if dimension == 0 || embeddings.iter().any(|e| e.len() != dimension) {
            return Err(KbError::Index(
                "All embeddings must share one non-zero dimension".to_string(),
            ));
        }

        let vectors: Vec<f32> = embeddings.into_iter().flatten().collect();
        Self::from_matrix(vectors, dimension, metadata)
    }

    fn from_matrix(vectors: Vec<f32>, dimension: usize, metadata: Vec<ChunkMeta>) -> Result<Self> {
        if metadata.is_empty() && vectors.is_empty() {
            return Ok(Self::empty());
        }
        if dimension == 0 || vectors.len() != metadata.len() * dimension {
            return Err(KbError::Index(format!(
                "Matrix of {} values does not fit {} rows of dimension {}",
                vectors.len(),
                metadata.len(),
                dimension
            )));
        }

        let norms = vectors
            .chunks_exact(dimension)
            .map(|row| row.iter().map(|x| x * x).sum::<f32>().sqrt())
            .collect();

        Ok(Self {
            vectors,
            norms,
            dimension,
            metadata,
        })
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    /// True when nothing is indexed
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Embedding dimension, 0 for the empty index
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Metadata rows in index order
    pub fn metadata(&self) -> &[ChunkMeta] {
        &self.metadata
    }

    /// Embedding of row `i`
    pub fn vector(&self, i: usize) -> Option<&[f32]> {
        if i >= self.len() {
            return None;
        }
        Some(&self.vectors[i * self.dimension..(i + 1) * self.dimension])
    }

    /// The `top_k` rows most similar to `query`, best first.
    ///
    /// Equal scores keep index order. An empty index yields no results.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if self.is_empty() || top_k == 0 {
            return Ok(vec![]);
        }
        if query.len() != self.dimension {
            return Err(KbError::Index(format!(
                "Query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let query_norm = query.iter().map(|x| x * x).sum::<f32>().sqrt();

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimension)
            .zip(&self.norms)
            .enumerate()
            .map(|(i, (row, norm))| {
                let dot: f32 = row.iter().zip(query).map(|(a, b)| a * b).sum();
                let score = dot / (norm * query_norm + COSINE_EPSILON);
                (i, if score.is_nan() { f32::NEG_INFINITY } else { score })
            })
            .collect();

        // Stable sort: ties stay in insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let meta = &self.metadata[i];
                SearchResult {
                    text: meta.text.clone(),
                    source: meta.source.clone(),
                    page: meta.page,
                    sha: meta.sha.clone(),
                    score,
                }
            })
            .collect())
    }

    /// Write both artifacts atomically: metadata first, then vectors
    pub fn save(&self, config: &Config) -> Result<()> {
        let metadata_path = config.metadata_path();
        let vectors_path = config.vectors_path();

        info!("Saving index to {:?}", config.index_dir);

        let meta_bytes = serde_json::to_vec(&self.metadata)?;
        let matrix = MatrixFile {
            rows: self.len() as u64,
            dim: self.dimension as u64,
            meta_sha256: sha256_hex(&meta_bytes),
            data: self.vectors.clone(),
        };
        let matrix_bytes = bincode::serialize(&matrix)?;

        write_atomic(&metadata_path, &meta_bytes)?;
        write_atomic(&vectors_path, &matrix_bytes)?;

        info!("Saved {} vectors of dimension {}", self.len(), self.dimension);
        Ok(())
    }

    /// Load the persisted index, or the empty index if it is missing or damaged
    pub fn load(config: &Config) -> Self {
        match Self::try_load(config) {
            Ok(index) => {
                info!("Loaded {} vectors from {:?}", index.len(), config.index_dir);
                index
            }
            Err(e) => {
                warn!("No usable index in {:?}: {}", config.index_dir, e);
                Self::empty()
            }
        }
    }

    /// Load the persisted index, reporting why it could not be used
    pub fn try_load(config: &Config) -> Result<Self> {
        let meta_bytes = std::fs::read(config.metadata_path())?;
        let matrix_bytes = std::fs::read(config.vectors_path())?;

        let matrix: MatrixFile = bincode::deserialize(&matrix_bytes)?;
        if matrix.meta_sha256 != sha256_hex(&meta_bytes) {
            return Err(KbError::Index(
                "Vector and metadata artifacts are from different writes".to_string(),
            ));
        }

        let metadata: Vec<ChunkMeta> = serde_json::from_slice(&meta_bytes)?;
        if matrix.rows != metadata.len() as u64 {
            return Err(KbError::Index(format!(
                "{} vectors but {} metadata records",
                matrix.rows,
                metadata.len()
            )));
        }

        let dimension = usize::try_from(matrix.dim)
            .map_err(|_| KbError::Index("Dimension out of range".to_string()))?;
        debug!("Read matrix {}x{}", matrix.rows, dimension);
        Self::from_matrix(matrix.data, dimension, metadata)
    }
}

/// Search result with chunk metadata and similarity score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub text: String,
    pub source: String,
    pub page: Option<u32>,
    pub sha: String,
    /// Cosine similarity (-1.0 to 1.0, higher is better)
    pub score: f32,
}

/// Cosine similarity with an epsilon-guarded denominator
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    dot / (norm_a * norm_b + COSINE_EPSILON)
}

/// Replace `path` with `bytes` via a synced temp file in the same directory
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| KbError::InvalidPath(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(dir).map_err(|e| KbError::persistence(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| KbError::persistence(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| KbError::persistence(path, e))?;
    tmp.persist(path)
        .map_err(|e| KbError::persistence(path, e.error))?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(n: usize) -> ChunkMeta {
        ChunkMeta {
            source: format!("docs/{n}.txt"),
            page: if n % 2 == 0 { Some(n as u32) } else { None },
            sha: format!("{n:064}"),
            text: format!("chunk {n}"),
        }
    }

    fn sample() -> VectorIndex {
        VectorIndex::from_parts(
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.7, 0.7, 0.0],
                vec![-1.0, 0.0, 0.0],
            ],
            (0..4).map(meta).collect(),
        )
        .unwrap()
    }

    fn config(dir: &TempDir) -> Config {
        Config::new(dir.path().join("docs"), dir.path().join("index"))
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_from_parts_rejects_misaligned_input() {
        let result = VectorIndex::from_parts(vec![vec![1.0]], vec![meta(0), meta(1)]);
        assert!(matches!(result, Err(KbError::Index(_))));

        let ragged = VectorIndex::from_parts(vec![vec![1.0], vec![1.0, 2.0]], vec![meta(0), meta(1)]);
        assert!(matches!(ragged, Err(KbError::Index(_))));
    }

    #[test]
    fn test_search_ranks_by_cosine() {
        let index = sample();
        let results = index.search(&[1.0, 0.1, 0.0], 3).unwrap();

        let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["chunk 0", "chunk 2", "chunk 1"]);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(results[0].source, "docs/0.txt");
        assert_eq!(results[0].page, Some(0));
    }

    #[test]
    fn test_search_limits_and_keeps_tie_order() {
        let index = VectorIndex::from_parts(
            vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![2.0, 0.0], vec![0.5, 0.0]],
            (0..4).map(meta).collect(),
        )
        .unwrap();

        let results = index.search(&[1.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 4);
        let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["chunk 1", "chunk 2", "chunk 3", "chunk 0"]);

        assert_eq!(index.search(&[1.0, 0.0], 2).unwrap().len(), 2);
        assert!(index.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_search_empty_and_wrong_dimension() {
        assert!(VectorIndex::empty().search(&[1.0, 2.0], 5).unwrap().is_empty());
        assert!(matches!(sample().search(&[1.0], 1), Err(KbError::Index(_))));
    }

    #[test]
    fn test_save_load_roundtrip_is_bit_exact() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let index = VectorIndex::from_parts(
            vec![vec![0.1, -3.5e-12, f32::MAX], vec![1.0 / 3.0, f32::MIN_POSITIVE, -0.0]],
            vec![meta(0), meta(1)],
        )
        .unwrap();

        index.save(&config).unwrap();
        let loaded = VectorIndex::try_load(&config).unwrap();

        assert_eq!(loaded.metadata(), index.metadata());
        for i in 0..index.len() {
            let before: Vec<u32> = index.vector(i).unwrap().iter().map(|x| x.to_bits()).collect();
            let after: Vec<u32> = loaded.vector(i).unwrap().iter().map(|x| x.to_bits()).collect();
            assert_eq!(before, after);
        }
    }

    #[test]
    fn test_metadata_file_is_plain_json_records() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        sample().save(&config).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(config.metadata_path()).unwrap()).unwrap();
        let records = json.as_array().unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[1]["source"], "docs/1.txt");
        assert!(records[1]["page"].is_null());
        assert_eq!(records[2]["page"], 2);
        assert_eq!(records[0]["text"], "chunk 0");
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let loaded = VectorIndex::load(&config(&dir));
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimension(), 0);
    }

    #[test]
    fn test_load_detects_mismatched_artifacts() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        sample().save(&config).unwrap();

        let records: Vec<ChunkMeta> = (0..3).map(meta).collect();
        std::fs::write(config.metadata_path(), serde_json::to_vec(&records).unwrap()).unwrap();

        assert!(VectorIndex::try_load(&config).is_err());
        assert!(VectorIndex::load(&config).is_empty());
    }

    #[test]
    fn test_load_corrupt_vectors_is_empty() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        sample().save(&config).unwrap();
        std::fs::write(config.vectors_path(), b"garbage").unwrap();

        assert!(VectorIndex::load(&config).is_empty());
    }

    #[test]
    fn test_empty_index_roundtrip() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        VectorIndex::empty().save(&config).unwrap();

        let loaded = VectorIndex::try_load(&config).unwrap();
        assert!(loaded.is_empty());
    }
}
