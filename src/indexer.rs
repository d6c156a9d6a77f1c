//! Reindex pipeline
//!
//! Loads documents, chunks them, embeds the chunks and assembles a
//! fresh [`VectorIndex`]. The result is built entirely off to the side;
//! publishing and persisting it is the manager's job.

use crate::chunker::{Chunk, Chunker};
use crate::config::Config;
use crate::embedder::Embedder;
use crate::error::Result;
use crate::index::{ChunkMeta, VectorIndex};
use crate::loader::{DocumentLoader, FileFailure};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tracing::info;

/// Everything a reindex pass produced
#[derive(Debug)]
pub struct BuildOutput {
    /// The new index, not yet published
    pub index: VectorIndex,
    /// Files skipped because they could not be extracted
    pub failures: Vec<FileFailure>,
}

/// Builds indexes from a document tree
pub struct Indexer {
    loader: DocumentLoader,
    chunker: Chunker,
    show_progress: bool,
}

impl Indexer {
    /// Create a new indexer with the given configuration
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            loader: DocumentLoader::new(config.workers)?.excluding(config.index_dir.clone()),
            chunker: Chunker::new(config.chunk_tokens, config.chunk_overlap)?,
            show_progress: config.show_progress,
        })
    }

    /// The chunker used for every pass
    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Extract and chunk every document under `root`, in traversal order
    pub fn collect_chunks(&self, root: &Path) -> Result<(Vec<Chunk>, Vec<FileFailure>)> {
        let outcome = self.loader.load(root)?;

        let chunks: Vec<Chunk> = outcome
            .units
            .iter()
            .flat_map(|unit| self.chunker.chunk_unit(unit))
            .collect();

        info!(
            "Created {} chunks from {} text units ({} files failed)",
            chunks.len(),
            outcome.units.len(),
            outcome.failures.len()
        );

        Ok((chunks, outcome.failures))
    }

    /// Run the full pipeline; any embedding failure aborts the pass
    pub fn build(&self, root: &Path, embedder: &Embedder) -> Result<BuildOutput> {
        info!("Building fresh index for {:?}", root);

        let (chunks, failures) = self.collect_chunks(root)?;
        if chunks.is_empty() {
            info!("No chunks to index");
            return Ok(BuildOutput {
                index: VectorIndex::empty(),
                failures,
            });
        }

        let pb = self.progress_bar(chunks.len() as u64);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let embeddings = embedder.embed_batch_with_progress(&texts, |done, _total| {
            pb.set_position(done as u64);
        });
        let embeddings = match embeddings {
            Ok(embeddings) => embeddings,
            Err(e) => {
                pb.abandon_with_message("Embedding failed");
                return Err(e);
            }
        };
        pb.finish_with_message("Embeddings generated");

        let metadata: Vec<ChunkMeta> = chunks.into_iter().map(ChunkMeta::from).collect();
        let index = VectorIndex::from_parts(embeddings, metadata)?;

        info!(
            "Built index of {} chunks (dimension {})",
            index.len(),
            index.dimension()
        );

        Ok(BuildOutput { index, failures })
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} chunks embedded")
            .map(|s| s.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbeddingProvider;
    use crate::error::KbError;
    use tempfile::TempDir;

    struct Lengths;

    impl EmbeddingProvider for Lengths {
        fn name(&self) -> &str {
            "lengths"
        }

        fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(batch.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    struct Down;

    impl EmbeddingProvider for Down {
        fn name(&self) -> &str {
            "down"
        }

        fn embed(&self, _batch: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(KbError::Embedding("connection refused".into()))
        }
    }

    fn indexer(tokens: usize, overlap: usize) -> Indexer {
        let config = Config::default().with_chunking(tokens, overlap);
        Indexer::new(&config).unwrap()
    }

    #[test]
    fn test_chunks_follow_traversal_then_window_order() {
        let dir = TempDir::new().unwrap();
        fs_write(&dir, "a.txt", &"alpha ".repeat(30));
        fs_write(&dir, "b.txt", "beta");

        let indexer = indexer(10, 2);
        let (chunks, failures) = indexer.collect_chunks(dir.path()).unwrap();
        assert!(failures.is_empty());

        let a_count = chunks.iter().filter(|c| c.source.ends_with("a.txt")).count();
        assert!(a_count > 1);
        assert!(chunks[..a_count].iter().all(|c| c.source.ends_with("a.txt")));
        assert_eq!(chunks.last().unwrap().text, "beta");
    }

    #[test]
    fn test_build_aligns_vectors_and_metadata() {
        let dir = TempDir::new().unwrap();
        fs_write(&dir, "a.txt", "Replace the filter monthly.");
        fs_write(&dir, "b.txt", "Descale the kettle.");

        let embedder = Embedder::new(Box::new(Lengths)).with_batch_size(1);
        let output = indexer(500, 60).build(dir.path(), &embedder).unwrap();

        assert_eq!(output.index.len(), 2);
        assert_eq!(output.index.dimension(), 2);
        for (i, meta) in output.index.metadata().iter().enumerate() {
            assert_eq!(output.index.vector(i).unwrap()[0], meta.text.len() as f32);
        }
    }

    #[test]
    fn test_build_of_empty_tree_is_empty() {
        let dir = TempDir::new().unwrap();
        let embedder = Embedder::new(Box::new(Down));
        let output = indexer(500, 60).build(dir.path(), &embedder).unwrap();
        assert!(output.index.is_empty());
    }

    #[test]
    fn test_provider_failure_aborts_build() {
        let dir = TempDir::new().unwrap();
        fs_write(&dir, "a.txt", "Replace the filter monthly.");

        let embedder = Embedder::new(Box::new(Down)).with_retry(1, std::time::Duration::ZERO);
        let result = indexer(500, 60).build(dir.path(), &embedder);
        assert!(matches!(result, Err(KbError::Embedding(_))));
    }

    fn fs_write(dir: &TempDir, name: &str, text: &str) {
        std::fs::write(dir.path().join(name), text).unwrap();
    }
}
