//! Index lifecycle and the collaborator-facing API
//!
//! [`IndexManager`] owns the active index, decides at startup whether
//! the persisted one can be reused, and exposes `search` and `reindex`.
//!
//! Readers clone an `Arc` to the current [`VectorIndex`] under a short
//! read lock. A reindex builds its replacement without holding that lock
//! and only takes the write lock to swap the pointer, so a search always
//! sees a whole old index or a whole new one.

use crate::config::Config;
use crate::digest::{docs_digest, load_saved_digest, save_digest, should_reindex};
use crate::embedder::Embedder;
use crate::error::Result;
use crate::index::{SearchResult, VectorIndex};
use crate::indexer::Indexer;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{error, info, warn};

/// Where the active index stands relative to the document tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexState {
    /// No usable index has been loaded or built yet
    ColdStart,
    /// The index matches the last known document digest
    UpToDate,
    /// The documents changed since the index was built
    Stale,
}

/// Size of an index produced by a reindex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReindexStats {
    pub chunk_count: usize,
    pub embedding_dimension: usize,
}

/// What a [`IndexManager::sync`] pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The index was rebuilt
    Reindexed(ReindexStats),
    /// The index was kept as-is
    Unchanged,
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    /// Number of chunks
    pub chunks: usize,
    /// Embedding dimension
    pub dimension: usize,
    /// Number of distinct source files
    pub sources: usize,
    /// Lifecycle state
    pub state: IndexState,
}

/// Owns the active index and keeps it in step with the document tree
pub struct IndexManager {
    config: Config,
    indexer: Indexer,
    embedder: Embedder,
    active: RwLock<Arc<VectorIndex>>,
    state: Mutex<IndexState>,
    reindex_lock: Mutex<()>,
}

impl IndexManager {
    /// Open the index described by `config`, with the configured embedding backend
    pub fn open(config: Config) -> Result<Self> {
        let embedder = Embedder::from_config(&config)?;
        Self::with_embedder(config, embedder)
    }

    /// Open the index with an explicit embedder.
    ///
    /// Loads the persisted index and runs one [`sync`](Self::sync). A failed
    /// startup reindex is logged; the manager still opens with whatever
    /// index was loaded.
    pub fn with_embedder(config: Config, embedder: Embedder) -> Result<Self> {
        config.validate()?;
        let indexer = Indexer::new(&config)?;

        let loaded = VectorIndex::load(&config);
        let state = if loaded.is_empty() {
            IndexState::ColdStart
        } else {
            IndexState::UpToDate
        };

        let manager = Self {
            config,
            indexer,
            embedder,
            active: RwLock::new(Arc::new(loaded)),
            state: Mutex::new(state),
            reindex_lock: Mutex::new(()),
        };

        match manager.sync() {
            Ok(SyncOutcome::Reindexed(stats)) => info!(
                "Built index at startup with {} chunks, dim {}",
                stats.chunk_count, stats.embedding_dimension
            ),
            Ok(SyncOutcome::Unchanged) => info!("Loaded existing index, no document changes detected"),
            Err(e) => error!("Startup reindex failed: {}", e),
        }

        Ok(manager)
    }

    /// Compare the document tree against the saved digest and reindex if needed
    pub fn sync(&self) -> Result<SyncOutcome> {
        let has_index = !self.snapshot().is_empty();

        let current = match docs_digest(&self.config.docs_dir, &self.config.index_dir) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!("Digest failed, keeping the current index: {}", e);
                None
            }
        };
        let saved = load_saved_digest(&self.config.digest_path());

        if should_reindex(current.as_deref(), saved.as_deref(), has_index) {
            if has_index {
                info!("Detected document changes; reindexing");
                self.set_state(IndexState::Stale);
            }
            return self.reindex().map(SyncOutcome::Reindexed);
        }

        if let (Some(current), None) = (&current, &saved) {
            save_digest(&self.config.digest_path(), current)?;
        }
        Ok(SyncOutcome::Unchanged)
    }

    /// Rebuild the index from the document tree and publish it.
    ///
    /// If the build fails the previous index stays active. If only the
    /// write to disk fails, the new index is already active and the error
    /// is still returned.
    pub fn reindex(&self) -> Result<ReindexStats> {
        let _guard = self
            .reindex_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Taken before the scan so edits made during the build trigger another pass
        let digest = match docs_digest(&self.config.docs_dir, &self.config.index_dir) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!("Digest failed; it will not be recorded: {}", e);
                None
            }
        };

        let output = self.indexer.build(&self.config.docs_dir, &self.embedder)?;
        for failure in &output.failures {
            warn!("Skipped {:?}: {}", failure.path, failure.error);
        }

        let index = Arc::new(output.index);
        let stats = ReindexStats {
            chunk_count: index.len(),
            embedding_dimension: index.dimension(),
        };

        self.publish(Arc::clone(&index));
        self.set_state(IndexState::UpToDate);

        index.save(&self.config)?;
        if let Some(digest) = digest {
            save_digest(&self.config.digest_path(), &digest)?;
        }

        info!(
            "Reindexed {} chunks, dim {}",
            stats.chunk_count, stats.embedding_dimension
        );
        Ok(stats)
    }

    /// The `k` chunks most similar to `query`, best first.
    ///
    /// An empty index answers with no results without calling the embedder.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let index = self.snapshot();
        if index.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let query_embedding = self.embedder.embed_one(query)?;
        index.search(&query_embedding, k)
    }

    /// The currently published index
    pub fn snapshot(&self) -> Arc<VectorIndex> {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&active)
    }

    /// Current lifecycle state
    pub fn state(&self) -> IndexState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get index statistics
    pub fn stats(&self) -> IndexStats {
        let index = self.snapshot();
        let sources: HashSet<&str> = index.metadata().iter().map(|m| m.source.as_str()).collect();
        IndexStats {
            chunks: index.len(),
            dimension: index.dimension(),
            sources: sources.len(),
            state: self.state(),
        }
    }

    /// The configuration this manager was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn publish(&self, index: Arc<VectorIndex>) {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        *active = index;
    }

    fn set_state(&self, state: IndexState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}
