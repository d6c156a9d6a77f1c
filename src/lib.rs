//! # kbindex - Local knowledge-base index
//!
//! Turns a directory of documents (PDF, DOCX, plain text) into a
//! searchable set of overlapping token-bounded chunks with vector
//! embeddings, persists the index to disk, notices when the documents
//! change, and answers nearest-neighbour text queries.
//!
//! ## Pipeline
//!
//! - **Loader**: walks the document root; one unit per PDF page, one per DOCX/text file
//! - **Chunker**: `cl100k_base` token windows with overlap
//! - **Embedder**: batched, retried calls to an embedding provider
//! - **Index**: embedding matrix + aligned metadata, exact cosine search
//! - **Digest**: path/size/mtime hash deciding when to rebuild
//! - **Manager**: startup load, change detection, `search` and `reindex`
//!
//! ## Example
//!
//! ```no_run
//! use kbindex::{Config, IndexManager};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let manager = IndexManager::open(config)?;
//!
//!     for result in manager.search("how often should I replace the filter", 5)? {
//!         println!("{} {:?} (score: {:.2})", result.source, result.page, result.score);
//!     }
//!
//!     let stats = manager.reindex()?;
//!     println!("{} chunks, dim {}", stats.chunk_count, stats.embedding_dimension);
//!     Ok(())
//! }
//! ```

pub mod chunker;
pub mod config;
pub mod digest;
pub mod embedder;
pub mod error;
pub mod format;
pub mod index;
pub mod indexer;
pub mod loader;
pub mod manager;
pub mod watcher;

// Re-export commonly used types
pub use chunker::{Chunk, Chunker};
pub use config::{Config, EmbeddingBackend, EmbeddingModel};
pub use digest::{docs_digest, should_reindex};
pub use embedder::{Embedder, EmbeddingProvider, FastEmbedProvider, OpenAiProvider};
pub use error::{KbError, Result};
pub use format::{format_results, format_results_json};
pub use index::{ChunkMeta, SearchResult, VectorIndex};
pub use indexer::{BuildOutput, Indexer};
pub use loader::{DocumentKind, DocumentLoader, LoadOutcome, RawUnit};
pub use manager::{IndexManager, IndexState, IndexStats, ReindexStats, SyncOutcome};
pub use watcher::IndexWatcher;
