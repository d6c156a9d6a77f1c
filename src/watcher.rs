//! File system watcher for live index updates
//!
//! Watches the document root and asks the manager to re-check the
//! digest after changes settle. Uses debouncing to avoid excessive
//! reindexing on rapid changes.

use crate::error::{KbError, Result};
use crate::manager::{IndexManager, SyncOutcome};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Quiet period before a burst of events is handled
const DEBOUNCE: Duration = Duration::from_millis(500);

/// File system watcher driving [`IndexManager::sync`]
pub struct IndexWatcher {
    manager: Arc<IndexManager>,
}

impl IndexWatcher {
    /// Create a new watcher for the given manager
    pub fn new(manager: Arc<IndexManager>) -> Self {
        Self { manager }
    }

    /// Start watching for file changes
    ///
    /// This blocks until the event channel closes.
    pub fn watch(&self) -> Result<()> {
        let config = self.manager.config();
        let root = config.docs_dir.canonicalize()?;
        let index_dir = config
            .index_dir
            .canonicalize()
            .unwrap_or_else(|_| config.index_dir.clone());
        info!("Watching {:?} for changes...", root);

        let (tx, rx) = channel();

        let mut debouncer =
            new_debouncer(DEBOUNCE, tx).map_err(|e| KbError::Watch(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| KbError::Watch(e.to_string()))?;

        self.process_events(rx, &index_dir);
        Ok(())
    }

    /// Process file system events from the watcher
    fn process_events(
        &self,
        rx: Receiver<std::result::Result<Vec<DebouncedEvent>, notify::Error>>,
        index_dir: &Path,
    ) {
        loop {
            match rx.recv() {
                Ok(Ok(events)) => {
                    let changed = relevant_paths(&events, index_dir);
                    if !changed.is_empty() {
                        self.handle_changes(&changed);
                    }
                }
                Ok(Err(e)) => {
                    warn!("Watch error: {:?}", e);
                }
                Err(e) => {
                    debug!("Watch channel closed: {:?}", e);
                    break;
                }
            }
        }
    }

    /// Handle detected file changes
    fn handle_changes(&self, changed: &[PathBuf]) {
        info!("Processing {} changed files...", changed.len());

        match self.manager.sync() {
            Ok(SyncOutcome::Reindexed(stats)) => println!(
                "  Reindexed: {} chunks, dim {}",
                stats.chunk_count, stats.embedding_dimension
            ),
            Ok(SyncOutcome::Unchanged) => debug!("Digest unchanged"),
            Err(e) => error!("Reindex after change failed: {}", e),
        }
    }
}

/// Changed paths under the document root, ignoring the index directory.
///
/// Every file counts toward the digest, so no extension filter applies here.
fn relevant_paths(events: &[DebouncedEvent], index_dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = events
        .iter()
        .map(|event| event.path.clone())
        .filter(|path| !path.starts_with(index_dir))
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_debouncer_mini::DebouncedEventKind;
    use tempfile::TempDir;

    fn event(path: PathBuf) -> DebouncedEvent {
        DebouncedEvent {
            path,
            kind: DebouncedEventKind::Any,
        }
    }

    #[test]
    fn test_relevant_paths_drops_index_dir_only() {
        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("docs");
        let index = dir.path().join("docs/.kb");
        std::fs::create_dir_all(&index).unwrap();
        std::fs::write(docs.join("faq.txt"), "x").unwrap();
        std::fs::write(docs.join("photo.png"), "x").unwrap();

        let events = vec![
            event(docs.join("faq.txt")),
            event(docs.join("faq.txt")),
            event(docs.join("photo.png")),
            event(index.join("kb_meta.json")),
            event(docs.join("deleted.pdf")),
        ];

        let paths = relevant_paths(&events, &index);
        assert_eq!(
            paths,
            vec![
                docs.join("deleted.pdf"),
                docs.join("faq.txt"),
                docs.join("photo.png")
            ]
        );
    }
}
