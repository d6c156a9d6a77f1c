//! Document discovery and text extraction
//!
//! Walks the document root, dispatches each supported file to an
//! extractor and yields raw text units: one per non-empty PDF page,
//! one per DOCX or plain-text file. A file that fails to extract is
//! reported as a [`FileFailure`] and the scan carries on.

use crate::config::{should_index_file, DOCX_EXTENSIONS, PDF_EXTENSIONS, TEXT_EXTENSIONS};
use crate::digest::nested_dir;
use crate::error::{KbError, Result};
use lopdf::Document;
use quick_xml::events::Event;
use quick_xml::Reader;
use rayon::prelude::*;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A unit of raw text taken from one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawUnit {
    /// Extracted text
    pub text: String,
    /// Path of the originating file
    pub source: String,
    /// 1-indexed page number, only for paginated sources
    pub page: Option<u32>,
}

/// Supported document types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Text,
}

impl DocumentKind {
    /// Pick the extractor for a path by its extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        if PDF_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Pdf)
        } else if DOCX_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Docx)
        } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Text)
        } else {
            None
        }
    }

    /// Extract `(text, page)` pairs from the raw bytes of a file.
    ///
    /// Errors are returned as plain messages; the caller attaches the path.
    pub fn extract(self, bytes: &[u8]) -> std::result::Result<Vec<(String, Option<u32>)>, String> {
        match self {
            Self::Pdf => extract_pdf_pages(bytes),
            Self::Docx => extract_docx_body(bytes).map(|text| vec![(text, None)]),
            Self::Text => Ok(vec![(String::from_utf8_lossy(bytes).into_owned(), None)]),
        }
    }
}

/// A file that could not be turned into text
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: KbError,
}

/// Result of scanning a document root
#[derive(Debug, Default)]
pub struct LoadOutcome {
    /// Extracted units in traversal order
    pub units: Vec<RawUnit>,
    /// Files that were skipped because extraction failed
    pub failures: Vec<FileFailure>,
}

/// Scans a document tree and extracts text units
pub struct DocumentLoader {
    pool: rayon::ThreadPool,
    excluded: Option<PathBuf>,
}

impl DocumentLoader {
    /// Create a loader that extracts files on `workers` threads
    pub fn new(workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .map_err(|e| KbError::Config(format!("Cannot start extraction pool: {e}")))?;
        Ok(Self {
            pool,
            excluded: None,
        })
    }

    /// Never descend into `dir` (the index directory) when it sits under the root
    pub fn excluding(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded = Some(dir.into());
        self
    }

    /// Extract every supported file under `root`, recursing into subdirectories.
    ///
    /// Fails only if the root itself is not a readable directory.
    pub fn load(&self, root: &Path) -> Result<LoadOutcome> {
        if !root.is_dir() {
            return Err(KbError::InvalidPath(format!(
                "document root {} is not a directory",
                root.display()
            )));
        }

        let mut outcome = LoadOutcome::default();
        let mut paths = Vec::new();

        let skip = self.excluded.as_deref().and_then(|dir| nested_dir(root, dir));
        let walk = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| Some(entry.path()) != skip.as_deref());

        for entry in walk {
            match entry {
                Ok(entry) if entry.file_type().is_file() && should_index_file(entry.path()) => {
                    paths.push(entry.into_path());
                }
                Ok(entry) => debug!("Skipping {:?}", entry.path()),
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                    warn!("Failed to walk {:?}: {}", path, source);
                    outcome.failures.push(FileFailure {
                        error: KbError::FileAccess {
                            path: path.clone(),
                            source,
                        },
                        path,
                    });
                }
            }
        }

        info!("Found {} supported documents under {:?}", paths.len(), root);

        // Collecting an indexed parallel iterator keeps traversal order
        let extracted: Vec<(PathBuf, Result<Vec<RawUnit>>)> = self.pool.install(|| {
            paths
                .into_par_iter()
                .map(|path| {
                    let units = load_file(&path);
                    (path, units)
                })
                .collect()
        });

        for (path, result) in extracted {
            match result {
                Ok(units) => {
                    debug!("Extracted {} units from {:?}", units.len(), path);
                    outcome.units.extend(units);
                }
                Err(error) => {
                    warn!("Failed to load {:?}: {}", path, error);
                    outcome.failures.push(FileFailure { path, error });
                }
            }
        }

        Ok(outcome)
    }
}

/// Read and extract a single file
pub fn load_file(path: &Path) -> Result<Vec<RawUnit>> {
    let kind = DocumentKind::from_path(path)
        .ok_or_else(|| KbError::InvalidPath(format!("unsupported file type: {}", path.display())))?;

    let bytes = std::fs::read(path).map_err(|source| KbError::FileAccess {
        path: path.to_path_buf(),
        source,
    })?;

    let source = path.to_string_lossy().into_owned();
    let units = kind
        .extract(&bytes)
        .map_err(|message| KbError::Parse {
            path: path.to_path_buf(),
            message,
        })?
        .into_iter()
        .map(|(text, page)| RawUnit {
            text,
            source: source.clone(),
            page,
        })
        .collect();

    Ok(units)
}

/// One unit per page with non-blank text
fn extract_pdf_pages(bytes: &[u8]) -> std::result::Result<Vec<(String, Option<u32>)>, String> {
    let doc = Document::load_mem(bytes).map_err(|e| format!("invalid PDF: {e}"))?;

    let mut pages = Vec::new();
    for page_number in doc.get_pages().keys() {
        let text = doc
            .extract_text(&[*page_number])
            .map_err(|e| format!("page {page_number}: {e}"))?;
        if text.trim().is_empty() {
            debug!("Skipping blank PDF page {}", page_number);
            continue;
        }
        pages.push((text, Some(*page_number)));
    }
    Ok(pages)
}

/// The whole body of `word/document.xml` as one string
fn extract_docx_body(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("invalid DOCX: {e}"))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| format!("missing document body: {e}"))?
        .read_to_string(&mut xml)
        .map_err(|e| format!("unreadable document body: {e}"))?;

    docx_xml_to_text(&xml).map_err(|e| format!("malformed document body: {e}"))
}

/// Collect `<w:t>` runs, turning paragraphs, breaks and tabs into whitespace
fn docx_xml_to_text(xml: &str) -> std::result::Result<String, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_text = true,
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => out.push('\t'),
                b"w:br" | b"w:cr" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => out.push_str(&t.unescape()?),
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}


#[cfg(test)]
mod tests {
    use super::fixtures::{write_docx, write_pdf};
    use super::*;
    use tempfile::TempDir;

    fn loader() -> DocumentLoader {
        DocumentLoader::new(2).unwrap()
    }

    #[test]
    fn test_kind_from_path() {
        assert_eq!(DocumentKind::from_path(Path::new("a.PDF")), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_path(Path::new("a.docx")), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_path(Path::new("a.txt")), Some(DocumentKind::Text));
        assert_eq!(DocumentKind::from_path(Path::new("a.xlsx")), None);
        assert_eq!(DocumentKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn test_text_is_read_permissively() {
        let units = DocumentKind::Text
            .extract(b"caf\xff filter\n")
            .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].0, "caf\u{FFFD} filter\n");
        assert_eq!(units[0].1, None);
    }

    #[test]
    fn test_docx_body_is_single_unit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("warranty.docx");
        write_docx(&path, &["Coverage lasts one year.", "Keep your receipt &amp; box."]);

        let units = load_file(&path).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].page, None);
        assert_eq!(
            units[0].text,
            "Coverage lasts one year.\nKeep your receipt & box.\n"
        );
    }

    #[test]
    fn test_pdf_pages_skip_blank() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manual.pdf");
        write_pdf(&path, &[Some("Replace the filter monthly."), None, Some("Descale yearly.")]);

        let units = load_file(&path).unwrap();
        let pages: Vec<Option<u32>> = units.iter().map(|u| u.page).collect();
        assert_eq!(pages, vec![Some(1), Some(3)]);
        assert!(units[0].text.contains("Replace the filter monthly."));
        assert!(units[1].text.contains("Descale yearly."));
        assert_eq!(units[0].source, path.to_string_lossy());
    }

    #[test]
    fn test_load_recurses_in_sorted_order() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        std::fs::write(dir.path().join("b/nested/deep.txt"), "deep").unwrap();
        std::fs::write(dir.path().join("a.txt"), "first").unwrap();
        std::fs::write(dir.path().join("c.txt"), "last").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();

        let outcome = loader().load(dir.path()).unwrap();
        let texts: Vec<&str> = outcome.units.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "deep", "last"]);
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn test_load_skips_index_dir_under_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".kb")).unwrap();
        std::fs::write(dir.path().join(".kb/docs_digest.txt"), "abc123").unwrap();
        std::fs::write(dir.path().join("faq.txt"), "Hold the reset button.").unwrap();

        let outcome = loader()
            .excluding(dir.path().join(".kb"))
            .load(dir.path())
            .unwrap();
        assert_eq!(outcome.units.len(), 1);
        assert_eq!(outcome.units[0].text, "Hold the reset button.");
    }

    #[test]
    fn test_corrupt_file_does_not_abort_scan() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.pdf"), b"this is not a pdf").unwrap();
        std::fs::write(dir.path().join("broken.docx"), b"nor a zip").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "still indexed").unwrap();

        let outcome = loader().load(dir.path()).unwrap();
        assert_eq!(outcome.units.len(), 1);
        assert_eq!(outcome.units[0].text, "still indexed");
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome
            .failures
            .iter()
            .all(|f| matches!(f.error, KbError::Parse { .. })));
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = loader().load(&dir.path().join("nope"));
        assert!(matches!(result, Err(KbError::InvalidPath(_))));
    }
}
