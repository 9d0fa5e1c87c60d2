use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::index::store::ARTIFACT_DIR;

/// Glob patterns matched when scanning a knowledge directory.
pub const SOURCE_PATTERNS: &str = "*.txt,*.md,*.json,*.pdf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocFormat {
    PlainText,
    Markdown,
    Json,
    Pdf,
}

impl DocFormat {
    pub fn from_extension(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("md") | Some("markdown") => Self::Markdown,
            Some("json") => Self::Json,
            Some("pdf") => Self::Pdf,
            _ => Self::PlainText,
        }
    }
}

/// A loaded source file: raw bytes resolved to indexable text. Immutable once
/// loaded.
#[derive(Debug, Clone)]
pub struct Document {
    /// First 12 hex chars of the SHA-256 of the file bytes.
    pub id: String,
    /// Path relative to the knowledge directory, used for display and citation.
    pub source: String,
    pub format: DocFormat,
    pub text: String,
    /// Full SHA-256 hex of the file bytes, for staleness detection.
    pub content_hash: String,
    pub size_bytes: u64,
}

/// SHA-256 of raw bytes as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Scan a knowledge directory for source files. Paths are returned relative to
/// the directory, sorted and deduplicated; the index artifact directory is
/// excluded.
pub fn scan_sources(knowledge_dir: &Path) -> Vec<String> {
    let patterns: Vec<&str> = SOURCE_PATTERNS.split(',').map(|s| s.trim()).collect();
    let mut files = Vec::new();

    for pattern in patterns {
        let glob_pattern = format!("{}/**/{}", knowledge_dir.display(), pattern);
        if let Ok(entries) = glob::glob(&glob_pattern) {
            for entry in entries.flatten() {
                if entry.is_file() {
                    let entry_str = entry.to_string_lossy();
                    if entry_str.contains(ARTIFACT_DIR) {
                        continue;
                    }
                    if let Ok(rel) = entry.strip_prefix(knowledge_dir) {
                        files.push(rel.to_string_lossy().to_string());
                    }
                }
            }
        }
    }

    files.sort();
    files.dedup();
    files
}

/// Everything a build needs from one scan of the knowledge directory.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub documents: Vec<Document>,
    /// Hash of every readable scanned file, including files whose text
    /// extraction failed. Staleness detection compares against this map, so
    /// a permanently unparsable file must not register as a corpus change on
    /// every startup.
    pub source_hashes: BTreeMap<String, String>,
}

/// Load a single source file into a `Document`.
pub fn load_document(knowledge_dir: &Path, relative: &str) -> Result<Document, IngestError> {
    let path = knowledge_dir.join(relative);
    let bytes = std::fs::read(&path).map_err(|e| IngestError::Read {
        path: path.clone(),
        source: e,
    })?;
    document_from_bytes(&path, relative, &bytes)
}

fn document_from_bytes(path: &Path, relative: &str, bytes: &[u8]) -> Result<Document, IngestError> {
    let format = DocFormat::from_extension(path);
    let text = extract_text(path, bytes, format)?;
    if text.trim().is_empty() {
        return Err(IngestError::Empty {
            path: path.to_path_buf(),
        });
    }

    let hash = content_hash(bytes);
    debug!(source = relative, ?format, bytes = bytes.len(), "loaded document");

    Ok(Document {
        id: hash[..12].to_string(),
        source: relative.to_string(),
        format,
        text,
        content_hash: hash,
        size_bytes: bytes.len() as u64,
    })
}

/// Load every scanned source under `knowledge_dir`. Files that fail to load
/// are skipped with a warning; one bad file never aborts the batch. Readable
/// files are hashed whether or not extraction succeeds.
pub fn load_corpus(knowledge_dir: &Path) -> Corpus {
    let sources = scan_sources(knowledge_dir);
    let mut corpus = Corpus::default();

    for relative in &sources {
        let path = knowledge_dir.join(relative);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(source = relative.as_str(), error = %e, "skipping unreadable source file");
                continue;
            }
        };
        corpus
            .source_hashes
            .insert(relative.clone(), content_hash(&bytes));

        match document_from_bytes(&path, relative, &bytes) {
            Ok(doc) => corpus.documents.push(doc),
            Err(e) => {
                warn!(source = relative.as_str(), error = %e, "skipping source file");
            }
        }
    }

    info!(
        scanned = sources.len(),
        loaded = corpus.documents.len(),
        "corpus loaded"
    );
    corpus
}

fn extract_text(path: &Path, bytes: &[u8], format: DocFormat) -> Result<String, IngestError> {
    match format {
        DocFormat::PlainText | DocFormat::Markdown => {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
        DocFormat::Json => {
            let value: serde_json::Value =
                serde_json::from_slice(bytes).map_err(|e| IngestError::Json {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            let mut lines = Vec::new();
            flatten_json(&value, "", &mut lines);
            Ok(lines.join("\n"))
        }
        DocFormat::Pdf => extract_pdf_text(path, bytes),
    }
}

/// Flatten a JSON value into "path: value" text lines so nested fields become
/// searchable terms.
fn flatten_json(value: &serde_json::Value, prefix: &str, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let child = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_json(val, &child, out);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, val) in items.iter().enumerate() {
                let child = if prefix.is_empty() {
                    format!("[{i}]")
                } else {
                    format!("{prefix}[{i}]")
                };
                flatten_json(val, &child, out);
            }
        }
        serde_json::Value::Null => {}
        other => {
            let rendered = match other {
                serde_json::Value::String(s) => s.clone(),
                v => v.to_string(),
            };
            if prefix.is_empty() {
                out.push(rendered);
            } else {
                out.push(format!("{prefix}: {rendered}"));
            }
        }
    }
}

/// Extract the text layer of a PDF via poppler's `pdftotext`. A missing binary
/// degrades like any other unreadable file.
fn extract_pdf_text(path: &Path, data: &[u8]) -> Result<String, IngestError> {
    use std::process::Command;

    if !data.starts_with(b"%PDF") {
        return Err(IngestError::Pdf {
            path: path.to_path_buf(),
            reason: "missing %PDF header".to_string(),
        });
    }

    let temp_file = std::env::temp_dir().join(format!("ragkit-{}.pdf", uuid::Uuid::new_v4()));
    std::fs::write(&temp_file, data).map_err(|e| IngestError::Pdf {
        path: path.to_path_buf(),
        reason: format!("failed to write temp file: {e}"),
    })?;

    let output = Command::new("pdftotext")
        .arg("-layout")
        .arg("-enc")
        .arg("UTF-8")
        .arg(&temp_file)
        .arg("-")
        .output();
    let _ = std::fs::remove_file(&temp_file);

    match output {
        Ok(output) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => Err(IngestError::Pdf {
            path: path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Err(e) => Err(IngestError::Pdf {
            path: path.to_path_buf(),
            reason: format!("pdftotext not runnable: {e} (is poppler installed?)"),
        }),
    }
}
