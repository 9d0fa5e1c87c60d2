use std::path::PathBuf;
use thiserror::Error;

/// Per-file ingestion failure. Non-fatal: the loader logs it and moves on to
/// the next file.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path} as JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("PDF text extraction failed for {path}: {reason}")]
    Pdf { path: PathBuf, reason: String },
    #[error("{path} produced no indexable text")]
    Empty { path: PathBuf },
}

/// Problems with the persisted index artifact. All of these force a full
/// rebuild; a partially-loaded index is never left in place.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Index artifact corrupt: {0}")]
    Corrupt(String),
    #[error("Index format version {found} is not supported (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("Index is stale: source files changed since it was built")]
    Stale,
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        IndexError::Corrupt(e.to_string())
    }
}

/// Configuration validation failure, reported before any work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("top_k must be at least 1")]
    TopK,
    #[error("temperature must be within 0.0..=2.0 (got {0})")]
    Temperature(f64),
    #[error("max_tokens must be at least 1")]
    MaxTokens,
    #[error("model id must not be empty")]
    EmptyModel,
    #[error("api key must not be empty")]
    EmptyApiKey,
    #[error("max_context_bytes must be at least 1")]
    ContextBudget,
}

/// Completion stream failure. Variants map onto retry policy: `Connect` and
/// `Transient` are retryable during the connect phase, everything else is
/// surfaced immediately.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompletionError {
    #[error("failed to connect to completion provider: {0}")]
    Connect(String),
    #[error("authentication rejected by completion provider: {0}")]
    Auth(String),
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("quota or rate limit exceeded: {0}")]
    Quota(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("completion cancelled")]
    Cancelled,
}

impl CompletionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Transient(_))
    }
}
