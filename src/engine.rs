use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::chunker::ChunkPolicy;
use crate::config::RetrievalConfig;
use crate::context::{assemble_context, AssembledContext};
use crate::error::IndexError;
use crate::index::store::{load_artifact, verify_fresh, write_artifact};
use crate::index::{build_index, DocInfo, Index};
use crate::loader::load_corpus;
use crate::retrieval::{search, SearchResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
    pub terms: usize,
    pub built_at: DateTime<Utc>,
}

/// Ties the pipeline together: owns the knowledge directory and the current
/// index. Reads snapshot the index behind a briefly-held lock; a rebuild
/// produces a fresh index and swaps the pointer, so queries are never blocked
/// by an in-progress rebuild.
pub struct RagEngine {
    knowledge_dir: PathBuf,
    policy: ChunkPolicy,
    retrieval: RetrievalConfig,
    index: RwLock<Arc<Index>>,
}

impl RagEngine {
    pub fn new(knowledge_dir: impl Into<PathBuf>, retrieval: RetrievalConfig) -> Self {
        Self {
            knowledge_dir: knowledge_dir.into(),
            policy: ChunkPolicy::default(),
            retrieval,
            index: RwLock::new(Arc::new(Index::empty())),
        }
    }

    pub fn with_policy(mut self, policy: ChunkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Load the persisted index if it is still fresh, otherwise rebuild.
    /// `force_rebuild` skips the artifact entirely.
    pub fn initialize(&self, force_rebuild: bool) -> Result<(), IndexError> {
        if force_rebuild {
            return self.rebuild();
        }

        match load_artifact(&self.knowledge_dir) {
            Ok(Some(index)) => match verify_fresh(&index, &self.knowledge_dir) {
                Ok(()) => {
                    info!(
                        chunks = index.chunks.len(),
                        documents = index.documents.len(),
                        "reusing persisted index"
                    );
                    self.swap(index);
                    Ok(())
                }
                Err(IndexError::Stale) => {
                    info!("persisted index is stale, rebuilding");
                    self.rebuild()
                }
                Err(e) => Err(e),
            },
            Ok(None) => {
                info!("no persisted index, building");
                self.rebuild()
            }
            Err(e) => {
                warn!(error = %e, "persisted index unusable, rebuilding");
                self.rebuild()
            }
        }
    }

    /// Batch rebuild: scan → load → chunk → vectorize → persist → swap. On
    /// failure the last good index keeps serving and the error is returned.
    pub fn rebuild(&self) -> Result<(), IndexError> {
        let corpus = load_corpus(&self.knowledge_dir);
        let index = build_index(&corpus, &self.policy);
        write_artifact(&self.knowledge_dir, &index)?;
        info!(
            documents = index.documents.len(),
            chunks = index.chunks.len(),
            terms = index.vocabulary.len(),
            "index rebuilt"
        );
        self.swap(index);
        Ok(())
    }

    fn swap(&self, index: Index) {
        let mut guard = self.index.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(index);
    }

    /// Cheap clone of the current index pointer.
    pub fn snapshot(&self) -> Arc<Index> {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn search(&self, query: &str, top_k: usize) -> Vec<SearchResult> {
        let index = self.snapshot();
        search(&index, query, top_k, self.retrieval.min_score)
    }

    /// Search with the configured k and assemble the results under the
    /// configured context budget.
    pub fn context_for_query(&self, query: &str) -> AssembledContext {
        let results = self.search(query, self.retrieval.top_k);
        assemble_context(&results, self.retrieval.max_context_bytes)
    }

    pub fn stats(&self) -> IndexStats {
        let index = self.snapshot();
        IndexStats {
            documents: index.documents.len(),
            chunks: index.chunks.len(),
            terms: index.vocabulary.len(),
            built_at: index.built_at,
        }
    }

    /// Indexed files, sorted by path at build time.
    pub fn documents(&self) -> Vec<DocInfo> {
        self.snapshot().documents.clone()
    }
}
