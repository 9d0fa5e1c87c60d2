//! Context-augmented generation pipeline: a TF-IDF retrieval index over a
//! local knowledge directory feeding a streaming chat-completions client.
//!
//! Build-time flow: [`loader`] → [`index`] → persisted artifact. Query-time
//! flow: [`retrieval`] → [`context`] → [`completion`]. The [`engine::RagEngine`]
//! facade ties the index side together; the completion client is composed by
//! the embedding application.

pub mod chunker;
pub mod completion;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod index;
pub mod loader;
pub mod retrieval;

pub use chunker::{Chunk, ChunkPolicy};
pub use completion::{
    CompletionStream, CompletionTransport, Message, RetryPolicy, StreamEvent, StreamState,
    StreamingCompletionClient,
};
pub use config::{GenerationConfig, ProviderConfig, RetrievalConfig};
pub use context::{assemble_context, system_prompt, AssembledContext, Provenance};
pub use engine::{IndexStats, RagEngine};
pub use error::{CompletionError, ConfigError, IndexError, IngestError};
pub use index::{build_index, Index};
pub use loader::{load_corpus, Corpus, DocFormat, Document};
pub use retrieval::{search, SearchResult};
