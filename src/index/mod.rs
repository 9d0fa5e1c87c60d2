pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunker::{chunk_text, Chunk, ChunkPolicy};
use crate::loader::{Corpus, DocFormat};

pub const FORMAT_VERSION: u32 = 1;

/// Metadata about one indexed source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocInfo {
    pub id: String,
    pub source: String,
    pub format: DocFormat,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
}

/// The complete retrieval index. Replaced wholly on rebuild, never patched
/// incrementally.
///
/// Vocabulary is lexicographically sorted; a term's position is its column.
/// Chunk vectors are sparse `(column, weight)` pairs sorted by column and
/// L2-normalized, so cosine similarity reduces to a sparse dot product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub version: u32,
    #[serde(rename = "builtAt")]
    pub built_at: DateTime<Utc>,
    pub vocabulary: Vec<String>,
    pub idf: Vec<f32>,
    pub vectors: Vec<Vec<(u32, f32)>>,
    pub chunks: Vec<Chunk>,
    pub documents: Vec<DocInfo>,
    /// Source path → SHA-256 hex of the file bytes at build time.
    #[serde(rename = "sourceHashes")]
    pub source_hashes: BTreeMap<String, String>,
}

impl Index {
    /// A valid index over zero documents.
    pub fn empty() -> Self {
        Self {
            version: FORMAT_VERSION,
            built_at: Utc::now(),
            vocabulary: Vec::new(),
            idf: Vec::new(),
            vectors: Vec::new(),
            chunks: Vec::new(),
            documents: Vec::new(),
            source_hashes: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Column for a term, if it is in the vocabulary.
    pub fn term_column(&self, term: &str) -> Option<u32> {
        self.vocabulary
            .binary_search_by(|t| t.as_str().cmp(term))
            .ok()
            .map(|i| i as u32)
    }
}

/// Lowercase and split on non-alphanumeric runs; terms shorter than 2
/// characters are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_string())
        .collect()
}

/// Build a TF-IDF index over a loaded corpus.
///
/// The whole path is deterministic (BTree collections, sorted inputs), so the
/// same corpus bytes always produce a bit-identical index apart from
/// `built_at`. The corpus hash map is recorded as-is: it covers skipped files
/// too, so a file that never parses does not force a rebuild on every
/// startup.
pub fn build_index(corpus: &Corpus, policy: &ChunkPolicy) -> Index {
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut doc_infos: Vec<DocInfo> = Vec::with_capacity(corpus.documents.len());

    for doc in &corpus.documents {
        let first_id = chunks.len();
        chunks.extend(chunk_text(&doc.text, &doc.id, &doc.source, policy, first_id));
        doc_infos.push(DocInfo {
            id: doc.id.clone(),
            source: doc.source.clone(),
            format: doc.format,
            size_bytes: doc.size_bytes,
        });
    }

    // Per-chunk term frequencies and corpus document frequencies
    let mut chunk_tfs: Vec<BTreeMap<String, usize>> = Vec::with_capacity(chunks.len());
    let mut df: BTreeMap<String, usize> = BTreeMap::new();
    for chunk in &chunks {
        let mut tf: BTreeMap<String, usize> = BTreeMap::new();
        for term in tokenize(&chunk.text) {
            *tf.entry(term).or_insert(0) += 1;
        }
        for term in tf.keys() {
            *df.entry(term.clone()).or_insert(0) += 1;
        }
        chunk_tfs.push(tf);
    }

    // BTreeMap keys iterate in lexicographic order, which fixes the columns
    let vocabulary: Vec<String> = df.keys().cloned().collect();
    let columns: BTreeMap<&str, u32> = vocabulary
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i as u32))
        .collect();

    // Smoothed idf: ln((N + 1) / (df + 1)) + 1
    let n = chunks.len() as f32;
    let idf: Vec<f32> = vocabulary
        .iter()
        .map(|t| ((n + 1.0) / (df[t] as f32 + 1.0)).ln() + 1.0)
        .collect();

    let vectors: Vec<Vec<(u32, f32)>> = chunk_tfs
        .iter()
        .map(|tf| {
            let mut vector: Vec<(u32, f32)> = tf
                .iter()
                .map(|(term, &count)| {
                    let col = columns[term.as_str()];
                    (col, count as f32 * idf[col as usize])
                })
                .collect();
            normalize(&mut vector);
            vector
        })
        .collect();

    Index {
        version: FORMAT_VERSION,
        built_at: Utc::now(),
        vocabulary,
        idf,
        vectors,
        chunks,
        documents: doc_infos,
        source_hashes: corpus.source_hashes.clone(),
    }
}

/// L2-normalize a sparse vector in place. Zero vectors are left as-is.
pub fn normalize(vector: &mut [(u32, f32)]) {
    let norm: f32 = vector.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
    if norm > 0.0 {
        for (_, w) in vector.iter_mut() {
            *w /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{DocFormat, Document};

    fn doc(source: &str, text: &str) -> Document {
        let hash = crate::loader::content_hash(text.as_bytes());
        Document {
            id: hash[..12].to_string(),
            source: source.to_string(),
            format: DocFormat::PlainText,
            text: text.to_string(),
            content_hash: hash,
            size_bytes: text.len() as u64,
        }
    }

    fn corpus(documents: Vec<Document>) -> Corpus {
        let source_hashes = documents
            .iter()
            .map(|d| (d.source.clone(), d.content_hash.clone()))
            .collect();
        Corpus {
            documents,
            source_hashes,
        }
    }

    #[test]
    fn test_tokenize_lowercases_and_splits() {
        let terms = tokenize("Hello, World! CI/CD pipeline-v2");
        assert_eq!(terms, vec!["hello", "world", "ci", "cd", "pipeline", "v2"]);
    }

    #[test]
    fn test_tokenize_drops_short_terms() {
        let terms = tokenize("a I to x7 b");
        assert_eq!(terms, vec!["to", "x7"]);
    }

    #[test]
    fn test_empty_corpus_builds_empty_index() {
        let index = build_index(&Corpus::default(), &ChunkPolicy::default());
        assert!(index.is_empty());
        assert!(index.vocabulary.is_empty());
        assert_eq!(index.version, FORMAT_VERSION);
    }

    #[test]
    fn test_vocabulary_sorted() {
        let docs = vec![doc("a.txt", "zebra apple mango apple")];
        let index = build_index(&corpus(docs), &ChunkPolicy::default());
        let mut sorted = index.vocabulary.clone();
        sorted.sort();
        assert_eq!(index.vocabulary, sorted);
        assert_eq!(index.vocabulary, vec!["apple", "mango", "zebra"]);
    }

    #[test]
    fn test_vectors_unit_normalized() {
        let docs = vec![
            doc("a.txt", "rust async runtime scheduling"),
            doc("b.txt", "python interpreter bytecode"),
        ];
        let index = build_index(&corpus(docs), &ChunkPolicy::default());
        for vector in &index.vectors {
            let norm: f32 = vector.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
        }
    }

    #[test]
    fn test_idf_favors_rare_terms() {
        let docs = vec![
            doc("a.txt", "common alpha"),
            doc("b.txt", "common beta"),
            doc("c.txt", "common gamma"),
        ];
        let index = build_index(&corpus(docs), &ChunkPolicy::default());
        let common = index.term_column("common").unwrap() as usize;
        let alpha = index.term_column("alpha").unwrap() as usize;
        assert!(index.idf[alpha] > index.idf[common]);
    }

    #[test]
    fn test_rebuild_is_bit_identical() {
        let docs = vec![
            doc("guide.md", "Deployment pipelines run integration tests before release."),
            doc("notes.txt", "The cache layer stores rendered fragments for reuse."),
        ];
        let corpus = corpus(docs);
        let policy = ChunkPolicy::default();
        let first = build_index(&corpus, &policy);
        let second = build_index(&corpus, &policy);

        assert_eq!(first.vocabulary, second.vocabulary);
        assert_eq!(first.idf, second.idf);
        assert_eq!(first.vectors, second.vectors);
        assert_eq!(first.source_hashes, second.source_hashes);
        assert_eq!(
            serde_json::to_string(&first.chunks).unwrap(),
            serde_json::to_string(&second.chunks).unwrap()
        );
    }

    #[test]
    fn test_source_hashes_recorded_per_file() {
        let docs = vec![doc("a.txt", "one"), doc("b.txt", "two")];
        let index = build_index(&corpus(docs), &ChunkPolicy::default());
        assert_eq!(index.source_hashes.len(), 2);
        assert_eq!(
            index.source_hashes["a.txt"],
            crate::loader::content_hash(b"one")
        );
    }

    #[test]
    fn test_term_column_lookup() {
        let docs = vec![doc("a.txt", "apple banana cherry")];
        let index = build_index(&corpus(docs), &ChunkPolicy::default());
        assert_eq!(index.term_column("banana"), Some(1));
        assert_eq!(index.term_column("durian"), None);
    }

    #[test]
    fn test_chunk_ids_unique_across_documents() {
        let long = "word ".repeat(400);
        let docs = vec![doc("a.txt", &long), doc("b.txt", &long)];
        let index = build_index(&corpus(docs), &ChunkPolicy::default());
        for (i, chunk) in index.chunks.iter().enumerate() {
            assert_eq!(chunk.id, i);
        }
    }
}
