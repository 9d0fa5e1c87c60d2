use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::Serialize;
use tracing::debug;

use crate::index::{normalize, tokenize, Index};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub chunk_id: usize,
    pub doc_id: String,
    pub source: String,
    pub text: String,
    pub score: f32,
    /// 1-based position in the ranked output.
    pub rank: usize,
}

/// Vectorize a query against the index vocabulary: TF-IDF weights,
/// L2-normalized. Terms outside the vocabulary contribute nothing.
pub fn query_vector(index: &Index, query: &str) -> Vec<(u32, f32)> {
    let mut tf: std::collections::BTreeMap<u32, f32> = std::collections::BTreeMap::new();
    for term in tokenize(query) {
        if let Some(col) = index.term_column(&term) {
            *tf.entry(col).or_insert(0.0) += 1.0;
        }
    }
    let mut vector: Vec<(u32, f32)> = tf
        .into_iter()
        .map(|(col, count)| (col, count * index.idf[col as usize]))
        .collect();
    normalize(&mut vector);
    vector
}

/// Dot product of two sparse vectors sorted by column. Equals cosine
/// similarity when both are pre-normalized.
pub fn dot_similarity(a: &[(u32, f32)], b: &[(u32, f32)]) -> f32 {
    let mut score = 0.0;
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                score += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    score
}

/// Min-heap entry for top-K selection.
#[derive(Debug)]
struct HeapEntry {
    score: f32,
    chunk_id: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.chunk_id == other.chunk_id
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (smallest score on top)
        // Tiebreak by chunk_id (lower ID first = larger in reversed heap)
        match other.score.partial_cmp(&self.score) {
            Some(Ordering::Equal) | None => other.chunk_id.cmp(&self.chunk_id),
            Some(ord) => ord,
        }
    }
}

/// Rank the index's chunks against a query string, returning up to `top_k`
/// results scoring at least `min_score`, best first. Ties break toward the
/// lower chunk id. `top_k` larger than the corpus returns everything ranked;
/// a query with no known terms returns nothing.
pub fn search(index: &Index, query: &str, top_k: usize, min_score: f32) -> Vec<SearchResult> {
    if top_k == 0 || index.is_empty() {
        debug!(top_k, "search against empty index or zero k");
        return Vec::new();
    }

    let qv = query_vector(index, query);
    if qv.is_empty() {
        debug!(query, "query shares no terms with the vocabulary");
        return Vec::new();
    }

    let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(top_k + 1);
    for (chunk_id, vector) in index.vectors.iter().enumerate() {
        let score = dot_similarity(&qv, vector);
        // Filter non-finite scores (NaN, Inf)
        if !score.is_finite() || score < min_score {
            continue;
        }
        heap.push(HeapEntry { score, chunk_id });
        if heap.len() > top_k {
            heap.pop();
        }
    }

    let mut ranked: Vec<HeapEntry> = heap.into_iter().collect();
    ranked.sort_by(|a, b| match b.score.partial_cmp(&a.score) {
        Some(Ordering::Equal) | None => a.chunk_id.cmp(&b.chunk_id),
        Some(ord) => ord,
    });

    ranked
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let chunk = &index.chunks[entry.chunk_id];
            SearchResult {
                chunk_id: entry.chunk_id,
                doc_id: chunk.doc_id.clone(),
                source: chunk.source.clone(),
                text: chunk.text.clone(),
                score: entry.score,
                rank: i + 1,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkPolicy;
    use crate::index::build_index;
    use crate::loader::{Corpus, DocFormat, Document};

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

    fn test_index() -> Index {
        let docs = vec![
            doc(
                "cloud_build.md",
                "Cloud Build runs the CI/CD pipeline. Every deployment goes through \
                 automated build, test, and deploy stages before release.",
            ),
            doc(
                "persona.md",
                "The assistant persona is friendly and concise, answering questions \
                 about the product in plain language.",
            ),
            doc(
                "cache.md",
                "The cache layer stores rendered fragments keyed by request path.",
            ),
        ];
        build_index(&corpus(docs), &ChunkPolicy::default())
    }

    #[test]
    fn test_dot_similarity_sparse_merge() {
        let a = vec![(0u32, 0.5f32), (2, 0.5), (5, 0.7)];
        let b = vec![(1u32, 1.0f32), (2, 0.5), (5, 0.5)];
        let expected = 0.5 * 0.5 + 0.7 * 0.5;
        assert!((dot_similarity(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_self_similarity_is_one() {
        let index = test_index();
        let chunk = &index.chunks[0];
        let results = search(&index, &chunk.text, 1, 0.0);
        assert_eq!(results[0].chunk_id, chunk.id);
        assert!(
            (results[0].score - 1.0).abs() < 1e-4,
            "self-similarity was {}",
            results[0].score
        );
    }

    #[test]
    fn test_cicd_query_ranks_build_doc_first() {
        let index = test_index();
        let results = search(&index, "CI/CD deployment", 3, 0.0);
        assert!(!results.is_empty());
        assert_eq!(results[0].source, "cloud_build.md");
        let persona_rank = results.iter().position(|r| r.source == "persona.md");
        if let Some(p) = persona_rank {
            assert!(p > 0);
        }
    }

    #[test]
    fn test_k_larger_than_corpus_returns_all() {
        let index = test_index();
        let results = search(&index, "the", 100, 0.0);
        // "the" appears in every document, so every chunk comes back ranked
        assert_eq!(results.len(), index.chunks.len());
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.rank, i + 1);
        }
    }

    #[test]
    fn test_empty_index_returns_empty() {
        let index = Index::empty();
        let results = search(&index, "anything at all", 5, 0.0);
        assert!(results.is_empty());
    }

    #[test]
    fn test_unknown_terms_return_empty() {
        let index = test_index();
        let results = search(&index, "xylophone quasar", 5, 0.0);
        assert!(results.is_empty());
    }

    #[test]
    fn test_min_score_filters() {
        let index = test_index();
        let all = search(&index, "cache fragments", 10, 0.0);
        let filtered = search(&index, "cache fragments", 10, 0.9);
        assert!(filtered.len() <= all.len());
        for r in &filtered {
            assert!(r.score >= 0.9);
        }
    }

    #[test]
    fn test_scores_descending() {
        let index = test_index();
        let results = search(&index, "build test deploy cache", 10, 0.0);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_tie_break_prefers_lower_chunk_id() {
        let docs = vec![doc("a.txt", "identical words"), doc("b.txt", "identical words")];
        let index = build_index(&corpus(docs), &ChunkPolicy::default());
        let results = search(&index, "identical words", 2, 0.0);
        assert_eq!(results.len(), 2);
        assert!(results[0].chunk_id < results[1].chunk_id);
    }
}
