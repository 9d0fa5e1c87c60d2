use serde::Serialize;

use crate::chunker::word_boundary;
use crate::retrieval::SearchResult;

/// Returned when no results clear the relevance floor.
pub const EMPTY_CONTEXT: &str = "No relevant context found in the knowledge base.";

/// Where each piece of the assembled context came from, for citation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub doc_id: String,
    pub source: String,
    pub chunk_id: usize,
    pub score: f32,
    /// Bytes of chunk text actually included (may be less than the full chunk
    /// when the budget cut it short).
    pub included_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub text: String,
    pub provenance: Vec<Provenance>,
}

/// Assemble ranked results into a cited context string of at most
/// `max_bytes`. Blocks are emitted in rank order; the block that would
/// overflow the budget is truncated at a word boundary, and assembly stops
/// there. Empty input yields the fixed sentinel and no provenance.
pub fn assemble_context(results: &[SearchResult], max_bytes: usize) -> AssembledContext {
    if results.is_empty() {
        // The sentinel is subject to the budget like everything else
        let text = if EMPTY_CONTEXT.len() <= max_bytes {
            EMPTY_CONTEXT.to_string()
        } else {
            String::new()
        };
        return AssembledContext {
            text,
            provenance: Vec::new(),
        };
    }

    let mut text = String::new();
    let mut provenance = Vec::new();

    for result in results {
        let header = format!("--- {} (score: {:.2}) ---\n", result.source, result.score);
        let block_len = header.len() + result.text.len() + 2;

        if text.len() + block_len <= max_bytes {
            text.push_str(&header);
            text.push_str(&result.text);
            text.push_str("\n\n");
            provenance.push(Provenance {
                doc_id: result.doc_id.clone(),
                source: result.source.clone(),
                chunk_id: result.chunk_id,
                score: result.score,
                included_bytes: result.text.len(),
            });
            continue;
        }

        // Partial block: fit what we can, cut at a word boundary, stop
        let remaining = max_bytes.saturating_sub(text.len());
        if remaining > header.len() + 1 {
            let room = remaining - header.len() - 1;
            let cut = word_boundary(&result.text, room.min(result.text.len()));
            let included = result.text[..cut].trim_end();
            if !included.is_empty() {
                text.push_str(&header);
                text.push_str(included);
                text.push('\n');
                provenance.push(Provenance {
                    doc_id: result.doc_id.clone(),
                    source: result.source.clone(),
                    chunk_id: result.chunk_id,
                    score: result.score,
                    included_bytes: included.len(),
                });
            }
        }
        break;
    }

    AssembledContext { text, provenance }
}

/// Build the system prompt that carries the assembled context to the model.
pub fn system_prompt(context: &str) -> String {
    format!(
        "You are a helpful assistant. Answer using the provided context when it \
         is relevant; say so when it is not.\n\nContext:\n{context}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(chunk_id: usize, source: &str, score: f32, text: &str) -> SearchResult {
        SearchResult {
            chunk_id,
            doc_id: format!("doc{chunk_id}"),
            source: source.to_string(),
            text: text.to_string(),
            score,
            rank: chunk_id + 1,
        }
    }

    #[test]
    fn test_empty_results_sentinel() {
        let assembled = assemble_context(&[], 8000);
        assert_eq!(assembled.text, EMPTY_CONTEXT);
        assert!(assembled.provenance.is_empty());
    }

    #[test]
    fn test_sentinel_respects_budget() {
        let assembled = assemble_context(&[], 10);
        assert!(assembled.text.len() <= 10);
        assert!(assembled.text.is_empty());
        assert!(assembled.provenance.is_empty());
    }

    #[test]
    fn test_blocks_in_rank_order_with_citations() {
        let results = vec![
            result(0, "auth.md", 0.92, "JWT tokens with 15-minute expiry"),
            result(1, "cache.md", 0.85, "Fragments cached by request path"),
        ];
        let assembled = assemble_context(&results, 8000);
        let auth_pos = assembled.text.find("auth.md").unwrap();
        let cache_pos = assembled.text.find("cache.md").unwrap();
        assert!(auth_pos < cache_pos);
        assert!(assembled.text.contains("--- auth.md (score: 0.92) ---"));
        assert!(assembled.text.contains("JWT tokens"));
        assert_eq!(assembled.provenance.len(), 2);
        assert_eq!(assembled.provenance[0].chunk_id, 0);
        assert_eq!(assembled.provenance[0].included_bytes, results[0].text.len());
    }

    #[test]
    fn test_budget_never_exceeded() {
        let long = "alpha beta gamma delta epsilon ".repeat(50);
        let results = vec![
            result(0, "a.md", 0.9, &long),
            result(1, "b.md", 0.8, &long),
            result(2, "c.md", 0.7, &long),
        ];
        for budget in [50usize, 200, 500, 1000, 2500] {
            let assembled = assemble_context(&results, budget);
            assert!(
                assembled.text.len() <= budget,
                "assembled {} bytes for budget {budget}",
                assembled.text.len()
            );
        }
    }

    #[test]
    fn test_final_chunk_truncated_at_word_boundary() {
        let results = vec![result(0, "a.md", 0.9, &"word ".repeat(100))];
        let assembled = assemble_context(&results, 120);
        assert!(assembled.text.len() <= 120);
        assert_eq!(assembled.provenance.len(), 1);
        assert!(assembled.provenance[0].included_bytes < 500);
        // Cut lands between words, never inside one
        assert!(assembled.text.trim_end().ends_with("word"));
    }

    #[test]
    fn test_truncation_stops_assembly() {
        let long = "one two three four five ".repeat(40);
        let results = vec![
            result(0, "a.md", 0.9, &long),
            result(1, "b.md", 0.8, "should never appear"),
        ];
        let assembled = assemble_context(&results, long.len() / 2);
        assert!(!assembled.text.contains("b.md"));
        assert_eq!(assembled.provenance.len(), 1);
    }

    #[test]
    fn test_tiny_budget_yields_empty_context() {
        let results = vec![result(0, "some-long-source-name.md", 0.9, "text body")];
        let assembled = assemble_context(&results, 10);
        assert!(assembled.text.len() <= 10);
        assert!(assembled.provenance.is_empty());
    }

    #[test]
    fn test_system_prompt_embeds_context() {
        let prompt = system_prompt("the context body");
        assert!(prompt.contains("the context body"));
        assert!(prompt.starts_with("You are a helpful assistant."));
    }
}
