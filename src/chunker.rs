use serde::{Deserialize, Serialize};

/// Fixed-window chunking parameters, in characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPolicy {
    pub window: usize,
    pub overlap: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            window: 800,
            overlap: 100,
        }
    }
}

/// One contiguous slice of a document's normalized text. Offsets are byte
/// positions into that text; chunks are ordered and never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: usize,
    #[serde(rename = "docId")]
    pub doc_id: String,
    pub source: String,
    pub text: String,
    #[serde(rename = "startOffset")]
    pub start_offset: usize,
    #[serde(rename = "endOffset")]
    pub end_offset: usize,
}

/// Split normalized text into fixed-size overlapping chunks.
///
/// `first_id` lets callers keep chunk ids unique across a whole corpus.
pub fn chunk_text(
    content: &str,
    doc_id: &str,
    source: &str,
    policy: &ChunkPolicy,
    first_id: usize,
) -> Vec<Chunk> {
    if content.is_empty() {
        return Vec::new();
    }

    let window = policy.window.max(10);
    let overlap = policy.overlap.min(window.saturating_sub(1));

    // Normalize CRLF → LF before any offsets are computed
    let normalized = content.replace("\r\n", "\n");

    split_fixed(&normalized, window, overlap)
        .into_iter()
        .enumerate()
        .map(|(i, (text, start_offset, end_offset))| Chunk {
            id: first_id + i,
            doc_id: doc_id.to_string(),
            source: source.to_string(),
            text,
            start_offset,
            end_offset,
        })
        .collect()
}

/// Find the nearest char boundary at or before `pos`.
fn safe_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    // Walk backwards to find char boundary
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}

/// Find a word boundary near `pos` (prefer splitting on whitespace).
pub(crate) fn word_boundary(text: &str, pos: usize) -> usize {
    let safe_pos = safe_boundary(text, pos);
    // Look back from safe_pos for whitespace — search_start must also be a char boundary
    let search_start = safe_boundary(text, safe_pos.saturating_sub(50));
    if let Some(last_ws) = text[search_start..safe_pos].rfind(|c: char| c.is_whitespace()) {
        search_start + last_ws + 1
    } else {
        safe_pos
    }
}

fn split_fixed(text: &str, window: usize, overlap: usize) -> Vec<(String, usize, usize)> {
    let mut chunks = Vec::new();
    let mut pos = 0;
    let len = text.len();

    while pos < len {
        // Use char_indices to find the byte offset for window chars from pos
        let actual_end = match text[pos..].char_indices().nth(window) {
            Some((idx, _)) => {
                let abs = pos + idx;
                // The nearest whitespace can sit before the window start when
                // pos lands mid-word; keep the full window rather than
                // produce an inverted range
                let wb = word_boundary(text, abs);
                if wb > pos {
                    wb
                } else {
                    abs
                }
            }
            None => len,
        };

        let chunk = text[pos..actual_end].to_string();
        // Whitespace-only windows are dropped
        if !chunk.trim().is_empty() {
            chunks.push((chunk, pos, actual_end));
        }

        // Advance by (window - overlap) chars using char_indices for UTF-8 safety
        let advance_chars = window.saturating_sub(overlap);
        let advance_bytes = match text[pos..].char_indices().nth(advance_chars) {
            Some((idx, _)) => idx,
            None => actual_end - pos,
        };
        let new_pos = pos + advance_bytes.max(1);
        pos = safe_boundary(text, new_pos);
    }
    chunks
}
