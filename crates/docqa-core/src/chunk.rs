//! Overlapping fixed-window text chunker.
//!
//! Splits extracted document text into windows of at most `size` characters
//! where every window after the first starts exactly `overlap` characters
//! before the end of the previous one. Window ends are snapped back to the
//! nearest paragraph, line, or word boundary when one exists in the second
//! half of the window, so chunks rarely cut words in half.
//!
//! # Algorithm
//!
//! 1. Work in characters (not bytes) so multi-byte text is never split
//!    inside a code point.
//! 2. The window `[start, start + size)` is cut at the last `\n\n`, then
//!    `\n`, then space found in `[start + size/2, start + size]`; if none,
//!    it is hard-cut at `start + size`.
//! 3. The next window starts at `end - overlap`.
//! 4. Empty input produces no chunks.
//!
//! Given the same text, `size`, and `overlap` the output is deterministic.
//!
//! # Example
//!
//! ```rust
//! use docqa_core::chunk::split_text;
//!
//! let text = "a".repeat(50);
//! let pieces = split_text(&text, 20, 5);
//! assert_eq!(pieces.len(), 3);
//! assert_eq!(pieces[0].len(), 20);
//! ```

use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, Metadata};

const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Split `text` into overlapping windows. See the module docs for the rules.
///
/// `overlap` must be smaller than `size / 2`; larger values are clamped so
/// the splitter always makes progress.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || size == 0 {
        return Vec::new();
    }

    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = offsets.len() - 1;
    let overlap = overlap.min(size.saturating_sub(1) / 2);

    let mut pieces = Vec::new();
    let mut start = 0usize;
    loop {
        let hard_end = (start + size).min(total);
        let end = if hard_end == total {
            total
        } else {
            find_break(text, &offsets, start + size / 2, hard_end).unwrap_or(hard_end)
        };

        pieces.push(text[offsets[start]..offsets[end]].to_string());
        if end == total {
            break;
        }

        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }
    pieces
}

/// Find the last separator boundary in `[min_end, hard_end]` (char indices),
/// returning the char index just past the separator.
fn find_break(text: &str, offsets: &[usize], min_end: usize, hard_end: usize) -> Option<usize> {
    if min_end >= hard_end {
        return None;
    }
    let lo = offsets[min_end];
    let window = &text[lo..offsets[hard_end]];
    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let byte_end = lo + pos + sep.len();
            if let Ok(idx) = offsets.binary_search(&byte_end) {
                if idx > min_end {
                    return Some(idx);
                }
            }
        }
    }
    None
}

/// Turn split text plus embeddings into [`Chunk`]s.
///
/// Every chunk receives a fresh UUID, the SHA-256 of its text, a copy of
/// `base` metadata, and `chunk_index` / `chunk_count` fields. `pieces` and
/// `embeddings` are zipped, so both must have the same length.
pub fn build_chunks(pieces: Vec<String>, embeddings: Vec<Vec<f32>>, base: &Metadata) -> Vec<Chunk> {
    let count = pieces.len();
    pieces
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(index, (content, embedding))| {
            let mut metadata = base.clone();
            metadata.insert("chunk_index".to_string(), Value::from(index));
            metadata.insert("chunk_count".to_string(), Value::from(count));
            make_chunk(content, embedding, metadata)
        })
        .collect()
}

/// Create a single [`Chunk`] with a UUID and SHA-256 content hash.
pub fn make_chunk(content: String, embedding: Vec<f32>, metadata: Metadata) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        content,
        hash,
        embedding,
        metadata,
    }
}
