//! Paragraph-boundary text chunker.
//!
//! Splits the concatenated knowledge-base text into [`Chunk`]s that respect a
//! configurable `max_tokens` limit. Paragraphs (`\n\n`, which is also the
//! separator the fetcher puts between files) are packed greedily; a single
//! paragraph longer than the limit is cut at the last newline or space
//! before the limit, always on a UTF-8 character boundary.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks with contiguous indices starting at 0.
///
/// Whitespace-only input produces no chunks.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_bytes = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if para.len() > max_bytes {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            pieces.extend(hard_split(para, max_bytes));
            continue;
        }

        if !buf.is_empty() && buf.len() + 2 + para.len() > max_bytes {
            pieces.push(std::mem::take(&mut buf));
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
        .iter()
        .enumerate()
        .map(|(i, p)| make_chunk(i as i64, p))
        .collect()
}

fn hard_split(para: &str, max_bytes: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = para;
    while !rest.is_empty() {
        if rest.len() <= max_bytes {
            out.push(rest.trim().to_string());
            break;
        }
        let mut limit = max_bytes;
        while !rest.is_char_boundary(limit) {
            limit -= 1;
        }
        if limit == 0 {
            // First char alone is wider than the limit.
            limit = rest.char_indices().nth(1).map(|(i, _)| i).unwrap_or(rest.len());
        }
        let cut = rest[..limit]
            .rfind(['\n', ' '])
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        rest = &rest[cut..];
    }
    out
}

fn make_chunk(index: i64, text: &str) -> Chunk {
    let hash = hex::encode(Sha256::digest(text.as_bytes()));
    Chunk {
        id: Uuid::new_v4().to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
