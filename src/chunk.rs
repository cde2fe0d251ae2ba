//! Sliding-window text chunker.
//!
//! Splits normalized document text into [`Chunk`]s of at most `max_chars`
//! bytes. Consecutive windows overlap by roughly `overlap_chars` bytes so
//! that sentences crossing a boundary stay retrievable. Window ends prefer
//! paragraph, then line, then sentence, then word boundaries.
//!
//! Each chunk carries a SHA-256 hash of its text for staleness detection.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Preferred split points, strongest first.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Split text into overlapping chunks with contiguous indices starting at 0.
///
/// Returns no chunks for blank text.
pub fn chunk_text(filename: &str, text: &str, max_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    let text = text.trim();
    if text.is_empty() || max_chars == 0 {
        return Vec::new();
    }
    let overlap = overlap_chars.min(max_chars / 2);

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        if text.len() - start <= max_chars {
            push_chunk(&mut chunks, filename, &text[start..]);
            break;
        }

        let mut hard_end = floor_char_boundary(text, start + max_chars);
        if hard_end <= start {
            hard_end = ceil_char_boundary(text, start + 1);
        }
        let end = split_point(&text[start..hard_end])
            .map(|rel| start + rel)
            .unwrap_or(hard_end);
        push_chunk(&mut chunks, filename, &text[start..end]);

        // Step back by the overlap, then forward to the next word start.
        let mut next = ceil_char_boundary(text, end.saturating_sub(overlap));
        if let Some(ws) = text[next..end].find(char::is_whitespace) {
            next += ws;
            next += text[next..]
                .find(|c: char| !c.is_whitespace())
                .unwrap_or(0);
        }
        if next <= start || next >= end {
            next = end;
        }
        start = next;
    }

    chunks
}

/// Offset just past the last good separator in the back half of `window`.
fn split_point(window: &str) -> Option<usize> {
    let min = window.len() / 2;
    SEPARATORS.iter().find_map(|sep| {
        window
            .rfind(sep)
            .map(|pos| pos + sep.len())
            .filter(|&end| end > min)
    })
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn push_chunk(chunks: &mut Vec<Chunk>, filename: &str, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    let seq = chunks.len() as i64;
    chunks.push(make_chunk(filename, seq, text));
}

pub fn make_chunk(filename: &str, seq: i64, text: &str) -> Chunk {
    Chunk {
        filename: filename.to_string(),
        seq,
        text: text.to_string(),
        hash: text_hash(text),
    }
}

pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
