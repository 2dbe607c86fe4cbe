//! Text chunking
//!
//! Splits extracted document text into retrieval-sized chunks. Splitting
//! recursively prefers larger semantic boundaries before falling back to
//! smaller ones: paragraph breaks, then line breaks, then sentence
//! terminators, then whitespace, then raw character boundaries. No chunk
//! exceeds the configured maximum size, and output is deterministic for
//! identical input and configuration.

use crate::extract::PageText;
use tracing::debug;

/// Configuration for text chunking
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum chunk size in characters
    pub max_chunk_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1000,
        }
    }
}

/// An immutable unit of retrievable text
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    /// 0-based position in document order
    pub index: usize,
    /// 1-based page the chunk came from
    pub page_number: usize,
    /// Character span within the source text (cleaned pages joined by blank lines)
    pub start_offset: usize,
    pub end_offset: usize,
    pub word_count: usize,
}

/// Byte span within one page's text
#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
}

/// Split a whole document into ordered chunks
pub fn split_document(pages: &[PageText], config: &ChunkerConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut base_offset = 0usize;

    for page in pages {
        let before = chunks.len();
        append_page_chunks(&page.text, page.page_number, base_offset, config, &mut chunks);
        debug!(
            page = page.page_number,
            chunks = chunks.len() - before,
            "Page chunked"
        );
        // Account for the implicit blank-line joiner between pages
        base_offset += page.text.chars().count() + 2;
    }

    debug!(chunk_count = chunks.len(), "Document chunked");
    chunks
}

/// Split a single text into chunks (page number 1)
pub fn split_text(text: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    append_page_chunks(text, 1, 0, config, &mut chunks);
    chunks
}

fn append_page_chunks(
    text: &str,
    page_number: usize,
    base_offset: usize,
    config: &ChunkerConfig,
    out: &mut Vec<Chunk>,
) {
    if text.trim().is_empty() {
        return;
    }

    let mut spans = Vec::new();
    split_span(text, 0, text.len(), 0, config.max_chunk_chars.max(1), &mut spans);

    // Byte-to-char offset translation; spans arrive in document order so a
    // single forward cursor suffices.
    let mut cursor_byte = 0usize;
    let mut cursor_char = 0usize;
    let mut chars_at = |byte: usize| -> usize {
        debug_assert!(byte >= cursor_byte);
        cursor_char += text[cursor_byte..byte].chars().count();
        cursor_byte = byte;
        cursor_char
    };

    for span in spans {
        let raw = &text[span.start..span.end];
        let trimmed = raw.trim();
        // Degenerate whitespace-only segments are dropped, not emitted
        if trimmed.is_empty() {
            continue;
        }

        let lead = raw.len() - raw.trim_start().len();
        let start_byte = span.start + lead;
        let end_byte = start_byte + trimmed.len();

        let start_offset = base_offset + chars_at(start_byte);
        let end_offset = base_offset + chars_at(end_byte);

        out.push(Chunk {
            content: trimmed.to_string(),
            index: out.len(),
            page_number,
            start_offset,
            end_offset,
            word_count: trimmed.split_whitespace().count(),
        });
    }
}

/// Recursively split `text[start..end]` into spans of at most `max_chars`
/// characters, preferring the largest boundary level that applies.
fn split_span(
    text: &str,
    start: usize,
    end: usize,
    level: usize,
    max_chars: usize,
    out: &mut Vec<Span>,
) {
    let slice = &text[start..end];
    if char_len(slice) <= max_chars {
        out.push(Span { start, end });
        return;
    }

    if level > 3 {
        // Last resort: raw character boundaries
        let mut count = 0usize;
        let mut seg_start = 0usize;
        for (idx, _) in slice.char_indices() {
            if count == max_chars {
                out.push(Span {
                    start: start + seg_start,
                    end: start + idx,
                });
                seg_start = idx;
                count = 0;
            }
            count += 1;
        }
        out.push(Span {
            start: start + seg_start,
            end,
        });
        return;
    }

    let points = split_points(slice, level);
    if points.is_empty() {
        split_span(text, start, end, level + 1, max_chars, out);
        return;
    }

    let mut boundaries = Vec::with_capacity(points.len() + 2);
    boundaries.push(0);
    boundaries.extend(points);
    boundaries.push(slice.len());

    // Greedily pack adjacent pieces up to max_chars; a single piece that is
    // itself too large recurses one boundary level down.
    let mut seg_start = 0usize;
    let mut i = 1usize;
    while i < boundaries.len() {
        let b = boundaries[i];
        if char_len(&slice[seg_start..b]) > max_chars {
            // Only reachable when [seg_start..b] is a single unsplit piece
            split_span(text, start + seg_start, start + b, level + 1, max_chars, out);
            seg_start = b;
        } else if i + 1 < boundaries.len()
            && char_len(&slice[seg_start..boundaries[i + 1]]) > max_chars
        {
            out.push(Span {
                start: start + seg_start,
                end: start + b,
            });
            seg_start = b;
        }
        i += 1;
    }

    if seg_start < slice.len() {
        out.push(Span {
            start: start + seg_start,
            end,
        });
    }
}

/// Candidate split points (byte index just past a separator) for a level
fn split_points(slice: &str, level: usize) -> Vec<usize> {
    match level {
        0 => find_separators(slice, &["\n\n"]),
        1 => find_separators(slice, &["\n"]),
        2 => find_separators(slice, &[". ", "! ", "? "]),
        _ => find_separators(slice, &[" "]),
    }
}

fn find_separators(slice: &str, separators: &[&str]) -> Vec<usize> {
    let mut points = Vec::new();
    for sep in separators {
        let mut from = 0usize;
        while let Some(pos) = slice[from..].find(sep) {
            let after = from + pos + sep.len();
            if after < slice.len() {
                points.push(after);
            }
            from = after;
        }
    }
    points.sort_unstable();
    points.dedup();
    points
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
