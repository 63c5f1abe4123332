//! Text splitters used by the ingest plugins.
//!
//! Three strategies are supported: `recursive` packs whole paragraphs up to
//! the chunk size and hard-splits oversized ones at whitespace, `character`
//! cuts fixed-size windows, and `token` is the character splitter sized in
//! approximate tokens. All of them carry `chunk_overlap` characters of tail
//! context into the next chunk and operate on char boundaries, so multi-byte
//! text never splits mid-character.

use anyhow::Result;

/// Approximate chars-per-token ratio for the token splitter.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitStrategy {
    Recursive,
    Character,
    Token,
}

impl SplitStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitStrategy::Recursive => "recursive",
            SplitStrategy::Character => "character",
            SplitStrategy::Token => "token",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "recursive" => Ok(SplitStrategy::Recursive),
            "character" => Ok(SplitStrategy::Character),
            "token" => Ok(SplitStrategy::Token),
            other => anyhow::bail!(
                "Unknown splitter: '{}'. Must be recursive, character, or token.",
                other
            ),
        }
    }
}

/// Splits `text` into chunks per the strategy. Whitespace-only input yields
/// no chunks; any other input yields at least one.
pub fn split_text(
    text: &str,
    strategy: SplitStrategy,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<String>> {
    if chunk_size == 0 {
        anyhow::bail!("chunk_size must be > 0");
    }
    if chunk_overlap >= chunk_size {
        anyhow::bail!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            chunk_overlap,
            chunk_size
        );
    }

    let chunks = match strategy {
        SplitStrategy::Recursive => split_paragraphs(text, chunk_size, chunk_overlap),
        SplitStrategy::Character => {
            let chars: Vec<char> = text.chars().collect();
            window_split(&chars, chunk_size, chunk_overlap, false)
        }
        SplitStrategy::Token => {
            let chars: Vec<char> = text.chars().collect();
            window_split(
                &chars,
                chunk_size * CHARS_PER_TOKEN,
                chunk_overlap * CHARS_PER_TOKEN,
                false,
            )
        }
    };

    Ok(chunks)
}

/// Paragraph packer: accumulates paragraphs up to `size` chars, flushing
/// with an overlap tail carried into the next chunk. Paragraphs larger than
/// `size` are window-split at whitespace.
fn split_paragraphs(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let para_len = trimmed.chars().count();

        if para_len > size {
            if !buf.is_empty() {
                chunks.push(std::mem::take(&mut buf));
            }
            let chars: Vec<char> = trimmed.chars().collect();
            chunks.extend(window_split(&chars, size, overlap, true));
            continue;
        }

        let would_be = if buf.is_empty() {
            para_len
        } else {
            buf.chars().count() + 2 + para_len
        };

        if would_be > size && !buf.is_empty() {
            let tail = overlap_tail(&buf, overlap);
            chunks.push(std::mem::take(&mut buf));
            // Seed the next chunk with trailing context when it still fits.
            if !tail.is_empty() && tail.chars().count() + 2 + para_len <= size {
                buf = tail;
            }
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(trimmed);
    }

    if !buf.trim().is_empty() {
        chunks.push(buf);
    }

    chunks
}

/// Char-window splitter. With `snap_whitespace`, each cut backs up to the
/// last whitespace inside the window so words stay whole.
fn window_split(chars: &[char], size: usize, overlap: usize, snap_whitespace: bool) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let mut end = (start + size).min(chars.len());
        if snap_whitespace && end < chars.len() {
            if let Some(ws) = (start..end).rev().find(|&i| chars[i].is_whitespace()) {
                if ws > start {
                    end = ws;
                }
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }

        if end >= chars.len() {
            break;
        }
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    pieces
}

/// Last `overlap` chars of `s`, on char boundaries.
fn overlap_tail(s: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= overlap {
        return s.to_string();
    }
    chars[chars.len() - overlap..].iter().collect()
}
