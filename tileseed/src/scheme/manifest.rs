//! Chunked manifest decoding.
//!
//! A manifest is a text file with one tile per line, in one of two formats:
//!
//! - coordinate lines: `z/x/y`
//! - record lines: one JSON object per line with `z`, `x`, `y` and an
//!   optional resume `key`
//!
//! The format is detected once, from the first non-blank line, and assumed
//! for the rest of the file.
//!
//! The raw text is held in memory but decoded lazily, `chunk_size`
//! characters at a time. A chunk that ends mid-line keeps the partial line
//! as a remainder that is prefixed onto the next chunk, so a line is never
//! parsed truncated. The end of the manifest is reached when a chunk comes
//! back shorter than `chunk_size`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{SchemeError, SchemeResult};
use crate::tile::{Tile, TileKey};

/// Pattern for `z/x/y` coordinate lines.
///
/// Groups: 1 = zoom, 2 = column, 3 = row.
fn coordinate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)/(\d+)/(\d+)$").unwrap())
}

/// Line format of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineFormat {
    Coordinates,
    Records,
}

impl LineFormat {
    /// Detects the format from a single non-blank line.
    pub fn detect(line: &str) -> Self {
        if coordinate_pattern().is_match(line.trim()) {
            LineFormat::Coordinates
        } else {
            LineFormat::Records
        }
    }

    /// Parses one line under this format.
    pub fn parse(&self, line: &str) -> SchemeResult<Tile> {
        let line = line.trim();
        let malformed = |reason: String| SchemeError::ManifestParse {
            line: line.to_string(),
            reason,
        };

        match self {
            LineFormat::Coordinates => {
                let captures = coordinate_pattern()
                    .captures(line)
                    .ok_or_else(|| malformed("expected z/x/y".to_string()))?;
                let field = |i: usize| captures.get(i).map_or("", |m| m.as_str());

                let z = field(1)
                    .parse::<u8>()
                    .map_err(|e| malformed(format!("zoom: {}", e)))?;
                let x = field(2)
                    .parse::<u32>()
                    .map_err(|e| malformed(format!("column: {}", e)))?;
                let y = field(3)
                    .parse::<u32>()
                    .map_err(|e| malformed(format!("row: {}", e)))?;
                Ok(Tile::new(z, x, y))
            }
            LineFormat::Records => {
                serde_json::from_str::<Tile>(line).map_err(|e| malformed(e.to_string()))
            }
        }
    }

    /// Writes one tile as a line of this format, without the newline.
    pub fn encode(&self, tile: &Tile) -> String {
        match self {
            LineFormat::Coordinates => tile.to_string(),
            LineFormat::Records => {
                let mut record = serde_json::json!({ "z": tile.z, "x": tile.x, "y": tile.y });
                if let Some(key) = &tile.key {
                    record["key"] = match key {
                        TileKey::Number(n) => (*n).into(),
                        TileKey::Text(s) => s.clone().into(),
                    };
                }
                record.to_string()
            }
        }
    }
}

/// Counts the non-blank lines of a manifest.
pub fn count_lines(raw: &str) -> u64 {
    raw.lines().filter(|line| !line.trim().is_empty()).count() as u64
}

/// Incremental decoder over an in-memory manifest.
#[derive(Debug, Clone)]
pub struct ManifestReader {
    raw: String,
    chunk_size: usize,
    /// Byte offset of the first character not yet decoded.
    offset: usize,
    remainder: String,
    format: Option<LineFormat>,
}

impl ManifestReader {
    pub fn new(raw: String, chunk_size: usize) -> Self {
        Self {
            raw,
            chunk_size: chunk_size.max(1),
            offset: 0,
            remainder: String::new(),
            format: None,
        }
    }

    /// Rebuilds a reader positioned where a checkpoint left it.
    ///
    /// The offset is clamped to the text and moved back to a character
    /// boundary if needed.
    pub fn resume(
        raw: String,
        chunk_size: usize,
        offset: usize,
        remainder: String,
        format: Option<LineFormat>,
    ) -> Self {
        let mut offset = offset.min(raw.len());
        while !raw.is_char_boundary(offset) {
            offset -= 1;
        }
        Self {
            raw,
            chunk_size: chunk_size.max(1),
            offset,
            remainder,
            format,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remainder(&self) -> &str {
        &self.remainder
    }

    pub fn format(&self) -> Option<LineFormat> {
        self.format
    }

    /// True once every chunk has been decoded.
    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.raw.len() && self.remainder.is_empty()
    }

    /// Decodes the next chunk.
    ///
    /// Returns one result per complete non-blank line in the chunk, or
    /// `None` once the manifest is exhausted. A chunk may contain no
    /// complete line at all, in which case the returned list is empty.
    pub fn next_chunk(&mut self) -> Option<Vec<SchemeResult<Tile>>> {
        if self.is_exhausted() {
            return None;
        }

        let rest = &self.raw[self.offset..];
        let end = rest
            .char_indices()
            .nth(self.chunk_size)
            .map_or(rest.len(), |(i, _)| i);
        let at_end = end == rest.len();

        let mut text = std::mem::take(&mut self.remainder);
        text.push_str(&rest[..end]);
        self.offset += end;

        if !at_end {
            match text.rfind('\n') {
                Some(pos) => {
                    self.remainder = text[pos + 1..].to_string();
                    text.truncate(pos + 1);
                }
                None => {
                    self.remainder = text;
                    return Some(Vec::new());
                }
            }
        }

        Some(self.decode(&text))
    }

    fn decode(&mut self, text: &str) -> Vec<SchemeResult<Tile>> {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let format = *self.format.get_or_insert_with(|| LineFormat::detect(line));
                format.parse(line)
            })
            .collect()
    }
}
