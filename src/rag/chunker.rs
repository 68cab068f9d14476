//! Sliding-window text chunker.
//!
//! Offsets are counted in chars so a window never cuts a multi-byte
//! character in half.

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Window parameters for [`chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub max_length: usize,
    /// Characters shared by consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_length: 512,
            overlap: 100,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_length == 0 {
            return Err(ConfigError::ZeroMaxLength);
        }
        if self.overlap >= self.max_length {
            return Err(ConfigError::OverlapTooLarge {
                overlap: self.overlap,
                max_length: self.max_length,
            });
        }
        Ok(())
    }

    /// Distance between the starts of two consecutive windows.
    pub fn step(&self) -> usize {
        self.max_length - self.overlap
    }
}

/// A window of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source_id: String,
    /// 1-based position within the source.
    pub index: usize,
    pub text: String,
    /// Inclusive start, in chars.
    pub start_offset: usize,
    /// Exclusive end, in chars.
    pub end_offset: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.end_offset == self.start_offset
    }
}

/// Splits `text` into overlapping windows of at most `config.max_length` chars.
pub fn chunk(
    source_id: &str,
    text: &str,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, ConfigError> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let total_chars = chars.len();
    let mut chunks = Vec::new();

    let step = config.step();
    let mut start = 0;
    while start < total_chars {
        let end = (start + config.max_length).min(total_chars);
        chunks.push(Chunk {
            source_id: source_id.to_string(),
            index: chunks.len() + 1,
            text: chars[start..end].iter().collect(),
            start_offset: start,
            end_offset: end,
        });
        start += step;
    }

    Ok(chunks)
}
