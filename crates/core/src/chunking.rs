use crate::error::IngestError;
use crate::models::{Chunk, Document, Page};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Terminal punctuation, optional closing quotes or brackets, then a space or end of text.
const SENTENCE_END_PATTERN: &str = r#"[.!?]["'\x{201D}\x{2019})\]]*(\s|$)"#;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_chars: usize,
    pub overlap_chars: usize,
    /// How far from the target size a sentence end may sit and still be preferred.
    pub sentence_tolerance_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: 800,
            overlap_chars: 120,
            sentence_tolerance_chars: 80,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.chunk_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap_chars, self.chunk_chars
            )));
        }
        if self.sentence_tolerance_chars >= self.chunk_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "sentence tolerance {} must be smaller than chunk size {}",
                self.sentence_tolerance_chars, self.chunk_chars
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits page text into overlapping, page-bound chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    sentence_end: Regex,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            config,
            sentence_end: Regex::new(SENTENCE_END_PATTERN)?,
        })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn chunk_document(&self, document: &Document) -> Vec<Chunk> {
        document
            .pages
            .iter()
            .flat_map(|page| self.chunk_page(&document.document_id, &document.title, page))
            .collect()
    }

    pub fn chunk_page(&self, document_id: &str, document_title: &str, page: &Page) -> Vec<Chunk> {
        let normalized = normalize_whitespace(&page.text);

        self.split(&normalized)
            .into_iter()
            .enumerate()
            .map(|(index, (char_offset, text))| Chunk {
                chunk_id: make_chunk_id(document_id, page.number, char_offset),
                document_id: document_id.to_string(),
                document_title: document_title.to_string(),
                page: page.number,
                char_offset,
                chunk_index: index as u32,
                text,
            })
            .collect()
    }

    /// Returns `(char_offset, text)` pairs over already-normalized text.
    pub fn split(&self, normalized: &str) -> Vec<(usize, String)> {
        let chars: Vec<char> = normalized.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let boundaries = self.sentence_boundaries(normalized);
        let mut spans = Vec::new();
        let mut start = 0;

        loop {
            let target = (start + self.config.chunk_chars).min(chars.len());
            let end = if target == chars.len() {
                target
            } else {
                self.pick_end(&chars, &boundaries, start, target)
            };

            spans.push((start, chars[start..end].iter().collect::<String>()));

            if end >= chars.len() {
                break;
            }
            start = self.next_start(&chars, start, end);
        }

        spans
    }

    fn pick_end(&self, chars: &[char], boundaries: &[usize], start: usize, target: usize) -> usize {
        let tolerance = self.config.sentence_tolerance_chars;
        let sentence_end = boundaries
            .iter()
            .copied()
            .filter(|&boundary| boundary > start && boundary.abs_diff(target) <= tolerance)
            .min_by_key(|&boundary| (boundary.abs_diff(target), boundary));

        if let Some(boundary) = sentence_end {
            return boundary;
        }

        let half = start + self.config.chunk_chars / 2;
        (half + 1..=target)
            .rev()
            .find(|&index| chars[index].is_whitespace())
            .unwrap_or(target)
    }

    fn next_start(&self, chars: &[char], start: usize, end: usize) -> usize {
        let next = end
            .saturating_sub(self.config.overlap_chars)
            .max(start + 1);

        (next..end)
            .find(|&index| index > 0 && chars[index - 1].is_whitespace() && !chars[index].is_whitespace())
            .unwrap_or(next)
    }

    fn sentence_boundaries(&self, normalized: &str) -> Vec<usize> {
        let char_starts: Vec<usize> = normalized.char_indices().map(|(byte, _)| byte).collect();

        self.sentence_end
            .captures_iter(normalized)
            .filter_map(|capture| capture.get(1))
            .map(|tail| char_starts.partition_point(|&byte| byte < tail.start()))
            .collect()
    }
}

/// Rebuilds the normalized page text from its chunks by dropping overlapped prefixes.
pub fn reconstruct(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    let mut covered = 0usize;

    for chunk in chunks {
        let length = chunk.text.chars().count();
        let skip = covered.saturating_sub(chunk.char_offset);
        text.extend(chunk.text.chars().skip(skip));
        covered = covered.max(chunk.char_offset + length);
    }

    text
}

fn make_chunk_id(document_id: &str, page: u32, char_offset: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(page.to_le_bytes());
    hasher.update((char_offset as u64).to_le_bytes());
    format!("{:x}", hasher.finalize())
}
