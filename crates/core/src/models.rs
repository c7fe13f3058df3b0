use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Path relative to the ingested source directory, `/`-separated.
    pub document_id: String,
    pub title: String,
    pub source_path: String,
    pub checksum: String,
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub page: u32,
    /// Char offset of `text` inside the page's normalized text.
    pub char_offset: usize,
    pub chunk_index: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

impl IndexEntry {
    pub fn new(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self { chunk, vector }
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk.chunk_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Cosine similarity; higher is more relevant.
    pub score: f32,
    /// Insertion position inside the index, used as the tie-breaker.
    pub position: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub document_id: String,
    pub document_title: String,
    pub page: u32,
    pub chunk_id: String,
    pub snippet: Option<String>,
    pub score: f32,
}

impl Citation {
    pub fn label(&self) -> String {
        format!("{} (page {})", self.document_title, self.page)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AnswerOutcome {
    Grounded,
    /// No retrieved passage cleared the relevance threshold.
    Abstained,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub outcome: AnswerOutcome,
    pub rewritten_query: String,
}

impl Answer {
    pub fn is_abstention(&self) -> bool {
        self.outcome == AnswerOutcome::Abstained
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub utterance: String,
    pub rewritten_query: String,
    pub retrieved_chunk_ids: Vec<String>,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub asked_at: DateTime<Utc>,
}
