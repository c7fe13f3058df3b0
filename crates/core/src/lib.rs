pub mod chunking;
pub mod composer;
pub mod config;
pub mod conversation;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod retriever;
pub mod rewriter;
pub mod services;
pub mod stores;
pub mod traits;

pub use chunking::{normalize_whitespace, reconstruct, Chunker, ChunkingConfig};
pub use composer::{AnswerComposer, NO_RELEVANT_POLICY_RESPONSE};
pub use config::{RagConfig, DEFAULT_HISTORY_WINDOW, DEFAULT_MIN_RELEVANCE_SCORE, DEFAULT_TOP_K};
pub use conversation::Session;
pub use embeddings::{CharacterNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IndexError, IngestError, PromptError, QueryError, ServiceError};
pub use extractor::{extract_page_texts, load_document, PageExtractor};
pub use ingest::{
    build_and_persist, build_index, discover_source_files, open_or_build, IngestedDocument, IngestionReport,
    OpenedIndex, SkippedDocument,
};
pub use models::{
    Answer, AnswerOutcome, Chunk, Citation, ConversationTurn, Document, IndexEntry, Page, RetrievedChunk,
};
pub use orchestrator::PolicyAssistant;
pub use prompt::{Message, Prompt, Role};
pub use retriever::{Retrieval, Retriever};
pub use rewriter::QueryRewriter;
pub use services::openai::{OpenAiChatModel, OpenAiEmbedder, OpenAiEndpoint};
pub use stores::{FlatIndex, IndexManifest, Metric};
pub use traits::{Embedder, LanguageModel, VectorIndex};
