use crate::chunking::Chunker;
use crate::config::RagConfig;
use crate::error::{IndexError, IngestError, ServiceError};
use crate::extractor::load_document;
use crate::models::{Chunk, Document, IndexEntry};
use crate::services::with_timeout;
use crate::stores::{FlatIndex, IndexManifest};
use crate::traits::{Embedder, VectorIndex};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use walkdir::WalkDir;

const SOURCE_EXTENSIONS: [&str; 2] = ["pdf", "txt"];

/// Sorted source files under `folder`, plus every path the walk could not read.
pub fn discover_source_files(folder: &Path) -> (Vec<PathBuf>, Vec<SkippedDocument>) {
    let mut files = Vec::new();
    let mut unreadable = Vec::new();

    for item in WalkDir::new(folder).follow_links(true) {
        let entry = match item {
            Ok(entry) => entry,
            Err(error) => {
                let path = error
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| folder.to_path_buf());
                warn!(path = %path.display(), reason = %error, "unreadable source path");
                unreadable.push(SkippedDocument {
                    path,
                    reason: error.to_string(),
                });
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let is_source = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SOURCE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if is_source {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    unreadable.sort_by(|left, right| left.path.cmp(&right.path));
    (files, unreadable)
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub document_id: String,
    pub title: String,
    pub checksum: String,
    pub pages: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub documents: Vec<IngestedDocument>,
    pub skipped: Vec<SkippedDocument>,
    pub chunk_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IngestionReport {
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

/// Loads, chunks and embeds every source document under `source`.
///
/// Unreadable documents, and documents whose embedding call fails, are
/// skipped and listed in the report. A vector of the wrong dimension aborts
/// the whole build. Entries are inserted in file, page and offset order no
/// matter which embedding call finishes first, so rebuilding an unchanged
/// directory yields the same index.
pub async fn build_index<E: Embedder>(
    source: &Path,
    embedder: &E,
    config: &RagConfig,
) -> Result<(FlatIndex, IngestionReport), IngestError> {
    config.validate()?;
    let started_at = Utc::now();

    let (files, mut skipped) = discover_source_files(source);
    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf or txt files found in {}",
            source.display()
        )));
    }
    info!(source = %source.display(), files = files.len(), embedder = embedder.name(), "ingestion started");

    let chunker = Chunker::new(config.chunking)?;
    let mut prepared: Vec<(PathBuf, Document, Vec<Chunk>)> = Vec::new();

    for path in files {
        match load_document(source, &path) {
            Ok(document) => {
                let chunks = chunker.chunk_document(&document);
                prepared.push((path, document, chunks));
            }
            Err(error) => {
                warn!(path = %path.display(), reason = %error, "skipped document");
                skipped.push(SkippedDocument {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    let timeout = config.service_timeout();
    let embedded: Vec<Result<Vec<Vec<f32>>, ServiceError>> = stream::iter(
        prepared
            .iter()
            .map(|(_, _, chunks)| embed_chunks(embedder, chunks, config.embed_batch_size, timeout)),
    )
    .buffered(config.embed_concurrency)
    .collect()
    .await;

    let mut index = FlatIndex::with_dimension(embedder.dimensions());
    let mut documents = Vec::new();

    for ((path, document, chunks), vectors) in prepared.into_iter().zip(embedded) {
        let vectors = match vectors {
            Ok(vectors) => vectors,
            Err(error) => {
                warn!(path = %path.display(), reason = %error, "skipped document after embedding failure");
                skipped.push(SkippedDocument {
                    path,
                    reason: IngestError::Embedding(error).to_string(),
                });
                continue;
            }
        };

        let chunk_count = chunks.len();
        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::new(chunk, vector))
            .collect();
        index.add(entries)?;

        documents.push(IngestedDocument {
            document_id: document.document_id,
            title: document.title,
            checksum: document.checksum,
            pages: document.pages.len(),
            chunks: chunk_count,
        });
    }

    let report = IngestionReport {
        chunk_count: index.len(),
        documents,
        skipped,
        started_at,
        finished_at: Utc::now(),
    };
    info!(
        documents = report.documents.len(),
        skipped = report.skipped.len(),
        chunks = report.chunk_count,
        "ingestion finished"
    );

    Ok((index, report))
}

#[derive(Debug, Clone)]
pub struct OpenedIndex {
    pub index: FlatIndex,
    pub manifest: IndexManifest,
    /// Present when the index was built during this call.
    pub report: Option<IngestionReport>,
}

pub async fn build_and_persist<E: Embedder>(
    source: &Path,
    index_dir: &Path,
    embedder: &E,
    config: &RagConfig,
) -> Result<OpenedIndex, IngestError> {
    let (index, report) = build_index(source, embedder, config).await?;
    if index.is_empty() {
        return Err(IngestError::NothingIndexed(source.display().to_string()));
    }

    let manifest = index.persist(index_dir, embedder.name())?;
    info!(index = %index_dir.display(), chunks = manifest.count, dimension = manifest.dimension, "index persisted");

    Ok(OpenedIndex {
        index,
        manifest,
        report: Some(report),
    })
}

/// Loads the index in `index_dir`, building it from `source` when none exists
/// yet or when `rebuild` is set. Without a source only loading is attempted.
pub async fn open_or_build<E: Embedder>(
    index_dir: &Path,
    source: Option<&Path>,
    embedder: &E,
    config: &RagConfig,
    rebuild: bool,
) -> Result<OpenedIndex, IngestError> {
    if !rebuild {
        match FlatIndex::load(index_dir) {
            Ok((index, manifest)) => {
                return Ok(OpenedIndex {
                    index,
                    manifest,
                    report: None,
                })
            }
            Err(IndexError::MissingIndex(_)) if source.is_some() => {
                info!(index = %index_dir.display(), "no index yet, building it");
            }
            Err(error) => return Err(error.into()),
        }
    }

    let source = source.ok_or_else(|| {
        IngestError::InvalidArgument("rebuilding the index needs a source folder".to_string())
    })?;
    build_and_persist(source, index_dir, embedder, config).await
}

async fn embed_chunks<E: Embedder>(
    embedder: &E,
    chunks: &[Chunk],
    batch_size: usize,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>, ServiceError> {
    let mut vectors = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
        let embedded = with_timeout(embedder.name(), timeout, embedder.embed_batch(&texts)).await?;
        if embedded.len() != texts.len() {
            return Err(ServiceError::InvalidResponse {
                service: embedder.name().to_string(),
                details: format!("{} vectors for {} chunks", embedded.len(), texts.len()),
            });
        }
        vectors.extend(embedded);
    }

    Ok(vectors)
}
