use super::flat::{FlatIndex, Metric};
use crate::error::IndexError;
use crate::models::{Chunk, IndexEntry};
use crate::traits::VectorIndex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const METADATA_FILE: &str = "metadata.json";

const MAGIC: &[u8; 8] = b"PRAGVEC1";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = MAGIC.len() + 4 + 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    pub format_version: u32,
    pub metric: Metric,
    pub dimension: usize,
    pub count: usize,
    pub embedder: String,
    pub vectors_sha256: String,
}

#[derive(Serialize, Deserialize)]
struct MetadataFile {
    #[serde(flatten)]
    manifest: IndexManifest,
    entries: Vec<StoredChunk>,
}

#[derive(Serialize, Deserialize)]
struct StoredChunk {
    position: usize,
    #[serde(flatten)]
    chunk: Chunk,
}

impl FlatIndex {
    /// Writes `vectors.bin` (magic, `u32` dimension, `u64` count, then
    /// little-endian `f32` values in entry order) and `metadata.json` (manifest
    /// plus chunk metadata by position) into `location`, replacing any
    /// previous index files there.
    pub fn persist(&self, location: &Path, embedder: &str) -> Result<IndexManifest, IndexError> {
        fs::create_dir_all(location)?;

        let dimension = self.dimension().unwrap_or(0);
        let vectors = encode_vectors(dimension, self.entries());
        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            metric: FlatIndex::METRIC,
            dimension,
            count: self.len(),
            embedder: embedder.to_string(),
            vectors_sha256: sha256_hex(&vectors),
        };

        let metadata = MetadataFile {
            manifest: manifest.clone(),
            entries: self
                .entries()
                .iter()
                .enumerate()
                .map(|(position, entry)| StoredChunk {
                    position,
                    chunk: entry.chunk.clone(),
                })
                .collect(),
        };

        fs::write(location.join(VECTORS_FILE), &vectors)?;
        fs::write(location.join(METADATA_FILE), serde_json::to_vec_pretty(&metadata)?)?;

        Ok(manifest)
    }

    /// Whether `location` holds any index file. A directory with only one of
    /// the two files still counts and fails to load as corrupt.
    pub fn exists_at(location: &Path) -> bool {
        location.join(METADATA_FILE).is_file() || location.join(VECTORS_FILE).is_file()
    }

    /// Reads an index written by [`FlatIndex::persist`]. Any inconsistency
    /// between the two files is reported as [`IndexError::CorruptIndex`].
    pub fn load(location: &Path) -> Result<(FlatIndex, IndexManifest), IndexError> {
        if !Self::exists_at(location) {
            return Err(IndexError::MissingIndex(location.display().to_string()));
        }
        let metadata_bytes = read_required(location, METADATA_FILE)?;
        let vectors = read_required(location, VECTORS_FILE)?;

        let metadata: MetadataFile = serde_json::from_slice(&metadata_bytes)
            .map_err(|error| IndexError::corrupt(location, format!("metadata: {error}")))?;
        let manifest = metadata.manifest;

        if manifest.format_version != FORMAT_VERSION {
            return Err(IndexError::corrupt(
                location,
                format!("unsupported format version {}", manifest.format_version),
            ));
        }
        if sha256_hex(&vectors) != manifest.vectors_sha256 {
            return Err(IndexError::corrupt(location, "vector checksum mismatch"));
        }

        let (dimension, count) = decode_header(location, &vectors)?;
        if dimension != manifest.dimension || count != manifest.count {
            return Err(IndexError::corrupt(
                location,
                format!(
                    "vectors hold {count}x{dimension}, manifest declares {}x{}",
                    manifest.count, manifest.dimension
                ),
            ));
        }
        if metadata.entries.len() != count {
            return Err(IndexError::corrupt(
                location,
                format!("{} metadata rows for {count} vectors", metadata.entries.len()),
            ));
        }
        let expected_len = HEADER_LEN + count * dimension * 4;
        if vectors.len() != expected_len {
            return Err(IndexError::corrupt(
                location,
                format!("vector file is {} bytes, expected {expected_len}", vectors.len()),
            ));
        }
        if count > 0 && dimension == 0 {
            return Err(IndexError::corrupt(location, "entries with zero dimension"));
        }

        let mut entries = Vec::with_capacity(count);
        let body = &vectors[HEADER_LEN..];
        for (expected_position, stored) in metadata.entries.into_iter().enumerate() {
            if stored.position != expected_position {
                return Err(IndexError::corrupt(
                    location,
                    format!("metadata row {expected_position} claims position {}", stored.position),
                ));
            }
            let start = expected_position * dimension * 4;
            let vector = body[start..start + dimension * 4]
                .chunks_exact(4)
                .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                .collect();
            entries.push(IndexEntry::new(stored.chunk, vector));
        }

        let mut index = if dimension == 0 {
            FlatIndex::new()
        } else {
            FlatIndex::with_dimension(dimension)
        };
        index
            .add(entries)
            .map_err(|error| IndexError::corrupt(location, error.to_string()))?;

        Ok((index, manifest))
    }
}

fn read_required(location: &Path, file: &str) -> Result<Vec<u8>, IndexError> {
    match fs::read(location.join(file)) {
        Ok(bytes) => Ok(bytes),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            Err(IndexError::corrupt(location, format!("missing {file}")))
        }
        Err(error) => Err(IndexError::Io(error)),
    }
}

fn encode_vectors(dimension: usize, entries: &[IndexEntry]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + entries.len() * dimension * 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&(dimension as u32).to_le_bytes());
    bytes.extend_from_slice(&(entries.len() as u64).to_le_bytes());
    for entry in entries {
        for value in &entry.vector {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    bytes
}

fn decode_header(location: &Path, bytes: &[u8]) -> Result<(usize, usize), IndexError> {
    if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(IndexError::corrupt(location, "bad vector file header"));
    }
    let mut dimension = [0u8; 4];
    dimension.copy_from_slice(&bytes[8..12]);
    let mut count = [0u8; 8];
    count.copy_from_slice(&bytes[12..20]);

    Ok((
        u32::from_le_bytes(dimension) as usize,
        u64::from_le_bytes(count) as usize,
    ))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
