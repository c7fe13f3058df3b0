use crate::error::IndexError;
use crate::models::{IndexEntry, RetrievedChunk};
use crate::traits::VectorIndex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Ranked by cosine similarity, i.e. smallest cosine distance first.
    Cosine,
}

/// Exact nearest-neighbour index over a flat list of entries.
///
/// Entry positions are insertion order and never change, so ties in
/// similarity are always resolved the same way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
    chunk_ids: HashSet<String>,
}

impl FlatIndex {
    pub const METRIC: Metric = Metric::Cosine;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            ..Self::default()
        }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    fn check_dimension(&self, expected: usize, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn add(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let Some(first) = entries.first() else {
            return Ok(());
        };
        let dimension = self.dimension.unwrap_or(first.vector.len());

        let mut batch_ids = HashSet::with_capacity(entries.len());
        for entry in &entries {
            self.check_dimension(dimension, &entry.vector)?;
            if self.chunk_ids.contains(entry.chunk_id()) || !batch_ids.insert(entry.chunk_id()) {
                return Err(IndexError::DuplicateChunk(entry.chunk_id().to_string()));
            }
        }

        self.dimension = Some(dimension);
        for entry in entries {
            self.chunk_ids.insert(entry.chunk_id().to_string());
            self.entries.push(entry);
        }
        Ok(())
    }

    fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, IndexError> {
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        self.check_dimension(dimension, query_vector)?;

        let query_norm = norm(query_vector);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, cosine(query_vector, query_norm, &entry.vector)))
            .collect();

        scored.sort_by(|left, right| match right.1.total_cmp(&left.1) {
            Ordering::Equal => left.0.cmp(&right.0),
            other => other,
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| RetrievedChunk {
                chunk: self.entries[position].chunk.clone(),
                score,
                position,
            })
            .collect())
    }
}

fn norm(vector: &[f32]) -> f32 {
    vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

fn cosine(query: &[f32], query_norm: f32, candidate: &[f32]) -> f32 {
    let candidate_norm = norm(candidate);
    if query_norm < f32::EPSILON || candidate_norm < f32::EPSILON {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(candidate).map(|(a, b)| a * b).sum();
    dot / (query_norm * candidate_norm)
}
