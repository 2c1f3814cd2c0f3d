//! Query-to-passage search pipeline.
//!
//! [`vector_search`] embeds a batch of queries and asks the index for the `k`
//! nearest positions of each. [`project`] maps those positions back to corpus
//! field values without disturbing rank order or batch grouping.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::semantic::corpus::{Corpus, FieldId};
use crate::semantic::embeddings::{Embedder, EmbeddingError};
use crate::semantic::index::{IndexError, Neighbors, SimilarityIndex};

/// Per-request failures. None of these touch the loaded resources.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("query batch is empty")]
    EmptyQuery,

    #[error("invalid number of results {k}: must be between 1 and {len}")]
    InvalidK { k: i64, len: usize },

    #[error("embedding has {got} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("index returned position {position}, corpus has {len} rows")]
    PositionOutOfRange { position: usize, len: usize },

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(IndexError),
}

impl From<IndexError> for SearchError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { expected, got } => {
                SearchError::DimensionMismatch { expected, got }
            }
            IndexError::InvalidK { k, len } => SearchError::InvalidK {
                k: i64::try_from(k).unwrap_or(i64::MAX),
                len,
            },
            other => SearchError::Index(other),
        }
    }
}

/// One ranked neighbour. `position` is `None` when the index had no
/// neighbour to report for this rank.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub position: Option<usize>,
    pub distance: f32,
}

/// Ranked neighbours for every query of a batch, in query order.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    queries: Vec<Vec<Neighbor>>,
}

impl SearchResults {
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Neighbours of the `query`-th query, closest first.
    pub fn query(&self, query: usize) -> Option<&[Neighbor]> {
        self.queries.get(query).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Neighbor]> {
        self.queries.iter().map(Vec::as_slice)
    }
}

impl From<Neighbors> for SearchResults {
    fn from(neighbors: Neighbors) -> Self {
        let queries = (0..neighbors.rows())
            .map(|row| {
                let (distances, positions) = neighbors.row(row);
                distances
                    .iter()
                    .zip(positions)
                    .map(|(&distance, &position)| Neighbor {
                        // negative values are the index's "no neighbour" sentinel
                        position: usize::try_from(position).ok(),
                        distance,
                    })
                    .collect()
            })
            .collect();

        Self { queries }
    }
}

/// Turn a caller-supplied result count into a valid `k` for an index of
/// `len` vectors.
pub fn resolve_k(requested: i64, len: usize) -> Result<usize, SearchError> {
    match usize::try_from(requested) {
        Ok(k) if k >= 1 && k <= len => Ok(k),
        _ => Err(SearchError::InvalidK { k: requested, len }),
    }
}

/// Embed `queries` as one batch and retrieve the `k` nearest positions for
/// each of them with a single index call.
pub fn vector_search(
    queries: &[String],
    embedder: &dyn Embedder,
    index: &dyn SimilarityIndex,
    k: usize,
) -> Result<SearchResults, SearchError> {
    if queries.is_empty() {
        return Err(SearchError::EmptyQuery);
    }
    resolve_k(i64::try_from(k).unwrap_or(i64::MAX), index.len())?;

    let vectors = embedder.embed(queries)?;
    if vectors.len() != queries.len() {
        return Err(EmbeddingError::EmbeddingFailed(format!(
            "{} embeddings for {} queries",
            vectors.len(),
            queries.len()
        ))
        .into());
    }

    if let Some(bad) = vectors.iter().find(|v| v.len() != index.dimensions()) {
        return Err(SearchError::DimensionMismatch {
            expected: index.dimensions(),
            got: bad.len(),
        });
    }

    let neighbors = index.search(&vectors, k)?;
    if neighbors.rows() != queries.len() || neighbors.k() != k {
        return Err(SearchError::Index(IndexError::MalformedNeighbors {
            k: neighbors.k(),
            distances: neighbors.rows() * neighbors.k(),
            positions: neighbors.rows() * neighbors.k(),
        }));
    }

    Ok(neighbors.into())
}

/// Values of `field` for every neighbour, grouped per query in rank order.
///
/// Each distinct position is looked up once, so a position recurring across
/// ranks or queries always yields the same value. Entries without a position
/// stay `None`.
pub fn project<'c>(
    results: &SearchResults,
    corpus: &'c Corpus,
    field: FieldId,
) -> Result<Vec<Vec<Option<&'c str>>>, SearchError> {
    let mut values: BTreeMap<usize, &'c str> = BTreeMap::new();
    for position in results.iter().flatten().filter_map(|n| n.position) {
        if values.contains_key(&position) {
            continue;
        }
        let value = corpus
            .value(position, field)
            .ok_or(SearchError::PositionOutOfRange {
                position,
                len: corpus.len(),
            })?;
        values.insert(position, value);
    }

    Ok(results
        .iter()
        .map(|neighbors| {
            neighbors
                .iter()
                .map(|n| n.position.and_then(|p| values.get(&p).copied()))
                .collect()
        })
        .collect())
}

/// [`project`] with the field given by header name.
pub fn project_field<'c>(
    results: &SearchResults,
    corpus: &'c Corpus,
    field_name: &str,
) -> Result<Vec<Vec<Option<&'c str>>>, SearchError> {
    let field = corpus
        .field(field_name)
        .map_err(|_| SearchError::UnknownField(field_name.to_string()))?;
    project(results, corpus, field)
}
