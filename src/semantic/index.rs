//! Exact nearest-neighbour index over passage embeddings.
//!
//! Vectors are addressed by position: the n-th vector added is the n-th corpus
//! row. Search returns `k` neighbours per query vector, closest first.

use rayon::prelude::*;

/// Position value reported by an index when fewer than `k` neighbours exist.
pub const NO_NEIGHBOR: i64 = -1;

/// Distance metric used to rank neighbours. Smaller is closer for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Squared Euclidean distance.
    L2,
    /// `1 - cosine similarity`, in `[0, 2]`.
    Cosine,
}

impl Metric {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Metric::L2 => 0,
            Metric::Cosine => 1,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Metric::L2),
            1 => Some(Metric::Cosine),
            _ => None,
        }
    }
}

/// Raw k-NN output: one row per query vector, `k` columns, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbors {
    k: usize,
    distances: Vec<f32>,
    positions: Vec<i64>,
}

impl Neighbors {
    /// Build from row-major buffers. Both must hold `rows * k` values.
    pub fn new(k: usize, distances: Vec<f32>, positions: Vec<i64>) -> Result<Self, IndexError> {
        if k == 0 || distances.len() != positions.len() || distances.len() % k != 0 {
            return Err(IndexError::MalformedNeighbors {
                k,
                distances: distances.len(),
                positions: positions.len(),
            });
        }

        Ok(Self {
            k,
            distances,
            positions,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of query rows.
    pub fn rows(&self) -> usize {
        self.distances.len() / self.k
    }

    /// Distances and positions of the `row`-th query.
    pub fn row(&self, row: usize) -> (&[f32], &[i64]) {
        let start = row * self.k;
        let end = start + self.k;
        (&self.distances[start..end], &self.positions[start..end])
    }
}

/// A loaded, read-only nearest-neighbour index.
///
/// Any implementation returning rows sorted by ascending distance can back
/// the search pipeline.
pub trait SimilarityIndex: Send + Sync {
    /// Dimension every query vector must have.
    fn dimensions(&self) -> usize;

    /// Number of indexed vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn metric(&self) -> Metric;

    /// Find the `k` nearest vectors for every query vector.
    fn search(&self, queries: &[Vec<f32>], k: usize) -> Result<Neighbors, IndexError>;
}

/// Brute-force index holding every vector in one contiguous buffer.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimensions: usize,
    metric: Metric,
    /// `len * dimensions` values, position-major
    data: Vec<f32>,
}

impl FlatIndex {
    /// Create a new empty index with specified dimensions.
    pub fn new(dimensions: usize, metric: Metric) -> Self {
        Self {
            dimensions,
            metric,
            data: Vec::new(),
        }
    }

    /// Create an index with pre-allocated capacity.
    pub fn with_capacity(dimensions: usize, metric: Metric, capacity: usize) -> Self {
        Self {
            dimensions,
            metric,
            data: Vec::with_capacity(dimensions * capacity),
        }
    }

    /// Build an index from vectors in position order.
    pub fn from_vectors(
        dimensions: usize,
        metric: Metric,
        vectors: impl IntoIterator<Item = Vec<f32>>,
    ) -> Result<Self, IndexError> {
        let mut index = Self::new(dimensions, metric);
        for vector in vectors {
            index.add(&vector)?;
        }
        Ok(index)
    }

    /// Append a vector and return its position.
    ///
    /// Cosine indexes store the normalized vector and reject zero-norm input.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize, IndexError> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }

        let position = self.len();
        match self.metric {
            Metric::L2 => self.data.extend_from_slice(vector),
            Metric::Cosine => {
                let norm = l2_norm(vector);
                if norm < f32::EPSILON {
                    return Err(IndexError::ZeroNormVector);
                }
                self.data.extend(vector.iter().map(|v| v / norm));
            }
        }

        Ok(position)
    }

    /// Stored vector at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        if position >= self.len() {
            return None;
        }
        let start = position * self.dimensions;
        Some(&self.data[start..start + self.dimensions])
    }

    /// Iterate over stored vectors in position order.
    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimensions.max(1))
    }

    fn nearest(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let query: Vec<f32> = match self.metric {
            Metric::L2 => query.to_vec(),
            Metric::Cosine => {
                let norm = l2_norm(query);
                if norm < f32::EPSILON {
                    vec![0.0; query.len()]
                } else {
                    query.iter().map(|v| v / norm).collect()
                }
            }
        };

        let mut scored: Vec<(usize, f32)> = self
            .vectors()
            .enumerate()
            .map(|(position, target)| (position, self.distance(&query, target)))
            .collect();

        // equal distances keep ascending position order
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    fn distance(&self, query: &[f32], target: &[f32]) -> f32 {
        match self.metric {
            Metric::L2 => query
                .iter()
                .zip(target)
                .map(|(a, b)| (a - b) * (a - b))
                .sum(),
            Metric::Cosine => {
                let dot: f32 = query.iter().zip(target).map(|(a, b)| a * b).sum();
                (1.0 - dot).max(0.0)
            }
        }
    }
}

impl SimilarityIndex for FlatIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        if self.dimensions == 0 {
            return 0;
        }
        self.data.len() / self.dimensions
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn search(&self, queries: &[Vec<f32>], k: usize) -> Result<Neighbors, IndexError> {
        if k == 0 || k > self.len() {
            return Err(IndexError::InvalidK { k, len: self.len() });
        }

        if let Some(bad) = queries.iter().find(|q| q.len() != self.dimensions) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: bad.len(),
            });
        }

        let rows: Vec<Vec<(usize, f32)>> = queries
            .par_iter()
            .map(|query| self.nearest(query, k))
            .collect();

        let mut distances = Vec::with_capacity(rows.len() * k);
        let mut positions = Vec::with_capacity(rows.len() * k);
        for row in rows {
            for (position, distance) in row {
                positions.push(position as i64);
                distances.push(distance);
            }
        }

        Neighbors::new(k, distances, positions)
    }
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot index a zero-norm vector with the cosine metric")]
    ZeroNormVector,

    #[error("Invalid k {k}: index holds {len} vectors")]
    InvalidK { k: usize, len: usize },

    #[error("Malformed neighbour table: k={k}, {distances} distances, {positions} positions")]
    MalformedNeighbors {
        k: usize,
        distances: usize,
        positions: usize,
    },
}
