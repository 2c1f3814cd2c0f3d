//! Semantic search over a fixed passage corpus.
//!
//! Queries are embedded with a cross-lingual sentence model and matched
//! against a prebuilt index of passage embeddings; hits are mapped back to
//! corpus rows.
//!
//! # Architecture
//!
//! - `embeddings`: Wraps fastembed for embedding generation
//! - `index`: In-memory exact k-NN index addressed by corpus position
//! - `storage`: Binary file I/O for the vectors.bin index blob
//! - `corpus`: CSV passage table with header-resolved fields
//! - `preprocess`: Query normalization before embedding
//! - `search`: Vector search and result projection
//! - `service`: One-time resource loading and the passage search API

pub mod corpus;
pub mod embeddings;
pub mod index;
mod preprocess;
pub mod search;
mod service;
pub mod storage;

pub use corpus::{Corpus, CorpusError, FieldId};
pub use embeddings::{model_id_hash, Embedder, EmbeddingError, EmbeddingModel};
pub use index::{FlatIndex, IndexError, Metric, Neighbors, SimilarityIndex, NO_NEIGHBOR};
pub use preprocess::{is_blank, preprocess_queries, DEFAULT_MAX_QUERY_CHARS};
pub use search::{project, project_field, resolve_k, vector_search, SearchError, SearchResults};
pub use service::{
    Passage, ResourceLoadError, SemanticResources, SemanticSearchError, SemanticSearchService,
    ServiceInfo,
};
pub use storage::{VectorStorage, VectorStorageError};

/// Default embedding model name (cross-lingual, covers German and English)
pub const DEFAULT_MODEL: &str = "paraphrase-multilingual-mpnet-base-v2";
