//! Semantic search service for passage lookup.
//!
//! Provides a high-level interface over the search pipeline:
//! - Loads the embedding model, similarity index and corpus exactly once
//! - Checks that the three resources agree with each other before serving
//! - Runs batch searches and projects title/text for every hit

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::config::SearchConfig;
use crate::semantic::corpus::{Corpus, CorpusError, FieldId};
use crate::semantic::embeddings::{model_id_hash, Embedder, EmbeddingError, EmbeddingModel};
use crate::semantic::index::{Metric, SimilarityIndex};
use crate::semantic::preprocess::preprocess_queries;
use crate::semantic::search::{project, resolve_k, vector_search, SearchError};
use crate::semantic::storage::{VectorStorage, VectorStorageError};

/// Startup failures. Any of these means no query can be served.
#[derive(Debug, thiserror::Error)]
pub enum ResourceLoadError {
    #[error("embedding model: {0}")]
    Model(#[from] EmbeddingError),

    #[error("similarity index {path}: {source}")]
    Index {
        path: PathBuf,
        #[source]
        source: VectorStorageError,
    },

    #[error("corpus {path}: {source}")]
    Corpus {
        path: PathBuf,
        #[source]
        source: CorpusError,
    },

    #[error("corpus field: {0}")]
    Field(#[source] CorpusError),

    #[error("corpus has {rows} rows but index holds {vectors} vectors")]
    CountMismatch { rows: usize, vectors: usize },

    #[error("model produces {model}-dim vectors but index expects {index}")]
    DimensionMismatch { model: usize, index: usize },
}

/// Errors that can occur during semantic search operations.
#[derive(Debug, thiserror::Error)]
pub enum SemanticSearchError {
    #[error("resource load failure: {0}")]
    ResourceLoad(#[from] ResourceLoadError),

    #[error(transparent)]
    Search(#[from] SearchError),
}

/// The three read-only resources a search needs, checked for consistency.
pub struct SemanticResources {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn SimilarityIndex>,
    corpus: Arc<Corpus>,
    title_field: FieldId,
    text_field: FieldId,
}

impl SemanticResources {
    /// Bundle loaded resources.
    ///
    /// Fails when the named fields are missing, when the corpus and index
    /// disagree on the number of passages, or when the model and index
    /// disagree on vector dimensions.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn SimilarityIndex>,
        corpus: Arc<Corpus>,
        title_field: &str,
        text_field: &str,
    ) -> Result<Self, ResourceLoadError> {
        let title_field = corpus.field(title_field).map_err(ResourceLoadError::Field)?;
        let text_field = corpus.field(text_field).map_err(ResourceLoadError::Field)?;

        if corpus.len() != index.len() {
            return Err(ResourceLoadError::CountMismatch {
                rows: corpus.len(),
                vectors: index.len(),
            });
        }

        if embedder.dimensions() != index.dimensions() {
            return Err(ResourceLoadError::DimensionMismatch {
                model: embedder.dimensions(),
                index: index.dimensions(),
            });
        }

        Ok(Self {
            embedder,
            index,
            corpus,
            title_field,
            text_field,
        })
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn index(&self) -> &dyn SimilarityIndex {
        self.index.as_ref()
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }
}

/// One search hit with its source passage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub position: usize,
    pub distance: f32,
    pub title: String,
    pub text: String,
}

/// Summary of the loaded resources.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub model: String,
    pub dimensions: usize,
    pub metric: &'static str,
    pub indexed: usize,
    pub corpus_rows: usize,
    pub fields: Vec<String>,
}

/// Service for performing semantic search over the passage corpus.
///
/// Resources are loaded by the first call to [`initialize`](Self::initialize)
/// (or any search) and shared read-only afterwards; later calls reuse them.
pub struct SemanticSearchService {
    config: SearchConfig,
    base_path: PathBuf,
    resources: OnceCell<SemanticResources>,
}

impl SemanticSearchService {
    /// Create a new semantic search service.
    ///
    /// # Arguments
    /// * `config` - Search configuration
    /// * `base_path` - Base directory for relative resource paths and models/
    pub fn new(config: SearchConfig, base_path: PathBuf) -> Self {
        Self {
            config,
            base_path,
            resources: OnceCell::new(),
        }
    }

    /// Create a service around resources that are already loaded.
    pub fn with_resources(config: SearchConfig, resources: SemanticResources) -> Self {
        Self {
            config,
            base_path: PathBuf::new(),
            resources: OnceCell::with_value(resources),
        }
    }

    /// Check if the resources have been loaded.
    pub fn is_initialized(&self) -> bool {
        self.resources.get().is_some()
    }

    /// Load all resources unless they are loaded already.
    pub fn initialize(&self) -> Result<&SemanticResources, SemanticSearchError> {
        Ok(self.resources.get_or_try_init(|| self.load())?)
    }

    /// Translate an optional caller-supplied result count into `k`.
    ///
    /// `None` selects the configured default; counts above the configured
    /// maximum are clamped to it. The result must still fit the index.
    pub fn resolve_limit(&self, requested: Option<i64>) -> Result<usize, SemanticSearchError> {
        let resources = self.initialize()?;

        let mut requested = requested.unwrap_or(self.config.default_results as i64);
        if requested > self.config.max_results as i64 {
            log::warn!(
                "requested {} results, clamping to {}",
                requested,
                self.config.max_results
            );
            requested = self.config.max_results as i64;
        }

        Ok(resolve_k(requested, resources.index().len())?)
    }

    /// Search for the `k` closest passages of every query.
    ///
    /// # Returns
    /// One list per query, in query order, closest passage first. Ranks for
    /// which the index reported no neighbour are left out.
    pub fn search<S: AsRef<str>>(
        &self,
        queries: &[S],
        k: usize,
    ) -> Result<Vec<Vec<Passage>>, SemanticSearchError> {
        let resources = self.initialize()?;
        let queries = preprocess_queries(queries, self.config.max_query_chars);

        let now = Instant::now();
        let results = vector_search(&queries, resources.embedder(), resources.index(), k)?;
        let titles = project(&results, resources.corpus(), resources.title_field)?;
        let texts = project(&results, resources.corpus(), resources.text_field)?;

        log::debug!(
            "searched {} queries (k={}) in {}ms",
            queries.len(),
            k,
            now.elapsed().as_micros() as f64 / 1000.0
        );

        let passages = results
            .iter()
            .zip(titles)
            .zip(texts)
            .map(|((neighbors, titles), texts)| {
                neighbors
                    .iter()
                    .zip(titles)
                    .zip(texts)
                    .filter_map(|((neighbor, title), text)| {
                        Some(Passage {
                            position: neighbor.position?,
                            distance: neighbor.distance,
                            title: title?.to_string(),
                            text: text?.to_string(),
                        })
                    })
                    .collect()
            })
            .collect();

        Ok(passages)
    }

    /// Describe the loaded resources.
    pub fn info(&self) -> Result<ServiceInfo, SemanticSearchError> {
        let resources = self.initialize()?;
        Ok(ServiceInfo {
            model: resources.embedder().name().to_string(),
            dimensions: resources.embedder().dimensions(),
            metric: match resources.index().metric() {
                Metric::L2 => "l2",
                Metric::Cosine => "cosine",
            },
            indexed: resources.index().len(),
            corpus_rows: resources.corpus().len(),
            fields: resources.corpus().fields().to_vec(),
        })
    }

    /// Perform actual loading.
    fn load(&self) -> Result<SemanticResources, ResourceLoadError> {
        let now = Instant::now();
        log::info!("Initializing semantic search with model '{}'", self.config.model);

        let timeout = Duration::from_secs(self.config.download_timeout_secs);
        let model = EmbeddingModel::new(&self.config.model, self.base_path.clone(), Some(timeout))?;

        let corpus_path = self.config.corpus_path(&self.base_path);
        let corpus = Corpus::load(&corpus_path).map_err(|source| ResourceLoadError::Corpus {
            path: corpus_path.clone(),
            source,
        })?;
        log::info!("Loaded {} passages from {}", corpus.len(), corpus_path.display());

        let index_path = self.config.index_path(&self.base_path);
        let storage = VectorStorage::new(index_path.clone());
        let index = storage
            .load(&model_id_hash(model.name()), model.dimensions())
            .map_err(|source| {
                log::error!("Failed to load vectors: {}", source);
                ResourceLoadError::Index {
                    path: index_path.clone(),
                    source,
                }
            })?;
        log::info!("Loaded {} vectors from {}", index.len(), index_path.display());

        let resources = SemanticResources::new(
            Arc::new(model),
            Arc::new(index),
            Arc::new(corpus),
            &self.config.title_field,
            &self.config.text_field,
        )?;

        log::info!(
            "semantic search ready in {}ms",
            now.elapsed().as_millis()
        );

        Ok(resources)
    }
}
