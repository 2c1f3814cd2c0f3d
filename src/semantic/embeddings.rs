//! Sentence embeddings through fastembed.
//!
//! Models are resolved by their sentence-transformers name, fetched into
//! `<base>/models/` on first use and kept behind a lock, since fastembed
//! needs `&mut` to embed.

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{mpsc, Mutex};
use std::time::Duration;

const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Model names accepted in `search.model`, with the fastembed model each maps to.
const KNOWN_MODELS: &[(&str, fastembed::EmbeddingModel)] = &[
    (
        "paraphrase-multilingual-mpnet-base-v2",
        fastembed::EmbeddingModel::ParaphraseMLMpnetBaseV2,
    ),
    (
        "paraphrase-multilingual-minilm-l12-v2",
        fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2,
    ),
    (
        "multilingual-e5-small",
        fastembed::EmbeddingModel::MultilingualE5Small,
    ),
    (
        "multilingual-e5-base",
        fastembed::EmbeddingModel::MultilingualE5Base,
    ),
    (
        "multilingual-e5-large",
        fastembed::EmbeddingModel::MultilingualE5Large,
    ),
    ("all-minilm-l6-v2", fastembed::EmbeddingModel::AllMiniLML6V2),
    ("bge-small-en-v1.5", fastembed::EmbeddingModel::BGESmallENV15),
    ("bge-base-en-v1.5", fastembed::EmbeddingModel::BGEBaseENV15),
];

/// Anything that maps texts to fixed-length vectors.
///
/// Implementations must return one vector per input, in input order, and
/// must not change their output for the same input across calls.
pub trait Embedder: Send + Sync {
    /// Model identifier, used to tie a persisted index to its model.
    fn name(&self) -> &str;

    /// Length of every produced vector.
    fn dimensions(&self) -> usize;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// SHA-256 of the model name, stored in the index header.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    Sha256::digest(model_name.as_bytes()).into()
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("couldn't load model: {0}")]
    InitFailed(String),

    #[error("couldn't embed: {0}")]
    EmbeddingFailed(String),

    #[error("unknown model {0}")]
    InvalidModel(String),
}

pub struct EmbeddingModel {
    inner: Mutex<TextEmbedding>,
    name: String,
    dimensions: usize,
}

impl EmbeddingModel {
    /// Load `model_name`, downloading it into `cache_dir/models` if needed.
    ///
    /// Fails with [`EmbeddingError::InitFailed`] when loading takes longer
    /// than `download_timeout` (five minutes when `None`).
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let variant = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("{}: {}", models_dir.display(), e))
        })?;

        log::info!(
            "loading embedding model '{}' from {} (timeout {}s)",
            model_name,
            models_dir.display(),
            timeout.as_secs()
        );

        // fastembed blocks without a deadline, so the load runs on its own
        // thread and is abandoned once the timeout passes
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let options = InitOptions::new(variant)
                .with_cache_dir(models_dir)
                .with_show_download_progress(true);
            let loaded = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::InitFailed(e.to_string()))
                .and_then(|mut model| {
                    let dimensions = Self::measure_dimensions(&mut model)?;
                    Ok((model, dimensions))
                });
            let _ = tx.send(loaded);
        });

        let (model, dimensions) = await_loader(&rx, model_name, timeout)?;
        log::debug!("model '{}' produces {}-dim vectors", model_name, dimensions);

        Ok(Self {
            inner: Mutex::new(model),
            name: model_name.to_string(),
            dimensions,
        })
    }

    /// Resolve a configured name. Matching ignores case and an optional
    /// `sentence-transformers/` or `intfloat/` prefix.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        let lowered = name.to_lowercase();
        let bare = lowered
            .strip_prefix("sentence-transformers/")
            .or_else(|| lowered.strip_prefix("intfloat/"))
            .unwrap_or(&lowered);

        KNOWN_MODELS
            .iter()
            .find(|(known, _)| *known == bare)
            .map(|(_, variant)| variant.clone())
            .ok_or_else(|| {
                let known: Vec<&str> = KNOWN_MODELS.iter().map(|(known, _)| *known).collect();
                EmbeddingError::InvalidModel(format!(
                    "'{}', expected one of: {}",
                    name,
                    known.join(", ")
                ))
            })
    }

    fn measure_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        model
            .embed(vec!["dimensions"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("sample embedding: {}", e)))?
            .first()
            .map(Vec::len)
            .ok_or_else(|| EmbeddingError::InitFailed("sample embedding returned nothing".to_string()))
    }
}

/// Wait up to `timeout` for the loader thread's result.
///
/// On timeout the thread is not stopped; it keeps downloading until fastembed
/// returns, and its result is dropped.
fn await_loader<T>(
    rx: &mpsc::Receiver<Result<T, EmbeddingError>>,
    model_name: &str,
    timeout: Duration,
) -> Result<T, EmbeddingError> {
    match rx.recv_timeout(timeout) {
        Ok(loaded) => loaded,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            log::warn!(
                "model '{}' not ready after {}s, leaving the loader running in the background",
                model_name,
                timeout.as_secs()
            );
            Err(EmbeddingError::InitFailed(format!(
                "model '{}' not ready after {}s",
                model_name,
                timeout.as_secs()
            )))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
            "model loader exited without a result".to_string(),
        )),
    }
}

impl Embedder for EmbeddingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut model = self
            .inner
            .lock()
            .map_err(|e| EmbeddingError::EmbeddingFailed(format!("model lock poisoned: {}", e)))?;

        let vectors = model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "{} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_is_rejected_before_download() {
        let dir = tempfile::tempdir().unwrap();
        let result = EmbeddingModel::new("word2vec-klingon", dir.path().to_path_buf(), None);

        assert!(matches!(result, Err(EmbeddingError::InvalidModel(_))));
        assert!(!dir.path().join("models").exists());
    }

    #[test]
    fn model_names_ignore_case_and_prefix() {
        assert!(matches!(
            EmbeddingModel::parse_model_name("Paraphrase-Multilingual-MPNet-Base-v2"),
            Ok(fastembed::EmbeddingModel::ParaphraseMLMpnetBaseV2)
        ));
        assert!(matches!(
            EmbeddingModel::parse_model_name("sentence-transformers/paraphrase-multilingual-mpnet-base-v2"),
            Ok(fastembed::EmbeddingModel::ParaphraseMLMpnetBaseV2)
        ));
        assert!(matches!(
            EmbeddingModel::parse_model_name("intfloat/multilingual-e5-small"),
            Ok(fastembed::EmbeddingModel::MultilingualE5Small)
        ));
    }

    #[test]
    fn cross_en_de_roberta_is_not_built_in() {
        // no ONNX export ships with fastembed for this one
        assert!(matches!(
            EmbeddingModel::parse_model_name("T-Systems-onsite/cross-en-de-roberta-sentence-transformer"),
            Err(EmbeddingError::InvalidModel(_))
        ));
    }

    #[test]
    fn loader_timeout_is_init_failure() {
        let (tx, rx) = mpsc::channel::<Result<usize, EmbeddingError>>();

        let result = await_loader(&rx, "slow-model", Duration::from_millis(10));
        assert!(matches!(result, Err(EmbeddingError::InitFailed(msg)) if msg.contains("slow-model")));

        // a late result is still deliverable; nobody reads it
        assert!(tx.send(Ok(384)).is_ok());
    }

    #[test]
    fn loader_exit_without_result_is_init_failure() {
        let (tx, rx) = mpsc::channel::<Result<usize, EmbeddingError>>();
        drop(tx);

        let result = await_loader(&rx, "gone", Duration::from_secs(5));
        assert!(matches!(result, Err(EmbeddingError::InitFailed(_))));
    }

    #[test]
    fn loader_result_is_passed_through() {
        let (tx, rx) = mpsc::channel();
        tx.send(Ok(768)).unwrap();
        assert_eq!(await_loader(&rx, "ready", Duration::from_secs(5)).unwrap(), 768);

        tx.send(Err(EmbeddingError::InitFailed("corrupt".into()))).unwrap();
        assert!(matches!(
            await_loader(&rx, "ready", Duration::from_secs(5)),
            Err(EmbeddingError::InitFailed(msg)) if msg == "corrupt"
        ));
    }

    #[test]
    fn model_id_is_stable_per_name() {
        let mpnet = model_id_hash("paraphrase-multilingual-mpnet-base-v2");

        assert_eq!(mpnet, model_id_hash("paraphrase-multilingual-mpnet-base-v2"));
        assert_ne!(mpnet, model_id_hash("multilingual-e5-small"));
    }

    #[test]
    #[ignore = "requires model download"]
    fn batch_embedding_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let model = EmbeddingModel::new(
            "paraphrase-multilingual-minilm-l12-v2",
            dir.path().to_path_buf(),
            None,
        )
        .unwrap();
        assert_eq!(model.dimensions(), 384);

        let texts = vec!["Katzen sind Säugetiere".to_string(), "dogs bark".to_string()];
        let batch = model.embed(&texts).unwrap();
        let single = model.embed(&texts[..1]).unwrap();

        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|v| v.len() == 384));
        let drift: f32 = batch[0].iter().zip(&single[0]).map(|(a, b)| (a - b).abs()).sum();
        assert!(drift < 1e-2);
    }
}
