use crate::{
    semantic::{DEFAULT_MAX_QUERY_CHARS, DEFAULT_MODEL},
    storage::{BackendLocal, StorageManager},
};
use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.yaml";

/// Default number of passages shown per query
const DEFAULT_RESULTS: usize = 20;
/// Upper bound for a requested number of passages
const DEFAULT_MAX_RESULTS: usize = 30;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Configuration for the passage search
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// Model name for embeddings (e.g., "paraphrase-multilingual-mpnet-base-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Passage CSV, relative to the base directory unless absolute
    #[serde(default = "default_corpus_path")]
    pub corpus_path: PathBuf,

    /// Serialized similarity index, relative to the base directory unless absolute
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Corpus column holding the source title
    #[serde(default = "default_title_field")]
    pub title_field: String,

    /// Corpus column holding the passage text
    #[serde(default = "default_text_field")]
    pub text_field: String,

    /// Number of passages returned when a caller does not ask for a count
    #[serde(default = "default_results")]
    pub default_results: usize,

    /// Requested counts above this are clamped
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Queries are cut to this many characters before embedding
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            corpus_path: default_corpus_path(),
            index_path: default_index_path(),
            title_field: default_title_field(),
            text_field: default_text_field(),
            default_results: DEFAULT_RESULTS,
            max_results: DEFAULT_MAX_RESULTS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            max_query_chars: DEFAULT_MAX_QUERY_CHARS,
        }
    }
}

impl SearchConfig {
    pub fn corpus_path(&self, base_path: &Path) -> PathBuf {
        base_path.join(&self.corpus_path)
    }

    pub fn index_path(&self, base_path: &Path) -> PathBuf {
        base_path.join(&self.index_path)
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_corpus_path() -> PathBuf {
    PathBuf::from("sentences.csv")
}

fn default_index_path() -> PathBuf {
    PathBuf::from("vectors.bin")
}

fn default_title_field() -> String {
    "Title".to_string()
}

fn default_text_field() -> String {
    "Text".to_string()
}

fn default_results() -> usize {
    DEFAULT_RESULTS
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_max_query_chars() -> usize {
    DEFAULT_MAX_QUERY_CHARS
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

/// Base directory for config, corpus and index: `ORAKEL_BASE_PATH` or
/// `~/.local/share/orakel`.
pub fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("ORAKEL_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = homedir::my_home()
        .ok()
        .flatten()
        .ok_or_else(|| anyhow!("couldn't find home dir, set ORAKEL_BASE_PATH"))?;
    Ok(home.join(".local/share/orakel"))
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let search = &self.search;

        if search.model.trim().is_empty() {
            bail!("search.model must not be empty");
        }

        if search.title_field.is_empty() || search.text_field.is_empty() {
            bail!("search.title_field and search.text_field must not be empty");
        }

        if search.default_results == 0 {
            bail!("search.default_results must be greater than 0");
        }

        if search.max_results < search.default_results {
            bail!(
                "search.max_results ({}) must not be below search.default_results ({})",
                search.max_results,
                search.default_results
            );
        }

        if search.download_timeout_secs == 0 {
            bail!("search.download_timeout_secs must be greater than 0");
        }

        if search.max_query_chars == 0 {
            bail!("search.max_query_chars must be greater than 0");
        }

        Ok(())
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let store = BackendLocal::new(base_path)
            .with_context(|| format!("couldn't create {}", base_path.display()))?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            log::info!("writing default config to {}", base_path.join(CONFIG_FILE).display());
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_bytes = store.read(CONFIG_FILE)?;
        let config_str = String::from_utf8(config_bytes).context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        Ok(config)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}
