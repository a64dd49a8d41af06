use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_index_url(),
            index_name: default_index_name(),
            username: None,
            password: None,
            accept_invalid_certs: default_accept_invalid_certs(),
            timeout_secs: default_index_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "opensearch".to_string()
}
fn default_index_url() -> String {
    "https://localhost:9200".to_string()
}
fn default_index_name() -> String {
    "bookshelf".to_string()
}
fn default_accept_invalid_certs() -> bool {
    true
}
fn default_index_timeout_secs() -> u64 {
    5
}

impl IndexConfig {
    pub fn is_enabled(&self) -> bool {
        self.backend != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Apply `OPENSEARCH_URL`, `OPENSEARCH_USER` and `OPENSEARCH_PASSWORD`
    /// from the environment on top of the file values.
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("OPENSEARCH_URL") {
            self.url = url;
        }
        if let Ok(user) = std::env::var("OPENSEARCH_USER") {
            self.username = Some(user);
        }
        if let Ok(password) = std::env::var("OPENSEARCH_PASSWORD") {
            self.password = Some(password);
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_pages_per_chunk")]
    pub pages_per_chunk: usize,
    #[serde(default = "default_overlap_pages")]
    pub overlap_pages: usize,
    #[serde(default = "default_toc_page_limit")]
    pub toc_page_limit: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            pages_per_chunk: default_pages_per_chunk(),
            overlap_pages: default_overlap_pages(),
            toc_page_limit: default_toc_page_limit(),
        }
    }
}

fn default_pages_per_chunk() -> usize {
    5
}
fn default_overlap_pages() -> usize {
    2
}
fn default_toc_page_limit() -> usize {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_initial_page_limit")]
    pub initial_page_limit: usize,
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,
    #[serde(default = "default_window_overlap")]
    pub window_overlap: usize,
    #[serde(default = "default_min_window_chars")]
    pub min_window_chars: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    #[serde(default = "default_extraction_timeout_secs")]
    pub extraction_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            initial_page_limit: default_initial_page_limit(),
            window_chars: default_window_chars(),
            window_overlap: default_window_overlap(),
            min_window_chars: default_min_window_chars(),
            snippet_chars: default_snippet_chars(),
            extraction_timeout_secs: default_extraction_timeout_secs(),
        }
    }
}

fn default_top_k() -> usize {
    20
}
fn default_initial_page_limit() -> usize {
    50
}
fn default_window_chars() -> usize {
    800
}
fn default_window_overlap() -> usize {
    150
}
fn default_min_window_chars() -> usize {
    50
}
fn default_snippet_chars() -> usize {
    200
}
fn default_extraction_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Maximum number of documents held in the extraction cache.
    /// Absent means unbounded.
    #[serde(default)]
    pub cache_capacity: Option<usize>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            cache_capacity: None,
        }
    }
}

fn default_workers() -> usize {
    2
}
fn default_queue_depth() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            sync_timeout_secs: default_sync_timeout_secs(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_sync_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    config.index.apply_env();
    Ok(config)
}

/// Parse and validate configuration text without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    let chunking = &config.chunking;
    if chunking.pages_per_chunk == 0 {
        anyhow::bail!("chunking.pages_per_chunk must be > 0");
    }
    if chunking.overlap_pages >= chunking.pages_per_chunk {
        anyhow::bail!(
            "chunking.overlap_pages ({}) must be smaller than chunking.pages_per_chunk ({})",
            chunking.overlap_pages,
            chunking.pages_per_chunk
        );
    }

    // Validate retrieval
    let retrieval = &config.retrieval;
    if retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if retrieval.initial_page_limit == 0 {
        anyhow::bail!("retrieval.initial_page_limit must be >= 1");
    }
    if retrieval.window_overlap >= retrieval.window_chars {
        anyhow::bail!("retrieval.window_overlap must be smaller than retrieval.window_chars");
    }

    // Validate extraction
    if config.extraction.workers == 0 {
        anyhow::bail!("extraction.workers must be >= 1");
    }
    if config.extraction.queue_depth == 0 {
        anyhow::bail!("extraction.queue_depth must be >= 1");
    }
    if config.extraction.cache_capacity == Some(0) {
        anyhow::bail!("extraction.cache_capacity must be >= 1 when set");
    }

    match config.index.backend.as_str() {
        "opensearch" | "memory" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown index backend: '{}'. Must be opensearch, memory, or disabled.",
            other
        ),
    }

    Ok(())
}
