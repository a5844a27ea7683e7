//! Configuration handling for .lgrep/config.json

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_CONTEXT_LINES, DEFAULT_DIM,
    DEFAULT_EF_CONSTRUCT, DEFAULT_EF_SEARCH, DEFAULT_HNSW_M, DEFAULT_K,
    DEFAULT_MAX_CONTEXT_BYTES, DEFAULT_MAX_HITS, DEFAULT_MODEL, DEFAULT_PLANNER_ENDPOINT,
    DEFAULT_PLANNER_MAX_TOKENS, DEFAULT_PLANNER_MODEL, Result,
    chunk::ChunkParams, discover,
};

/// Environment variable overriding the planner endpoint.
pub const PLANNER_URL_ENV: &str = "LGREP_PLANNER_URL";

/// Configuration stored in .lgrep/config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Embedding model name (fastembed model ID)
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_dim")]
    pub dimension: usize,

    /// Chunk window in lines
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Lines shared by neighbouring chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// ANN recall width
    #[serde(default = "default_k")]
    pub k: usize,

    /// Result cap after filtering
    #[serde(default = "default_max_hits")]
    pub max_hits: usize,

    /// Lines of context shown on each side of a hit
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,

    /// Cap on an expanded context window, in bytes
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,

    /// File extensions to exclude, on top of the built-in binary denylist
    #[serde(default)]
    pub exclude_extensions: Vec<String>,

    /// Honour .gitignore and hidden-file rules while walking
    #[serde(default)]
    pub respect_gitignore: bool,

    #[serde(default)]
    pub ann: AnnConfig,

    #[serde(default)]
    pub planner: PlannerConfig,
}

/// Which vector index implementation backs the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnBackend {
    /// Qdrant Edge shard indexed with HNSW.
    #[default]
    Edge,
    /// Brute-force scan persisted as JSON.
    Flat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnConfig {
    #[serde(default)]
    pub backend: AnnBackend,

    /// Graph fan-out (HNSW `m`)
    #[serde(default = "default_hnsw_m")]
    pub m: usize,

    /// Construction breadth (HNSW `ef_construct`)
    #[serde(default = "default_ef_construct")]
    pub ef_construct: usize,

    /// Search breadth (HNSW `ef`)
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Base URL of an Ollama-compatible generation server
    #[serde(default = "default_planner_endpoint")]
    pub endpoint: String,

    /// Generation model name
    #[serde(default = "default_planner_model")]
    pub model: String,

    /// Generation budget per plan, in tokens
    #[serde(default = "default_planner_max_tokens")]
    pub max_tokens: usize,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_dim() -> usize {
    DEFAULT_DIM
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn default_k() -> usize {
    DEFAULT_K
}

fn default_max_hits() -> usize {
    DEFAULT_MAX_HITS
}

fn default_context_lines() -> usize {
    DEFAULT_CONTEXT_LINES
}

fn default_max_context_bytes() -> usize {
    DEFAULT_MAX_CONTEXT_BYTES
}

fn default_hnsw_m() -> usize {
    DEFAULT_HNSW_M
}

fn default_ef_construct() -> usize {
    DEFAULT_EF_CONSTRUCT
}

fn default_ef_search() -> usize {
    DEFAULT_EF_SEARCH
}

fn default_planner_endpoint() -> String {
    DEFAULT_PLANNER_ENDPOINT.to_string()
}

fn default_planner_model() -> String {
    DEFAULT_PLANNER_MODEL.to_string()
}

fn default_planner_max_tokens() -> usize {
    DEFAULT_PLANNER_MAX_TOKENS
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            backend: AnnBackend::default(),
            m: default_hnsw_m(),
            ef_construct: default_ef_construct(),
            ef_search: default_ef_search(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_planner_endpoint(),
            model: default_planner_model(),
            max_tokens: default_planner_max_tokens(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            dimension: default_dim(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            k: default_k(),
            max_hits: default_max_hits(),
            context_lines: default_context_lines(),
            max_context_bytes: default_max_context_bytes(),
            exclude_extensions: Vec::new(),
            respect_gitignore: false,
            ann: AnnConfig::default(),
            planner: PlannerConfig::default(),
        }
    }
}

impl Config {
    /// Load config from the .lgrep directory.
    ///
    /// `LGREP_PLANNER_URL`, when set, replaces the stored planner endpoint.
    pub fn load(root: &Path) -> Result<Self> {
        let path = discover::config_path(root);
        let mut config: Self = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Self::default()
        };

        if let Ok(endpoint) = std::env::var(PLANNER_URL_ENV) {
            if !endpoint.trim().is_empty() {
                config.planner.endpoint = endpoint;
            }
        }

        Ok(config)
    }

    /// Save config to the .lgrep directory.
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = discover::config_path(root);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Chunking window taken from this config, validated.
    pub fn chunk_params(&self) -> Result<ChunkParams> {
        ChunkParams::new(self.chunk_size, self.chunk_overlap)
    }
}
