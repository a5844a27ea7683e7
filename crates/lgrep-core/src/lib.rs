//! lgrep-core: hybrid semantic + lexical search over a folder of text files
//!
//! Files are split into overlapping line windows, each window is embedded and
//! appended to an ANN index, and its location is recorded in a SQLite store
//! under the same integer id. Queries are compiled into a conservative filter
//! plan, recalled semantically, then narrowed with keyword and regex filters.

pub mod backend;
pub mod chunk;
pub mod config;
pub mod consts;
pub mod discover;
pub mod edge;
pub mod embed;
pub mod filter;
pub mod generate;
pub mod index;
pub mod plan;
pub mod search;
pub mod store;
pub mod vector;

pub use backend::Backend;
pub use chunk::{ChunkParams, ChunkText};
pub use config::Config;
pub use consts::*;
pub use discover::find_lgrep_root;
pub use filter::{CandidateFilter, Hit};
pub use index::{IndexStats, Indexer};
pub use plan::{Plan, QueryPlanner};
pub use search::Searcher;
pub use store::{Chunk, MetadataStore};
pub use vector::VectorIndex;

#[derive(Debug, thiserror::Error)]
pub enum LgrepError {
    #[error("Not in an lgrep repository (no .lgrep folder found)")]
    NotInRepo,

    #[error("Already initialized: {0}")]
    AlreadyInitialized(std::path::PathBuf),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid chunking: window of {size} lines with overlap {overlap} never advances")]
    InvalidChunking { size: usize, overlap: usize },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("No chunk with id {0}")]
    NotFound(u64),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Vector index error: {0}")]
    Vector(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Invalid regex: {0}")]
    InvalidRegex(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, LgrepError>;
