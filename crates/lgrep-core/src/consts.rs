/// The name of the lgrep folder (like .git)
pub const LGREP_DIR: &str = ".lgrep";

/// Default embedding model
pub const DEFAULT_MODEL: &str = "bge-small-en-v1.5";

/// Embedding dimension of bge-small-en-v1.5
pub const DEFAULT_DIM: usize = 384;

/// Default chunk window in lines
pub const DEFAULT_CHUNK_SIZE: usize = 150;

/// Default number of lines shared by neighbouring chunks
pub const DEFAULT_CHUNK_OVERLAP: usize = 20;

/// Default ANN recall width
pub const DEFAULT_K: usize = 80;

/// Default result cap after filtering
pub const DEFAULT_MAX_HITS: usize = 20;

/// Default fan-out of the ANN graph
pub const DEFAULT_HNSW_M: usize = 16;

/// Default construction breadth of the ANN graph
pub const DEFAULT_EF_CONSTRUCT: usize = 200;

/// Default search breadth for the ANN graph
pub const DEFAULT_EF_SEARCH: usize = 64;

/// Lines of context shown around a hit
pub const DEFAULT_CONTEXT_LINES: usize = 5;

/// Cap on an expanded context window, in bytes
pub const DEFAULT_MAX_CONTEXT_BYTES: usize = 1200;

/// Default planner endpoint (Ollama-compatible)
pub const DEFAULT_PLANNER_ENDPOINT: &str = "http://127.0.0.1:11434";

/// Default planner model
pub const DEFAULT_PLANNER_MODEL: &str = "qwen2.5:1.5b-instruct";

/// Generation budget for a plan, in tokens
pub const DEFAULT_PLANNER_MAX_TOKENS: usize = 256;

/// Upper bound on bytes re-read from disk per candidate
pub const MAX_CANDIDATE_BYTES: usize = 2000;

/// Snippet length of a hit, in bytes
pub const SNIPPET_BYTES: usize = 300;
