//! Indexing logic: walk files, chunk, embed, append to the vector index,
//! record chunk locations under the id the index assigned

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::{
    Config, Result,
    chunk::{self, ChunkParams, ChunkText, WalkOptions},
    discover,
    embed::Embedder,
    store::MetadataStore,
    vector::{self, VectorIndex, check_dimension},
};

/// Text embedded once per run to verify the model before any work is done.
const SAMPLE_TEXT: &str = "lgrep embedding check";

/// Progress events emitted during indexing.
#[derive(Debug, Clone)]
pub enum ProgressEvent<'a> {
    /// Files found to consider.
    Scanning { count: usize },
    /// Indexing a specific file.
    Indexing {
        current: usize,
        total: usize,
        path: &'a Path,
    },
    /// Generating embeddings for one file's chunks.
    Embedding { chunks: usize },
}

/// Type alias for progress callback.
pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send>;

/// A file the run could not index.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Stats from an indexing run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IndexStats {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_empty: usize,
    /// Files with stored chunks that no longer exist
    pub files_removed: usize,
    pub chunks_created: usize,
    /// Chunk rows dropped because their file changed or disappeared
    pub chunks_retired: usize,
    /// Id of the first chunk added by this run
    pub first_id: u64,
    /// Id the next run will start from
    pub next_id: u64,
    pub skipped: Vec<SkippedFile>,
}

/// How the stored chunk rows line up with the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Vectors in the index
    pub vectors: usize,
    /// Rows in the metadata store
    pub chunk_rows: usize,
    /// Highest stored chunk id
    pub max_chunk_id: Option<u64>,
    /// Rows whose id has no vector (lost by a crash before save)
    pub rows_without_vector: usize,
}

impl ConsistencyReport {
    /// Vectors with no chunk row, wherever they sit in the index.
    /// These are skipped at query time.
    pub fn orphan_vectors(&self) -> usize {
        self.vectors
            .saturating_sub(self.chunk_rows.saturating_sub(self.rows_without_vector))
    }

    /// Every chunk row has a vector. Orphan vectors are allowed.
    pub fn is_consistent(&self) -> bool {
        self.rows_without_vector == 0
            && self
                .max_chunk_id
                .is_none_or(|id| id < self.vectors as u64)
    }
}

/// Compare the vector count against the stored chunk ids.
pub fn check_consistency(
    index: &dyn VectorIndex,
    store: &MetadataStore,
) -> Result<ConsistencyReport> {
    let vectors = index.size();
    Ok(ConsistencyReport {
        vectors,
        chunk_rows: store.count()?,
        max_chunk_id: store.max_id()?,
        rows_without_vector: store.count_from(vectors as u64)?,
    })
}

/// Open a repository's stores without loading any model and compare them.
pub fn inspect(root: &Path, config: &Config) -> Result<ConsistencyReport> {
    let store = MetadataStore::open(&discover::store_path(root))?;
    let index = vector::open_vector_index(root, config, config.dimension)?;
    check_consistency(index.as_ref(), &store)
}

/// The indexer orchestrates file discovery, embedding, and storage.
pub struct Indexer {
    root: PathBuf,
    config: Config,
    embedder: Arc<dyn Embedder>,
    index: Box<dyn VectorIndex>,
    store: MetadataStore,
    progress_callback: Option<ProgressCallback>,
}

impl Indexer {
    /// Create an indexer over `root` with the given config and embedder.
    pub fn open(root: PathBuf, config: Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let store = MetadataStore::open(&discover::store_path(&root))?;
        let index = vector::open_vector_index(&root, &config, embedder.dimension())?;

        Ok(Self {
            root,
            config,
            embedder,
            index,
            store,
            progress_callback: None,
        })
    }

    /// Delete every stored chunk and vector of a repository.
    ///
    /// Must run before an indexer or searcher opens the same repository.
    pub fn reset(root: &Path) -> Result<()> {
        MetadataStore::open(&discover::store_path(root))?.clear()?;
        vector::remove_vector_index(root)?;
        tracing::info!("Reset index at {}", discover::lgrep_dir(root).display());
        Ok(())
    }

    /// Set a callback to receive progress updates during indexing.
    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress_callback = Some(callback);
    }

    /// Emit a progress event if a callback is registered.
    fn emit_progress(&self, event: ProgressEvent) {
        if let Some(ref callback) = self.progress_callback {
            callback(event);
        }
    }

    /// Index a folder or a single file (relative to repo root) with `params`.
    ///
    /// Files whose content hash is unchanged since the last run are skipped.
    /// A changed file's old chunk rows are dropped and its chunks are appended
    /// under fresh ids. When a folder is indexed, stored files under it that
    /// no longer exist are dropped too.
    pub fn index(&mut self, path: Option<&Path>, params: ChunkParams) -> Result<IndexStats> {
        let start_path = match path {
            Some(p) => self.root.join(p),
            None => self.root.clone(),
        };
        let options = WalkOptions {
            exclude_extensions: self.config.exclude_extensions.clone(),
            respect_gitignore: self.config.respect_gitignore,
        };
        let files = chunk::collect_files(&start_path, &options)?;
        let single_file = start_path.is_file();

        // Fail fast on an unusable model or a model/index dimension mismatch.
        let sample = self.embedder.embed(SAMPLE_TEXT)?;
        check_dimension(self.index.dimension(), &sample)?;

        let mut stats = IndexStats {
            files_scanned: files.len(),
            first_id: self.index.size() as u64,
            ..IndexStats::default()
        };
        self.emit_progress(ProgressEvent::Scanning { count: files.len() });

        // Hashes are recorded only after the index is saved, so a crash
        // mid-run leaves those files eligible for re-indexing.
        let mut indexed_files: Vec<(String, String)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::with_capacity(files.len());

        let total_files = files.len();
        for (i, path) in files.iter().enumerate() {
            self.emit_progress(ProgressEvent::Indexing {
                current: i + 1,
                total: total_files,
                path,
            });

            let rel_path = relative_path(&self.root, path);
            seen.insert(rel_path.clone());

            let data = match std::fs::read(path) {
                Ok(data) => data,
                Err(e) if single_file => return Err(e.into()),
                Err(e) => {
                    tracing::debug!("Skipping unreadable {}: {}", path.display(), e);
                    stats.skipped.push(SkippedFile {
                        path: rel_path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let hash = blake3::hash(&data).to_hex().to_string();
            match self.store.file_hash(&rel_path)? {
                Some(existing) if existing == hash => {
                    stats.files_unchanged += 1;
                    continue;
                }
                Some(_) => stats.chunks_retired += self.store.forget_file(&rel_path)?,
                None => {}
            }

            let chunks = chunk::chunk_bytes(&rel_path, &data, params)?;
            if chunks.is_empty() {
                stats.files_empty += 1;
                indexed_files.push((rel_path, hash));
                continue;
            }

            self.emit_progress(ProgressEvent::Embedding {
                chunks: chunks.len(),
            });
            let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
            let embeddings = match self.embedder.embed_batch(&texts) {
                Ok(embeddings) => embeddings,
                Err(e) => {
                    tracing::warn!("Failed to embed {}: {}", rel_path, e);
                    stats.skipped.push(SkippedFile {
                        path: rel_path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for (chunk, embedding) in chunks.iter().zip(&embeddings) {
                self.commit(chunk, embedding)?;
            }

            stats.files_indexed += 1;
            stats.chunks_created += chunks.len();
            indexed_files.push((rel_path, hash));
        }

        if !single_file {
            let scope = PathBuf::from(relative_path(&self.root, &start_path));
            for known in self.store.known_files()? {
                if seen.contains(&known) || !Path::new(&known).starts_with(&scope) {
                    continue;
                }
                tracing::debug!("Dropping deleted file {}", known);
                stats.chunks_retired += self.store.forget_file(&known)?;
                stats.files_removed += 1;
            }
        }

        self.index.save()?;
        for (rel_path, hash) in &indexed_files {
            self.store.record_file(rel_path, hash)?;
        }

        stats.next_id = self.index.size() as u64;
        tracing::info!(
            "Indexed {} files ({} chunks, ids {}..{}), {} unchanged, {} removed, {} skipped",
            stats.files_indexed,
            stats.chunks_created,
            stats.first_id,
            stats.next_id,
            stats.files_unchanged,
            stats.files_removed,
            stats.skipped.len()
        );

        Ok(stats)
    }

    /// Append one chunk's vector and store its row under the id just assigned.
    ///
    /// This is the only place chunk ids come from.
    fn commit(&mut self, chunk: &ChunkText, embedding: &[f32]) -> Result<u64> {
        let id = self.index.add(embedding)?;
        if let Err(e) = self.store.upsert(&chunk.with_id(id)) {
            tracing::error!("Chunk {} has a vector but no row: {}", id, e);
            return Err(e);
        }
        tracing::debug!("Committed chunk {} ({}:{}-{})", id, chunk.file, chunk.ls, chunk.le);
        Ok(id)
    }

    /// Get the current vector count.
    pub fn count(&self) -> usize {
        self.index.size()
    }

    /// Compare the vector index against the metadata store.
    pub fn check(&self) -> Result<ConsistencyReport> {
        check_consistency(self.index.as_ref(), &self.store)
    }

    /// The store backing this indexer.
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }
}

/// Path of `path` relative to `root`, or unchanged if it lies outside.
fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}
