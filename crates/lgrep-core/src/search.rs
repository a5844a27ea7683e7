//! Query workflow: plan, recall, filter

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::{
    Backend, Config, LgrepError, Result,
    discover,
    embed::Embedder,
    filter::{CandidateFilter, Hit, truncate_to_boundary},
    plan::{Plan, QueryPlanner},
    store::MetadataStore,
    vector::{self, VectorIndex},
};

/// The plan that was applied and the hits it let through.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub plan: Plan,
    /// Semantic candidates recalled before filtering
    pub candidates: usize,
    pub hits: Vec<Hit>,
}

/// Lines around a hit, re-read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    pub first_line: usize,
    pub last_line: usize,
    pub text: String,
}

/// Searcher for querying the index.
pub struct Searcher {
    root: PathBuf,
    config: Config,
    embedder: Arc<dyn Embedder>,
    planner: QueryPlanner,
    index: Box<dyn VectorIndex>,
    store: MetadataStore,
}

impl Searcher {
    /// Create a searcher over `root` with the given config.
    ///
    /// The searcher is `Send + Sync`; concurrent queries may share it.
    pub fn open(root: PathBuf, config: Config, backend: &Backend) -> Result<Self> {
        let embedder = backend.embedder().clone();
        let planner = QueryPlanner::new(backend.generator().clone(), config.planner.max_tokens);
        let store = MetadataStore::open(&discover::store_path(&root))?;
        let index = vector::open_vector_index(&root, &config, embedder.dimension())?;

        Ok(Self {
            root,
            config,
            embedder,
            planner,
            index,
            store,
        })
    }

    /// Recall `k` nearest chunks for `query` and keep up to `max_hits` that pass its plan.
    pub fn query(&self, query: &str, k: usize, max_hits: usize) -> Result<QueryOutcome> {
        let plan = self.planner.compile(query);
        tracing::debug!("Plan for {:?}: {:?}", query, plan);

        let query_embedding = self.embedder.embed(query)?;
        let candidates = self.index.search(&query_embedding, k)?;

        let (plan, filter) = match CandidateFilter::new(&plan, &self.root) {
            Ok(filter) => (plan, filter),
            Err(LgrepError::InvalidRegex(e)) => {
                tracing::warn!("Dropping planner regex list: {}", e);
                let plan = plan.without_regex();
                let filter = CandidateFilter::new(&plan, &self.root)?;
                (plan, filter)
            }
            Err(e) => return Err(e),
        };

        let hits = filter.apply(&candidates, &self.store, max_hits)?;
        tracing::debug!("{} of {} candidates kept", hits.len(), candidates.len());

        Ok(QueryOutcome {
            plan,
            candidates: candidates.len(),
            hits,
        })
    }

    /// The hit's lines plus `context_lines` on either side, capped at `max_context_bytes`.
    pub fn context(&self, hit: &Hit) -> Result<ContextWindow> {
        let data = std::fs::read(self.root.join(&hit.file))?;
        let content = String::from_utf8_lossy(&data);
        let lines: Vec<&str> = content.split_inclusive('\n').collect();

        let context = self.config.context_lines;
        let first_line = hit.ls.saturating_sub(context).max(1);
        let last_line = (hit.le + context).min(lines.len());
        if first_line > last_line {
            return Ok(ContextWindow {
                first_line,
                last_line: first_line,
                text: String::new(),
            });
        }

        let text = lines[first_line - 1..last_line].concat();
        let text = truncate_to_boundary(&text, self.config.max_context_bytes).to_string();
        let last_line = first_line + text.lines().count().max(1) - 1;

        Ok(ContextWindow {
            first_line,
            last_line,
            text,
        })
    }
}
