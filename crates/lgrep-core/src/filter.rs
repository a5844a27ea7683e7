//! Keyword and regex narrowing of semantically recalled candidates
//!
//! Candidates are visited in the order the vector index returned them and are
//! never re-ranked. Evaluation stops as soon as `max_hits` have been accepted.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::{
    LgrepError, MAX_CANDIDATE_BYTES, Result, SNIPPET_BYTES,
    plan::Plan,
    store::{Chunk, MetadataStore},
};

/// A candidate that passed every filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hit {
    pub id: u64,
    pub file: String,
    pub ls: usize,
    pub le: usize,
    /// Leading bytes of the chunk text
    pub snippet: String,
}

/// Resolves a candidate id to its chunk location.
pub trait ChunkLookup {
    fn lookup(&self, id: u64) -> Result<Chunk>;
}

impl ChunkLookup for MetadataStore {
    fn lookup(&self, id: u64) -> Result<Chunk> {
        self.get(id)
    }
}

/// A compiled [`Plan`], ready to test candidates.
#[derive(Debug)]
pub struct CandidateFilter {
    root: PathBuf,
    filters: Vec<String>,
    regexes: Vec<Regex>,
}

impl CandidateFilter {
    /// Compile `plan`; chunk paths are resolved against `root`.
    ///
    /// An invalid pattern is reported here as [`LgrepError::InvalidRegex`].
    pub fn new(plan: &Plan, root: &Path) -> Result<Self> {
        let filters = plan
            .filters
            .iter()
            .filter(|f| !f.is_empty())
            .map(|f| f.to_lowercase())
            .collect();

        let regexes = plan
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| LgrepError::InvalidRegex(format!("{pattern}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            root: root.to_path_buf(),
            filters,
            regexes,
        })
    }

    /// Turn ranked candidate ids into at most `max_hits` hits, in candidate order.
    ///
    /// Ids without a chunk row and chunks whose file cannot be read are
    /// skipped. Other store failures are returned.
    pub fn apply(
        &self,
        candidates: &[u64],
        store: &dyn ChunkLookup,
        max_hits: usize,
    ) -> Result<Vec<Hit>> {
        let mut hits = Vec::with_capacity(max_hits.min(candidates.len()));
        if max_hits == 0 {
            return Ok(hits);
        }

        for &id in candidates {
            let chunk = match store.lookup(id) {
                Ok(chunk) => chunk,
                Err(LgrepError::NotFound(_)) => {
                    tracing::debug!("Skipping candidate {} with no chunk row", id);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let text = match self.read_text(&chunk) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Skipping candidate {} ({}): {}", id, chunk.file, e);
                    continue;
                }
            };

            if !self.accepts(&chunk.file, &text) {
                continue;
            }

            hits.push(Hit {
                id,
                file: chunk.file,
                ls: chunk.ls,
                le: chunk.le,
                snippet: truncate_to_boundary(&text, SNIPPET_BYTES).to_string(),
            });
            if hits.len() >= max_hits {
                break;
            }
        }

        Ok(hits)
    }

    /// Test one chunk against the keyword and regex filters.
    pub fn accepts(&self, file: &str, text: &str) -> bool {
        if !self.filters.is_empty() {
            let haystack = format!("{file} {text}").to_lowercase();
            if !self.filters.iter().all(|f| haystack.contains(f.as_str())) {
                return false;
            }
        }

        self.regexes.is_empty() || self.regexes.iter().any(|r| r.is_match(text))
    }

    /// Re-read the chunk's bytes from disk, bounded to [`MAX_CANDIDATE_BYTES`].
    fn read_text(&self, chunk: &Chunk) -> Result<String> {
        let len = chunk
            .byte_end
            .saturating_sub(chunk.byte_start)
            .min(MAX_CANDIDATE_BYTES as u64);

        let mut file = File::open(self.root.join(&chunk.file))?;
        file.seek(SeekFrom::Start(chunk.byte_start))?;

        let mut buf = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Longest prefix of `text` no longer than `max` bytes that ends on a char boundary.
pub fn truncate_to_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
