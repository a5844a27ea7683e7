//! Append-only vector index contract
//!
//! The id of a vector is its insertion ordinal. `add` is the only place ids
//! are handed out, so whatever the index returns is the id the matching chunk
//! row must be stored under.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    LgrepError, Result,
    config::{AnnBackend, Config},
    discover,
    edge::EdgeIndex,
};

/// An append-only nearest-neighbour index over fixed-dimension vectors.
///
/// `search` takes `&self`, so a shared index serves concurrent queries.
pub trait VectorIndex: Send + Sync {
    /// Configured vector length.
    fn dimension(&self) -> usize;

    /// Append a vector and return its id, which is the previous `size()`.
    fn add(&mut self, vector: &[f32]) -> Result<u64>;

    /// Up to `k` ids ordered nearest first. An empty index yields no ids.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<u64>>;

    /// Make every added vector durable.
    fn save(&mut self) -> Result<()>;

    /// Number of vectors, and therefore the next id `add` will return.
    fn size(&self) -> usize;
}

/// Fail with [`LgrepError::DimensionMismatch`] unless `vector` has `expected` entries.
pub fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(LgrepError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Open the index configured for a repository, creating it if absent.
pub fn open_vector_index(
    root: &Path,
    config: &Config,
    dimension: usize,
) -> Result<Box<dyn VectorIndex>> {
    Ok(match config.ann.backend {
        AnnBackend::Edge => Box::new(EdgeIndex::open_or_create(
            &discover::shard_dir(root),
            dimension,
            &config.ann,
        )?),
        AnnBackend::Flat => Box::new(FlatIndex::open_or_create(
            &discover::flat_index_path(root),
            dimension,
        )?),
    })
}

/// Remove the persisted index files for a repository.
pub fn remove_vector_index(root: &Path) -> Result<()> {
    let shard = discover::shard_dir(root);
    if shard.exists() {
        std::fs::remove_dir_all(&shard)?;
    }
    let flat = discover::flat_index_path(root);
    if flat.exists() {
        std::fs::remove_file(&flat)?;
    }
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct FlatFile {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

/// Brute-force index: exact L2 scan, persisted as one JSON file.
///
/// Ties are broken by id, so ordering is stable across runs.
pub struct FlatIndex {
    path: PathBuf,
    data: FlatFile,
}

impl FlatIndex {
    /// Load the index at `path`, or start an empty one if the file is absent.
    pub fn open_or_create(path: &Path, dimension: usize) -> Result<Self> {
        let data = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let data: FlatFile = serde_json::from_str(&content)?;
            if data.dimension != dimension {
                return Err(LgrepError::DimensionMismatch {
                    expected: dimension,
                    actual: data.dimension,
                });
            }
            data
        } else {
            FlatFile {
                dimension,
                vectors: Vec::new(),
            }
        };

        tracing::debug!(
            "Opened flat index {} with {} vectors",
            path.display(),
            data.vectors.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }
}

impl VectorIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.data.dimension
    }

    fn add(&mut self, vector: &[f32]) -> Result<u64> {
        check_dimension(self.data.dimension, vector)?;
        let id = self.data.vectors.len() as u64;
        self.data.vectors.push(vector.to_vec());
        Ok(id)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<u64>> {
        check_dimension(self.data.dimension, query)?;

        let mut scored: Vec<(f32, u64)> = self
            .data
            .vectors
            .iter()
            .enumerate()
            .map(|(id, v)| (squared_l2(query, v), id as u64))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        Ok(scored.into_iter().take(k).map(|(_, id)| id).collect())
    }

    fn save(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Replace the saved file in one rename so a crash mid-write keeps the old one.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&self.data)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn size(&self) -> usize {
        self.data.vectors.len()
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_insertion_ordinals() {
        let temp = tempfile::tempdir().unwrap();
        let mut index = FlatIndex::open_or_create(&temp.path().join("v.json"), 2).unwrap();

        assert_eq!(index.add(&[1.0, 0.0]).unwrap(), 0);
        assert_eq!(index.add(&[0.0, 1.0]).unwrap(), 1);
        assert_eq!(index.add(&[0.5, 0.5]).unwrap(), 2);
        assert_eq!(index.size(), 3);
    }

    #[test]
    fn search_orders_nearest_first() {
        let temp = tempfile::tempdir().unwrap();
        let mut index = FlatIndex::open_or_create(&temp.path().join("v.json"), 2).unwrap();
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        index.add(&[0.7, 0.7]).unwrap();

        assert_eq!(index.search(&[0.9, 0.1], 3).unwrap(), vec![0, 2, 1]);
        assert_eq!(index.search(&[0.9, 0.1], 1).unwrap(), vec![0]);
    }

    #[test]
    fn ties_break_by_id() {
        let temp = tempfile::tempdir().unwrap();
        let mut index = FlatIndex::open_or_create(&temp.path().join("v.json"), 1).unwrap();
        index.add(&[1.0]).unwrap();
        index.add(&[-1.0]).unwrap();

        assert_eq!(index.search(&[0.0], 2).unwrap(), vec![0, 1]);
    }

    #[test]
    fn empty_index_returns_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let index = FlatIndex::open_or_create(&temp.path().join("v.json"), 3).unwrap();
        assert!(index.search(&[0.0, 0.0, 1.0], 10).unwrap().is_empty());
    }

    #[test]
    fn wrong_length_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let mut index = FlatIndex::open_or_create(&temp.path().join("v.json"), 3).unwrap();

        assert!(matches!(
            index.add(&[1.0, 0.0]),
            Err(LgrepError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            index.search(&[1.0], 5),
            Err(LgrepError::DimensionMismatch { expected: 3, actual: 1 })
        ));
        assert_eq!(index.size(), 0);
    }

    #[test]
    fn save_then_reopen_reproduces_search() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("index").join("v.json");
        let query = [0.3, 0.9];

        let before = {
            let mut index = FlatIndex::open_or_create(&path, 2).unwrap();
            for v in [[1.0, 0.0], [0.0, 1.0], [0.6, 0.6], [0.2, 0.8]] {
                index.add(&v).unwrap();
            }
            index.save().unwrap();
            index.search(&query, 4).unwrap()
        };

        let mut reopened = FlatIndex::open_or_create(&path, 2).unwrap();
        assert_eq!(reopened.size(), 4);
        assert_eq!(reopened.search(&query, 4).unwrap(), before);
        assert_eq!(reopened.add(&[0.0, 0.0]).unwrap(), 4);
    }

    #[test]
    fn unsaved_vectors_are_lost() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("v.json");
        {
            let mut index = FlatIndex::open_or_create(&path, 1).unwrap();
            index.add(&[1.0]).unwrap();
        }
        assert_eq!(FlatIndex::open_or_create(&path, 1).unwrap().size(), 0);
    }

    #[test]
    fn reopening_with_other_dimension_fails() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("v.json");
        let mut index = FlatIndex::open_or_create(&path, 2).unwrap();
        index.add(&[1.0, 1.0]).unwrap();
        index.save().unwrap();

        assert!(matches!(
            FlatIndex::open_or_create(&path, 4),
            Err(LgrepError::DimensionMismatch { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn interrupted_save_keeps_previous_vectors() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("v.json");
        let mut index = FlatIndex::open_or_create(&path, 2).unwrap();
        index.add(&[1.0, 0.0]).unwrap();
        index.save().unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        // A write cut short leaves only a partial temporary file behind.
        std::fs::write(path.with_extension("json.tmp"), b"{\"dimension\": 2, \"vec").unwrap();

        let reopened = FlatIndex::open_or_create(&path, 2).unwrap();
        assert_eq!(reopened.size(), 1);
    }

    #[test]
    fn boxed_index_is_shareable() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn VectorIndex>();
    }
}
