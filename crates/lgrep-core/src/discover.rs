//! Discovery module: Find .lgrep root by walking up the directory tree

use std::path::{Path, PathBuf};

use crate::{Config, LGREP_DIR, LgrepError, Result};

/// Find the .lgrep root directory by walking up from the given path.
///
/// Returns the path to the directory containing .lgrep (not the .lgrep folder itself).
pub fn find_lgrep_root(start: &Path) -> Result<PathBuf> {
    let mut current = start.canonicalize()?;

    loop {
        if lgrep_dir(&current).is_dir() {
            return Ok(current);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return Err(LgrepError::NotInRepo),
        }
    }
}

/// Create `.lgrep` under `root` with a default config.
pub fn init_repository(root: &Path) -> Result<PathBuf> {
    let dir = lgrep_dir(root);
    if dir.exists() {
        return Err(LgrepError::AlreadyInitialized(dir));
    }

    std::fs::create_dir(&dir)?;
    Config::default().save(root)?;
    Ok(dir)
}

/// Get the .lgrep directory path for a given root.
pub fn lgrep_dir(root: &Path) -> PathBuf {
    root.join(LGREP_DIR)
}

/// Get the config file path.
pub fn config_path(root: &Path) -> PathBuf {
    lgrep_dir(root).join("config.json")
}

/// Get the chunk metadata database path.
pub fn store_path(root: &Path) -> PathBuf {
    lgrep_dir(root).join("chunks.sqlite")
}

/// Get the Qdrant Edge shard directory path.
pub fn shard_dir(root: &Path) -> PathBuf {
    lgrep_dir(root).join("vectors")
}

/// Get the flat vector index file path.
pub fn flat_index_path(root: &Path) -> PathBuf {
    lgrep_dir(root).join("vectors.json")
}
