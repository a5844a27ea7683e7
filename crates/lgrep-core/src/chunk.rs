//! Line-window chunking with byte-accurate offsets
//!
//! A file is read once, the start offset of every line is recorded, and
//! consecutive windows of `size` lines are emitted. Neighbouring windows share
//! `overlap` lines. Each window's byte range covers whole lines only, so the
//! text can later be recovered from disk with a single bounded read.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::{LGREP_DIR, LgrepError, Result, store::Chunk};

/// Extensions never treated as text (compared case-insensitively).
const BINARY_EXTENSIONS: &[&str] = &[
    // Images
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tif", "tiff",
    // Documents and archives
    "pdf", "zip", "gz", "tgz", "tar", "7z",
    // Media
    "mp4", "mov", "mp3", "wav", "ogg",
    // Binaries
    "bin", "so", "dll", "dylib", "exe", "o", "a", "class", "jar",
    // Fonts
    "ttf", "woff", "woff2",
];

/// Validated chunking window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    size: usize,
    overlap: usize,
}

impl ChunkParams {
    /// A window of `size` lines sharing `overlap` lines with its neighbour.
    ///
    /// Fails with [`LgrepError::InvalidChunking`] unless `overlap < size`,
    /// which is what guarantees every window starts past the previous one.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 || overlap >= size {
            return Err(LgrepError::InvalidChunking { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

/// A chunk location that has not been assigned an id yet, with its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkText {
    /// File the chunk was read from
    pub file: String,
    /// First line (1-indexed)
    pub ls: usize,
    /// Last line, inclusive
    pub le: usize,
    /// Offset of the first byte of line `ls`
    pub byte_start: u64,
    /// Offset one past the last byte of line `le`
    pub byte_end: u64,
    /// Lossily decoded contents of `[byte_start, byte_end)`
    pub text: String,
}

impl ChunkText {
    /// The durable record for this chunk under `id`.
    pub fn with_id(&self, id: u64) -> Chunk {
        Chunk {
            id,
            file: self.file.clone(),
            ls: self.ls,
            le: self.le,
            byte_start: self.byte_start,
            byte_end: self.byte_end,
        }
    }
}

/// Which files a folder walk yields.
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Extra extensions to exclude, on top of the binary denylist
    pub exclude_extensions: Vec<String>,
    /// Honour .gitignore and skip hidden files
    pub respect_gitignore: bool,
}

/// Check whether a path looks like text, judged by extension only.
pub fn is_text_path(path: &Path, extra_excludes: &[String]) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    if BINARY_EXTENSIONS.contains(&ext.as_str()) {
        return false;
    }

    !extra_excludes
        .iter()
        .any(|e| e.trim_start_matches('.').to_lowercase() == ext)
}

/// Recursively list regular files under `root` that are not on the denylist.
///
/// The `.lgrep` state directory is never descended into. Entries that cannot
/// be read are skipped. The result is sorted so runs are reproducible.
pub fn list_text_files(root: &Path, options: &WalkOptions) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(root)
        .standard_filters(options.respect_gitignore)
        .filter_entry(|entry| entry.file_name() != LGREP_DIR)
        .build();

    let mut files: Vec<PathBuf> = walker
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
        .filter(|path| is_text_path(path, &options.exclude_extensions))
        .collect();

    files.sort();
    files
}

/// Byte offset of the start of every line, followed by a sentinel at EOF.
///
/// A trailing newline ends the last line instead of opening an empty one.
fn line_offsets(data: &[u8]) -> Vec<usize> {
    let mut offsets = vec![0];
    offsets.extend(
        data.iter()
            .enumerate()
            .filter(|&(i, &b)| b == b'\n' && i + 1 < data.len())
            .map(|(i, _)| i + 1),
    );
    offsets.push(data.len());
    offsets
}

/// Split already-loaded file contents into line windows.
///
/// An empty input yields no chunks.
pub fn chunk_bytes(file: &str, data: &[u8], params: ChunkParams) -> Result<Vec<ChunkText>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let offsets = line_offsets(data);
    let n_lines = offsets.len() - 1;
    let mut chunks = Vec::with_capacity(n_lines / (params.size - params.overlap) + 1);

    let mut ls = 1;
    loop {
        let le = (ls + params.size - 1).min(n_lines);
        let (b0, b1) = (offsets[ls - 1], offsets[le]);
        chunks.push(ChunkText {
            file: file.to_string(),
            ls,
            le,
            byte_start: b0 as u64,
            byte_end: b1 as u64,
            text: String::from_utf8_lossy(&data[b0..b1]).into_owned(),
        });

        if le == n_lines {
            break;
        }

        let next = (le + 1).saturating_sub(params.overlap).max(1);
        if next <= ls {
            return Err(LgrepError::InvalidChunking {
                size: params.size,
                overlap: params.overlap,
            });
        }
        ls = next;
    }

    Ok(chunks)
}

/// Files to chunk under `start`: the file itself, or a walk of the folder.
///
/// A path that does not exist is an error.
pub fn collect_files(start: &Path, options: &WalkOptions) -> Result<Vec<PathBuf>> {
    if start.is_file() {
        return Ok(vec![start.to_path_buf()]);
    }
    if !start.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", start.display()),
        )
        .into());
    }
    Ok(list_text_files(start, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn numbered_lines(n: usize) -> String {
        (1..=n).map(|i| format!("line {i}\n")).collect()
    }

    fn ranges(chunks: &[ChunkText]) -> Vec<(usize, usize)> {
        chunks.iter().map(|c| (c.ls, c.le)).collect()
    }

    #[test]
    fn ten_lines_window_four_overlap_one() {
        let text = numbered_lines(10);
        let params = ChunkParams::new(4, 1).unwrap();
        let chunks = chunk_bytes("f.txt", text.as_bytes(), params).unwrap();

        assert_eq!(ranges(&chunks), vec![(1, 4), (4, 7), (7, 10)]);

        let offsets = line_offsets(text.as_bytes());
        for c in &chunks {
            assert_eq!(c.byte_start as usize, offsets[c.ls - 1]);
            assert_eq!(c.byte_end as usize, offsets[c.le]);
        }
        assert_eq!(chunks[2].le, 10);
        assert_eq!(chunks[2].byte_end as usize, text.len());
    }

    #[test]
    fn coverage_and_overlap_hold_for_many_windows() {
        for n in 1..40 {
            let text = numbered_lines(n);
            for size in 1..8 {
                for overlap in 0..size {
                    let params = ChunkParams::new(size, overlap).unwrap();
                    let chunks = chunk_bytes("f", text.as_bytes(), params).unwrap();

                    assert!(!chunks.is_empty());
                    assert_eq!(chunks[0].ls, 1);
                    assert_eq!(chunks.last().unwrap().le, n);

                    for pair in chunks.windows(2) {
                        let (a, b) = (&pair[0], &pair[1]);
                        assert!(b.ls > a.ls, "start must advance");
                        assert!(b.ls <= a.le + 1, "no gap between chunks");
                        let shared = (a.le + 1).saturating_sub(b.ls);
                        assert!(shared <= overlap);
                    }

                    for c in &chunks {
                        let expected: String =
                            (c.ls..=c.le).map(|i| format!("line {i}\n")).collect();
                        assert_eq!(c.text, expected);
                    }
                }
            }
        }
    }

    #[test]
    fn trailing_newline_does_not_add_a_line() {
        let params = ChunkParams::new(2, 0).unwrap();
        let with = chunk_bytes("f", b"a\nb\nc\n", params).unwrap();
        let without = chunk_bytes("f", b"a\nb\nc", params).unwrap();

        assert_eq!(ranges(&with), vec![(1, 2), (3, 3)]);
        assert_eq!(ranges(&without), vec![(1, 2), (3, 3)]);
        assert_eq!(with[1].text, "c\n");
        assert_eq!(without[1].text, "c");
    }

    #[test]
    fn blank_lines_are_lines() {
        let params = ChunkParams::new(2, 0).unwrap();
        let chunks = chunk_bytes("f", b"\n\n\n", params).unwrap();
        assert_eq!(ranges(&chunks), vec![(1, 2), (3, 3)]);
        assert_eq!(chunks[1].byte_start, 2);
        assert_eq!(chunks[1].byte_end, 3);
    }

    #[test]
    fn empty_file_yields_no_chunks() {
        let params = ChunkParams::new(4, 1).unwrap();
        assert!(chunk_bytes("f", b"", params).unwrap().is_empty());
    }

    #[test]
    fn window_larger_than_file_is_one_chunk() {
        let text = numbered_lines(3);
        let params = ChunkParams::new(150, 20).unwrap();
        let chunks = chunk_bytes("f", text.as_bytes(), params).unwrap();
        assert_eq!(ranges(&chunks), vec![(1, 3)]);
        assert_eq!(chunks[0].byte_end as usize, text.len());
    }

    #[test]
    fn non_advancing_windows_are_rejected() {
        assert!(matches!(
            ChunkParams::new(4, 4),
            Err(LgrepError::InvalidChunking { size: 4, overlap: 4 })
        ));
        assert!(ChunkParams::new(4, 9).is_err());
        assert!(ChunkParams::new(0, 0).is_err());
        assert!(ChunkParams::new(1, 0).is_ok());
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let params = ChunkParams::new(4, 0).unwrap();
        let chunks = chunk_bytes("f", b"ok\n\xff\xfe\n", params).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].byte_end, 6);
        assert!(chunks[0].text.starts_with("ok\n"));
    }

    #[test]
    fn with_id_keeps_location() {
        let params = ChunkParams::new(4, 1).unwrap();
        let chunks = chunk_bytes("notes.md", b"a\nb\n", params).unwrap();
        let chunk = chunks[0].with_id(7);
        assert_eq!(chunk.id, 7);
        assert_eq!(chunk.file, "notes.md");
        assert_eq!((chunk.ls, chunk.le), (1, 2));
        assert_eq!((chunk.byte_start, chunk.byte_end), (0, 4));
    }

    #[test]
    fn denylist_is_case_insensitive() {
        assert!(!is_text_path(Path::new("photo.PNG"), &[]));
        assert!(!is_text_path(Path::new("lib.so"), &[]));
        assert!(is_text_path(Path::new("main.rs"), &[]));
        assert!(is_text_path(Path::new("Makefile"), &[]));
        assert!(!is_text_path(Path::new("app.log"), &[".LOG".to_string()]));
    }

    #[test]
    fn folder_walk_skips_binaries_and_state_dir() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("docs/deep")).unwrap();
        fs::create_dir_all(root.join(LGREP_DIR)).unwrap();
        fs::write(root.join("a.txt"), "one\ntwo\n").unwrap();
        fs::write(root.join("docs/deep/b.md"), "three\n").unwrap();
        fs::write(root.join("docs/image.JPG"), [0u8, 1, 2]).unwrap();
        fs::write(root.join(LGREP_DIR).join("config.json"), "{}").unwrap();

        let files = list_text_files(root, &WalkOptions::default());
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![PathBuf::from("a.txt"), PathBuf::from("docs/deep/b.md")]
        );

        assert_eq!(collect_files(root, &WalkOptions::default()).unwrap(), files);
    }

    #[test]
    fn hidden_files_are_text_unless_gitignore_is_respected() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join(".env"), "KEY=value\n").unwrap();

        assert_eq!(list_text_files(temp.path(), &WalkOptions::default()).len(), 1);

        let options = WalkOptions {
            respect_gitignore: true,
            ..WalkOptions::default()
        };
        assert!(list_text_files(temp.path(), &options).is_empty());
    }

    #[test]
    fn missing_path_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let result = collect_files(&temp.path().join("nope.txt"), &WalkOptions::default());
        assert!(matches!(result, Err(LgrepError::Io(_))));
    }

    #[test]
    fn named_file_is_collected_even_if_denylisted() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("dump.bin");
        fs::write(&path, "text after all\n").unwrap();

        let files = collect_files(&path, &WalkOptions::default()).unwrap();
        assert_eq!(files, vec![path]);
    }
}
