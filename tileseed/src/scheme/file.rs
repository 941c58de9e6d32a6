//! Manifest-driven traversal.
//!
//! Replays a flat tile list, such as the output of a previous export. The
//! manifest is read eagerly and decoded chunk by chunk (see
//! [`ManifestReader`]). Lines that fail to parse are reported to the
//! scheduler as rejected and counted as failed; the remaining lines still
//! dispatch.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::checkpoint::{check_tiles, TraversalCheckpoint};
use super::manifest::{count_lines, LineFormat, ManifestReader};
use super::{SchemeType, Step, Traversal, Unit};
use crate::config::SchemeConfig;
use crate::error::{SchemeError, SchemeResult};
use crate::tile::Tile;

/// Checkpoint section of a file scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileState {
    pub manifest: PathBuf,
    /// Manifest size in bytes when the checkpoint was taken.
    pub manifest_len: u64,
    pub chunk_size: usize,
    /// Byte offset of the first undecoded character.
    pub offset: usize,
    /// Partial line carried into the next chunk.
    pub remainder: String,
    pub format: Option<LineFormat>,
    /// Decoded tiles not yet resolved, in dispatch order.
    pub queue: Vec<Tile>,
    /// Decoded lines that failed to parse and are not yet counted.
    pub rejected: Vec<String>,
}

impl FileState {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be at least 1".to_string());
        }
        if self.offset as u64 > self.manifest_len {
            return Err(format!(
                "offset {} is past the end of a {} byte manifest",
                self.offset, self.manifest_len
            ));
        }
        check_tiles("queue", &self.queue)
    }
}

/// File strategy.
#[derive(Debug, Clone)]
pub struct FileTraversal {
    path: PathBuf,
    reader: ManifestReader,
    buffer: VecDeque<Tile>,
    rejected: VecDeque<String>,
    total: u64,
}

fn read_manifest(path: &Path) -> SchemeResult<String> {
    std::fs::read_to_string(path).map_err(|source| SchemeError::ManifestRead {
        path: path.to_path_buf(),
        source,
    })
}

impl FileTraversal {
    pub fn new(config: &SchemeConfig) -> SchemeResult<Self> {
        let path = config
            .manifest_path
            .clone()
            .ok_or(SchemeError::MissingManifest)?;
        let raw = read_manifest(&path)?;
        let total = count_lines(&raw);
        debug!(manifest = %path.display(), total, "Loaded manifest");

        Ok(Self {
            path,
            reader: ManifestReader::new(raw, config.chunk_size),
            buffer: VecDeque::new(),
            rejected: VecDeque::new(),
            total,
        })
    }

    /// Re-reads the manifest and positions the reader where `state` left off.
    ///
    /// Fails with [`SchemeError::ManifestChanged`] if the manifest's length
    /// differs from the one recorded in the checkpoint.
    pub fn restore(state: FileState) -> SchemeResult<Self> {
        let raw = read_manifest(&state.manifest)?;
        let actual = raw.len() as u64;
        if actual != state.manifest_len {
            return Err(SchemeError::ManifestChanged {
                path: state.manifest,
                expected: state.manifest_len,
                actual,
            });
        }

        let total = count_lines(&raw);
        let reader = ManifestReader::resume(
            raw,
            state.chunk_size,
            state.offset,
            state.remainder,
            state.format,
        );

        Ok(Self {
            path: state.manifest,
            reader,
            buffer: state.queue.into(),
            rejected: state.rejected.into(),
            total,
        })
    }

    /// Non-blank lines in the manifest.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn refill(&mut self) -> bool {
        let Some(results) = self.reader.next_chunk() else {
            return false;
        };
        for result in results {
            match result {
                Ok(tile) => self.buffer.push_back(tile),
                Err(e) => self.rejected.push_back(e.to_string()),
            }
        }
        true
    }
}

impl Traversal for FileTraversal {
    fn scheme_type(&self) -> SchemeType {
        SchemeType::File
    }

    fn next_unit(&mut self) -> Step {
        loop {
            if let Some(reason) = self.rejected.pop_front() {
                return Step::Rejected(reason);
            }
            if let Some(tile) = self.buffer.pop_front() {
                return Step::Unit(Unit::new(tile));
            }
            if !self.refill() {
                return Step::Exhausted;
            }
        }
    }

    fn checkpoint(&self, open: &[&Unit]) -> TraversalCheckpoint {
        TraversalCheckpoint::File(FileState {
            manifest: self.path.clone(),
            manifest_len: self.reader.raw().len() as u64,
            chunk_size: self.reader.chunk_size(),
            offset: self.reader.offset(),
            remainder: self.reader.remainder().to_string(),
            format: self.reader.format(),
            queue: open
                .iter()
                .map(|unit| unit.tile.clone())
                .chain(self.buffer.iter().cloned())
                .collect(),
            rejected: self.rejected.iter().cloned().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn manifest(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn drain(traversal: &mut FileTraversal) -> (Vec<Tile>, usize) {
        let mut tiles = Vec::new();
        let mut rejected = 0;
        loop {
            match traversal.next_unit() {
                Step::Unit(unit) => tiles.push(unit.tile),
                Step::Rejected(_) => rejected += 1,
                Step::Continue => {}
                Step::Exhausted => return (tiles, rejected),
            }
        }
    }

    #[test]
    fn test_missing_manifest_path() {
        let config = SchemeConfig::default().with_scheme(SchemeType::File);
        assert!(matches!(
            FileTraversal::new(&config),
            Err(SchemeError::MissingManifest)
        ));
    }

    #[test]
    fn test_unreadable_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = SchemeConfig::default().with_manifest(dir.path().join("absent.txt"));
        assert!(matches!(
            FileTraversal::new(&config),
            Err(SchemeError::ManifestRead { .. })
        ));
    }

    #[test]
    fn test_total_counts_non_blank_lines() {
        let file = manifest("0/0/0\n\n1/1/1\n   \n");
        let config = SchemeConfig::default().with_manifest(file.path());
        let mut traversal = FileTraversal::new(&config).unwrap();
        assert_eq!(traversal.total(), 2);

        let (tiles, rejected) = drain(&mut traversal);
        assert_eq!(tiles, vec![Tile::new(0, 0, 0), Tile::new(1, 1, 1)]);
        assert_eq!(rejected, 0);
    }

    #[test]
    fn test_malformed_lines_are_rejected() {
        let file = manifest("0/0/0\nbogus\n1/1/1\n");
        let config = SchemeConfig::default()
            .with_manifest(file.path())
            .with_chunk_size(4);
        let mut traversal = FileTraversal::new(&config).unwrap();

        let (tiles, rejected) = drain(&mut traversal);
        assert_eq!(tiles.len(), 2);
        assert_eq!(rejected, 1);
    }

    #[test]
    fn test_checkpoint_and_restore() {
        let file = manifest("0/0/0\n1/0/0\n1/1/0\n1/0/1\n1/1/1\n");
        let config = SchemeConfig::default()
            .with_manifest(file.path())
            .with_chunk_size(7);
        let mut traversal = FileTraversal::new(&config).unwrap();

        let Step::Unit(first) = traversal.next_unit() else {
            panic!("expected a unit");
        };
        let Step::Unit(_second) = traversal.next_unit() else {
            panic!("expected a unit");
        };

        // First is still in flight, second resolved
        let TraversalCheckpoint::File(state) = traversal.checkpoint(&[&first]) else {
            panic!("expected file state");
        };
        let mut restored = FileTraversal::restore(state).unwrap();
        let (tiles, _) = drain(&mut restored);
        assert_eq!(
            tiles,
            vec![
                Tile::new(0, 0, 0),
                Tile::new(1, 1, 0),
                Tile::new(1, 0, 1),
                Tile::new(1, 1, 1),
            ]
        );
    }

    #[test]
    fn test_restore_detects_changed_manifest() {
        let mut file = manifest("0/0/0\n");
        let config = SchemeConfig::default().with_manifest(file.path());
        let traversal = FileTraversal::new(&config).unwrap();
        let TraversalCheckpoint::File(state) = traversal.checkpoint(&[]) else {
            panic!("expected file state");
        };

        file.write_all(b"1/0/0\n").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            FileTraversal::restore(state),
            Err(SchemeError::ManifestChanged { .. })
        ));
    }
}
