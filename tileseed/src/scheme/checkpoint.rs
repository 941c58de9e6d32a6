//! Checkpoint records for pausing and resuming schemes.
//!
//! A [`Checkpoint`] is plain data: the scheduler's concurrency, its finished
//! flag, the statistics counters and one strategy-specific section. It is
//! stored as a single JSON object with the strategy named by `type`:
//!
//! ```text
//! {
//!   "type": "pyramid",
//!   "concurrency": 8,
//!   "finished": false,
//!   "stats": { "total": 1, "pending": 0, ... },
//!   "cursor": { ... },
//!   ...
//! }
//! ```
//!
//! Every field is required. A missing or malformed field fails the restore
//! with [`SchemeError::Checkpoint`] instead of producing a half-initialized
//! scheme. A record that parses but holds values no scheme could have
//! written (a zero metatile, tiles off the grid, a zero chunk size) fails
//! with [`SchemeError::InvalidCheckpoint`].

use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::file::FileState;
use super::pyramid::PyramidState;
use super::scanline::ScanlineState;
use super::SchemeType;
use crate::error::{SchemeError, SchemeResult};
use crate::statistics::StatisticsRecord;
use crate::tile::Tile;

/// Fails on the first tile of `tiles` that is off the grid.
pub(super) fn check_tiles<'a>(
    field: &str,
    tiles: impl IntoIterator<Item = &'a Tile>,
) -> Result<(), String> {
    match tiles.into_iter().find(|tile| !tile.is_valid()) {
        Some(tile) => Err(format!("{} tile {} is off the grid", field, tile)),
        None => Ok(()),
    }
}

/// Strategy-specific part of a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TraversalCheckpoint {
    Scanline(ScanlineState),
    Pyramid(PyramidState),
    File(FileState),
}

impl TraversalCheckpoint {
    pub fn scheme_type(&self) -> SchemeType {
        match self {
            TraversalCheckpoint::Scanline(_) => SchemeType::Scanline,
            TraversalCheckpoint::Pyramid(_) => SchemeType::Pyramid,
            TraversalCheckpoint::File(_) => SchemeType::File,
        }
    }
}

/// Serializable snapshot of a scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub concurrency: usize,
    pub finished: bool,
    pub stats: StatisticsRecord,
    #[serde(flatten)]
    pub traversal: TraversalCheckpoint,
}

impl Checkpoint {
    pub fn scheme_type(&self) -> SchemeType {
        self.traversal.scheme_type()
    }

    pub fn to_json(&self) -> SchemeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses and validates a checkpoint.
    pub fn from_json(json: &str) -> SchemeResult<Self> {
        let checkpoint: Self = serde_json::from_str(json)?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    /// Checks the values a well-formed record can still get wrong.
    pub fn validate(&self) -> SchemeResult<()> {
        if self.concurrency == 0 {
            return Err(SchemeError::InvalidCheckpoint(
                "concurrency must be at least 1".to_string(),
            ));
        }
        let result = match &self.traversal {
            TraversalCheckpoint::Scanline(state) => state.validate(),
            TraversalCheckpoint::Pyramid(state) => state.validate(),
            TraversalCheckpoint::File(state) => state.validate(),
        };
        result.map_err(SchemeError::InvalidCheckpoint)
    }

    /// Loads a checkpoint file.
    pub fn load(path: &Path) -> SchemeResult<Self> {
        let file = std::fs::File::open(path).map_err(|source| SchemeError::CheckpointIo {
            path: path.to_path_buf(),
            source,
        })?;
        let checkpoint: Self = serde_json::from_reader(BufReader::new(file))?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    /// Saves the checkpoint, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> SchemeResult<()> {
        let io_err = |source| SchemeError::CheckpointIo {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        // Write to temp file first, then rename
        let temp_path = path.with_extension("tmp");
        let file = std::fs::File::create(&temp_path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush().map_err(io_err)?;
        drop(writer);

        std::fs::rename(&temp_path, path).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{TileRanges, WORLD_BOUNDS};
    use crate::scheme::pyramid::StackEntry;
    use crate::scheme::scanline::ScanlineCursor;
    use crate::tile::{Metatile, MetatileRecord};

    fn sample() -> Checkpoint {
        let levels = TileRanges::new(&WORLD_BOUNDS, 0, 1).unwrap();
        Checkpoint {
            concurrency: 4,
            finished: false,
            stats: StatisticsRecord {
                total: 5,
                pending: 0,
                unique: 1,
                duplicate: 0,
                failed: 0,
                skipped: 0,
            },
            traversal: TraversalCheckpoint::Scanline(ScanlineState {
                cursor: ScanlineCursor::new(levels, 1),
                queue: vec![Tile::new(1, 0, 0)],
            }),
        }
    }

    #[test]
    fn test_type_tag_at_top_level() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "scanline");
        assert_eq!(value["concurrency"], 4);
        assert!(value.get("queue").is_some());
    }

    #[test]
    fn test_json_roundtrip() {
        let checkpoint = sample();
        let restored = Checkpoint::from_json(&checkpoint.to_json().unwrap()).unwrap();
        assert_eq!(restored, checkpoint);
        assert_eq!(restored.scheme_type(), SchemeType::Scanline);
    }

    #[test]
    fn test_missing_field_is_checkpoint_error() {
        let mut value: serde_json::Value =
            serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("queue");

        let result = Checkpoint::from_json(&value.to_string());
        assert!(matches!(result, Err(SchemeError::Checkpoint(_))));
    }

    #[test]
    fn test_unknown_type_is_checkpoint_error() {
        let mut value: serde_json::Value =
            serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        value["type"] = serde_json::Value::String("zigzag".into());

        let result = Checkpoint::from_json(&value.to_string());
        assert!(matches!(result, Err(SchemeError::Checkpoint(_))));
    }

    fn pyramid(metatile: u32, stack: Vec<StackEntry>) -> Checkpoint {
        let levels = TileRanges::new(&WORLD_BOUNDS, 0, 3).unwrap();
        Checkpoint {
            traversal: TraversalCheckpoint::Pyramid(PyramidState {
                cursor: ScanlineCursor::new(levels.truncated(0), 2),
                levels,
                maxdepth: 3,
                metatile,
                stack,
            }),
            ..sample()
        }
    }

    fn is_invalid(checkpoint: &Checkpoint) -> bool {
        let json = serde_json::to_string(checkpoint).unwrap();
        matches!(
            Checkpoint::from_json(&json),
            Err(SchemeError::InvalidCheckpoint(_))
        )
    }

    #[test]
    fn test_valid_pyramid_passes() {
        let record = MetatileRecord::new(
            Metatile::containing(&Tile::new(1, 1, 1), 2),
            vec![Tile::new(1, 1, 1)],
        );
        let checkpoint = pyramid(
            2,
            vec![StackEntry::Tile(Tile::new(2, 3, 3)), StackEntry::Metatile(record)],
        );
        assert!(checkpoint.validate().is_ok());
        assert!(!is_invalid(&checkpoint));
    }

    #[test]
    fn test_zero_cursor_metatile_rejected() {
        let mut value: serde_json::Value =
            serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        value["cursor"]["metatile"] = 0.into();

        let err = Checkpoint::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, SchemeError::InvalidCheckpoint(_)));
        assert!(err.to_string().contains("metatile"));
    }

    #[test]
    fn test_pyramid_metatile_mismatch_rejected() {
        assert!(is_invalid(&pyramid(1, Vec::new())));
        assert!(is_invalid(&pyramid(0, Vec::new())));
    }

    #[test]
    fn test_off_grid_tiles_rejected() {
        assert!(is_invalid(&pyramid(2, vec![StackEntry::Tile(Tile::new(255, 0, 0))])));
        assert!(is_invalid(&pyramid(2, vec![StackEntry::Tile(Tile::new(2, 4, 0))])));

        let mut record = MetatileRecord::new(
            Metatile::containing(&Tile::new(1, 0, 0), 2),
            vec![Tile::new(1, 0, 0)],
        );
        record.children.push(Tile::new(2, 0, u32::MAX));
        assert!(is_invalid(&pyramid(2, vec![StackEntry::Metatile(record)])));

        let mut checkpoint = sample();
        if let TraversalCheckpoint::Scanline(state) = &mut checkpoint.traversal {
            state.queue.push(Tile::new(1, 2, 0));
        }
        assert!(is_invalid(&checkpoint));
    }

    #[test]
    fn test_zero_record_size_rejected() {
        let mut record = MetatileRecord::new(
            Metatile::containing(&Tile::new(1, 0, 0), 2),
            vec![Tile::new(1, 0, 0)],
        );
        record.size = 0;
        assert!(is_invalid(&pyramid(2, vec![StackEntry::Metatile(record)])));
    }

    #[test]
    fn test_deep_levels_rejected() {
        let mut checkpoint = pyramid(2, Vec::new());
        if let TraversalCheckpoint::Pyramid(state) = &mut checkpoint.traversal {
            state.maxdepth = 31;
        }
        assert!(is_invalid(&checkpoint));
    }

    #[test]
    fn test_file_chunk_size_rejected() {
        let file = FileState {
            manifest: "tiles.txt".into(),
            manifest_len: 6,
            chunk_size: 0,
            offset: 0,
            remainder: String::new(),
            format: None,
            queue: Vec::new(),
            rejected: Vec::new(),
        };
        let checkpoint = Checkpoint {
            traversal: TraversalCheckpoint::File(file.clone()),
            ..sample()
        };
        assert!(is_invalid(&checkpoint));

        let checkpoint = Checkpoint {
            traversal: TraversalCheckpoint::File(FileState {
                chunk_size: 4,
                offset: 7,
                ..file
            }),
            ..sample()
        };
        assert!(is_invalid(&checkpoint));
    }

    #[test]
    fn test_load_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        let mut checkpoint = sample();
        checkpoint.concurrency = 0;
        std::fs::write(&path, serde_json::to_string(&checkpoint).unwrap()).unwrap();

        assert!(matches!(
            Checkpoint::load(&path),
            Err(SchemeError::InvalidCheckpoint(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("job.json");

        sample().save(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(Checkpoint::load(&path).unwrap(), sample());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Checkpoint::load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(SchemeError::CheckpointIo { .. })));
    }
}
