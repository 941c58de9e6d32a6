//! Job configuration.
//!
//! [`SchemeConfig`] is the JSON job description consumed by
//! [`Scheme::create`](crate::scheme::Scheme::create). Field names follow the
//! camelCase form used by tile tooling (`manifestPath`, `chunkSize`), and
//! every field has a default:
//!
//! ```json
//! {
//!   "type": "pyramid",
//!   "minzoom": 0,
//!   "maxzoom": 4,
//!   "maxdepth": 12,
//!   "bounds": [-180, -85.0511, 180, 85.0511],
//!   "concurrency": 8,
//!   "metatile": 1
//! }
//! ```
//!
//! [`SourceInfo`] is upstream metadata (TileJSON-style zoom range and
//! bounds) that narrows a job to what a source can actually serve.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::coord::{Bounds, TileRange, TileRanges, MAX_ZOOM};
use crate::error::{SchemeError, SchemeResult};
use crate::scheme::manifest::count_lines;
use crate::scheme::SchemeType;

// ==================== Defaults ====================

/// Default number of render calls in flight.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default metatile edge length (1 = no metatiling).
pub const DEFAULT_METATILE: u32 = 1;

/// Default manifest decode chunk, in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_metatile() -> u32 {
    DEFAULT_METATILE
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// Configuration of a tile generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemeConfig {
    #[serde(rename = "type", default)]
    pub scheme: SchemeType,

    #[serde(default)]
    pub minzoom: u8,

    /// Deepest zoom scanned. Defaults to `minzoom`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<u8>,

    /// Deepest zoom a pyramid descends to. Defaults to `maxzoom`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxdepth: Option<u8>,

    #[serde(default)]
    pub bounds: Bounds,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_metatile")]
    pub metatile: u32,

    /// Tile list for the file scheme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for SchemeConfig {
    fn default() -> Self {
        Self {
            scheme: SchemeType::default(),
            minzoom: 0,
            maxzoom: None,
            maxdepth: None,
            bounds: Bounds::default(),
            concurrency: DEFAULT_CONCURRENCY,
            metatile: DEFAULT_METATILE,
            manifest_path: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl SchemeConfig {
    pub fn from_json(json: &str) -> SchemeResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SchemeError::InvalidConfig(format!("malformed job config: {}", e)))
    }

    /// Reads a JSON job config from disk.
    pub fn load(path: &Path) -> SchemeResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            SchemeError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn with_scheme(mut self, scheme: SchemeType) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_zoom(mut self, minzoom: u8, maxzoom: u8) -> Self {
        self.minzoom = minzoom;
        self.maxzoom = Some(maxzoom);
        self
    }

    pub fn with_maxdepth(mut self, maxdepth: u8) -> Self {
        self.maxdepth = Some(maxdepth);
        self
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_metatile(mut self, metatile: u32) -> Self {
        self.metatile = metatile;
        self
    }

    /// Sets the manifest and switches to the file scheme.
    pub fn with_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.scheme = SchemeType::File;
        self.manifest_path = Some(path.into());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Effective deepest scanned zoom.
    pub fn maxzoom(&self) -> u8 {
        self.maxzoom.unwrap_or(self.minzoom)
    }

    /// Effective pyramid descent limit.
    pub fn maxdepth(&self) -> u8 {
        self.maxdepth.unwrap_or_else(|| self.maxzoom())
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`SchemeError::MissingManifest`] for a file scheme without a manifest,
    /// [`SchemeError::InvalidConfig`] for anything else out of range.
    pub fn validate(&self) -> SchemeResult<()> {
        let invalid = |msg: String| Err(SchemeError::InvalidConfig(msg));

        if self.concurrency == 0 {
            return invalid("concurrency must be at least 1".to_string());
        }
        if self.metatile == 0 {
            return invalid("metatile must be at least 1".to_string());
        }
        if self.chunk_size == 0 {
            return invalid("chunkSize must be at least 1".to_string());
        }

        if self.scheme == SchemeType::File {
            if self.manifest_path.is_none() {
                return Err(SchemeError::MissingManifest);
            }
            return Ok(());
        }

        let (minzoom, maxzoom) = (self.minzoom, self.maxzoom());
        if maxzoom > MAX_ZOOM {
            return invalid(format!("maxzoom {} exceeds {}", maxzoom, MAX_ZOOM));
        }
        if minzoom > maxzoom {
            return invalid(format!("minzoom {} is above maxzoom {}", minzoom, maxzoom));
        }
        if self.scheme == SchemeType::Pyramid {
            let maxdepth = self.maxdepth();
            if maxdepth > MAX_ZOOM {
                return invalid(format!("maxdepth {} exceeds {}", maxdepth, MAX_ZOOM));
            }
            if maxdepth < minzoom {
                return invalid(format!("maxdepth {} is below minzoom {}", maxdepth, minzoom));
            }
        }
        self.bounds.validate()?;
        Ok(())
    }

    /// Narrows this config to what `info` declares.
    ///
    /// `minzoom` is raised, `maxzoom` lowered (or taken from `info` when
    /// unset) and bounds are intersected. Fields `info` leaves out are kept.
    pub fn restrict(&self, info: &SourceInfo) -> Self {
        let mut config = self.clone();
        if let Some(minzoom) = info.minzoom {
            config.minzoom = config.minzoom.max(minzoom);
        }
        if let Some(maxzoom) = info.maxzoom {
            config.maxzoom = Some(self.maxzoom.map_or(maxzoom, |z| z.min(maxzoom)));
        }
        if let Some(bounds) = info.bounds {
            config.bounds = config.bounds.intersect(&bounds);
        }
        config
    }

    /// Computes what the job would enumerate without running it.
    pub fn plan(&self) -> SchemeResult<Plan> {
        self.validate()?;

        if self.scheme == SchemeType::File {
            let path = self
                .manifest_path
                .as_ref()
                .ok_or(SchemeError::MissingManifest)?;
            let raw = std::fs::read_to_string(path).map_err(|source| SchemeError::ManifestRead {
                path: path.clone(),
                source,
            })?;
            return Ok(Plan {
                scheme: self.scheme,
                levels: Vec::new(),
                total: count_lines(&raw),
            });
        }

        let deepest = match self.scheme {
            SchemeType::Pyramid => self.maxdepth(),
            _ => self.maxzoom(),
        };
        let ranges = TileRanges::new(&self.bounds, self.minzoom, deepest)?;
        let levels = ranges
            .iter()
            .map(|(zoom, range)| LevelPlan {
                zoom,
                range: *range,
                count: range.count(),
            })
            .collect();

        Ok(Plan {
            scheme: self.scheme,
            levels,
            total: ranges.total(),
        })
    }
}

/// Per-zoom line of a [`Plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelPlan {
    pub zoom: u8,
    pub range: TileRange,
    pub count: u64,
}

/// Dry-run summary of a job.
///
/// For a pyramid, `total` is the size of the full pyramid down to
/// `maxdepth`, an upper bound on what descent can visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub scheme: SchemeType,
    pub levels: Vec<LevelPlan>,
    pub total: u64,
}

/// Zoom range and extent a tile source reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(default)]
    pub minzoom: Option<u8>,
    #[serde(default)]
    pub maxzoom: Option<u8>,
    #[serde(default)]
    pub bounds: Option<Bounds>,
}

impl SourceInfo {
    /// Reads source info from a TileJSON-like file.
    pub fn load(path: &Path) -> SchemeResult<Self> {
        let unavailable = |reason: String| SchemeError::SourceInfoUnavailable {
            path: path.to_path_buf(),
            reason,
        };
        let json = std::fs::read_to_string(path).map_err(|e| unavailable(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| unavailable(e.to_string()))
    }

    /// Like [`load`](Self::load), but a failure is logged and treated as no
    /// info, leaving the job's own defaults in effect.
    pub fn load_or_none(path: &Path) -> Option<Self> {
        match Self::load(path) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(error = %e, "Continuing without source info");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::WORLD_BOUNDS;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = SchemeConfig::from_json("{}").unwrap();
        assert_eq!(config, SchemeConfig::default());
        assert_eq!(config.scheme, SchemeType::Scanline);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.metatile, 1);
        assert_eq!(config.chunk_size, 1_000_000);
        assert_eq!(config.bounds, WORLD_BOUNDS);
        assert_eq!(config.maxzoom(), 0);
    }

    #[test]
    fn test_camel_case_fields() {
        let json = r#"{
            "type": "file",
            "manifestPath": "tiles.txt",
            "chunkSize": 64,
            "concurrency": 2
        }"#;
        let config = SchemeConfig::from_json(json).unwrap();
        assert_eq!(config.scheme, SchemeType::File);
        assert_eq!(config.manifest_path, Some(PathBuf::from("tiles.txt")));
        assert_eq!(config.chunk_size, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(matches!(
            SchemeConfig::from_json(r#"{"type":"zigzag"}"#),
            Err(SchemeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_maxdepth_defaults_to_maxzoom() {
        let config = SchemeConfig::default().with_zoom(2, 5);
        assert_eq!(config.maxdepth(), 5);
        assert_eq!(config.with_maxdepth(9).maxdepth(), 9);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = SchemeConfig::default();
        assert!(base.clone().with_concurrency(0).validate().is_err());
        assert!(base.clone().with_metatile(0).validate().is_err());
        assert!(base.clone().with_chunk_size(0).validate().is_err());
        assert!(base.clone().with_zoom(4, 2).validate().is_err());
        assert!(base.clone().with_zoom(0, 31).validate().is_err());
        assert!(base
            .clone()
            .with_bounds(Bounds::new(10.0, 0.0, -10.0, 5.0))
            .validate()
            .is_err());
        assert!(base
            .clone()
            .with_scheme(SchemeType::Pyramid)
            .with_zoom(3, 3)
            .with_maxdepth(2)
            .validate()
            .is_err());
        assert!(base.validate().is_ok());
    }

    #[test]
    fn test_file_scheme_requires_manifest() {
        let config = SchemeConfig::default().with_scheme(SchemeType::File);
        assert!(matches!(config.validate(), Err(SchemeError::MissingManifest)));
    }

    #[test]
    fn test_restrict_by_source_info() {
        let config = SchemeConfig::default().with_zoom(0, 10);
        let info = SourceInfo {
            minzoom: Some(2),
            maxzoom: Some(6),
            bounds: Some(Bounds::new(0.0, 0.0, 90.0, 45.0)),
        };

        let restricted = config.restrict(&info);
        assert_eq!(restricted.minzoom, 2);
        assert_eq!(restricted.maxzoom(), 6);
        assert_eq!(restricted.bounds, Bounds::new(0.0, 0.0, 90.0, 45.0));
    }

    #[test]
    fn test_restrict_takes_maxzoom_when_unset() {
        let info = SourceInfo {
            maxzoom: Some(5),
            ..Default::default()
        };
        let restricted = SchemeConfig::default().restrict(&info);
        assert_eq!(restricted.maxzoom(), 5);
        assert_eq!(restricted.bounds, WORLD_BOUNDS);
    }

    #[test]
    fn test_source_info_unavailable_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("info.json");
        assert!(matches!(
            SourceInfo::load(&missing),
            Err(SchemeError::SourceInfoUnavailable { .. })
        ));
        assert!(SourceInfo::load_or_none(&missing).is_none());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"minzoom":1,"bounds":[-10,-10,10,10]}"#).unwrap();
        let info = SourceInfo::load_or_none(file.path()).unwrap();
        assert_eq!(info.minzoom, Some(1));
        assert_eq!(info.maxzoom, None);
    }

    #[test]
    fn test_plan_scanline() {
        let plan = SchemeConfig::default().with_zoom(0, 2).plan().unwrap();
        assert_eq!(plan.levels.len(), 3);
        assert_eq!(plan.levels[2].count, 16);
        assert_eq!(plan.total, 21);
    }

    #[test]
    fn test_plan_pyramid_reaches_maxdepth() {
        let plan = SchemeConfig::default()
            .with_scheme(SchemeType::Pyramid)
            .with_zoom(0, 0)
            .with_maxdepth(3)
            .plan()
            .unwrap();
        assert_eq!(plan.levels.last().unwrap().zoom, 3);
        assert_eq!(plan.total, 1 + 4 + 16 + 64);
    }

    #[test]
    fn test_plan_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0/0/0\n\n1/0/1\n").unwrap();
        let plan = SchemeConfig::default()
            .with_manifest(file.path())
            .plan()
            .unwrap();
        assert_eq!(plan.total, 2);
        assert!(plan.levels.is_empty());
    }
}
