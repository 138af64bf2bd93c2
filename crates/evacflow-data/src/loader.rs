//! Resolution pipeline: reads data files, resolves cross-references, builds
//! the frozen configuration tables.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers used by [`load_config`].

use crate::schema::{RegionData, ScenarioData, SelectorError};
use evacflow_core::engine::{Engine, EngineConfig};
use evacflow_core::policy::SelectorPolicy;
use evacflow_core::scenario::{
    ConfigError, Region, RegionTable, RegionTableBuilder, Scenario, ScenarioTable,
    ScenarioTableBuilder,
};
use evacflow_core::segment::SegmentRecord;
use evacflow_core::store::MemorySegmentStore;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A name reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    /// A duplicate name was found.
    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    /// A region's source or sink selector cannot match any node.
    #[error("invalid {role} selector for region '{region}' in {file}: {source}")]
    Selector {
        file: PathBuf,
        region: String,
        role: &'static str,
        #[source]
        source: SelectorError,
    },

    /// The engine's configuration tables rejected a definition.
    #[error("{file}: {source}")]
    Config {
        file: PathBuf,
        #[source]
        source: ConfigError,
    },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name (without extension).
///
/// Looks for `{base_name}.ron`, `{base_name}.toml`, and `{base_name}.json`.
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// multiple formats exist for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;

    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn parse_error(path: &Path, detail: impl ToString) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(path, e)),
    }
}

/// Deserialize a list from a file. For TOML files, extracts the array at the
/// given `toml_key` from a top-level table (`[[scenarios]]` and friends).
/// For RON and JSON, deserializes directly as `Vec<T>`.
pub fn deserialize_list<T: DeserializeOwned>(
    path: &Path,
    toml_key: &str,
) -> Result<Vec<T>, DataLoadError> {
    if detect_format(path)? != Format::Toml {
        return deserialize_file(path);
    }

    let content = std::fs::read_to_string(path)?;
    let table: toml::Table = toml::from_str(&content).map_err(|e| parse_error(path, e))?;
    let array = table
        .get(toml_key)
        .ok_or_else(|| parse_error(path, format!("missing key '{toml_key}' in TOML file")))?
        .clone();
    array
        .try_into()
        .map_err(|e: toml::de::Error| parse_error(path, e))
}

// ===========================================================================
// Name resolution helpers
// ===========================================================================

/// Look up a name in a map, returning an `UnresolvedRef` error if not found.
pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Record `name` as seen, returning a `DuplicateName` error if it already
/// was.
pub fn check_duplicate(
    seen: &mut HashSet<String>,
    name: &str,
    file: &Path,
) -> Result<(), DataLoadError> {
    if seen.insert(name.to_string()) {
        Ok(())
    } else {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        })
    }
}

// ===========================================================================
// Pipeline
// ===========================================================================

/// Everything a data directory defines.
#[derive(Debug)]
pub struct EngineData {
    pub scenarios: ScenarioTable,
    pub regions: RegionTable,
    /// Fixture segments for the in-memory store. Empty when the directory
    /// has no segments file.
    pub segments: Vec<SegmentRecord>,
}

impl EngineData {
    /// Wire the loaded tables and segments into an engine backed by a
    /// [`MemorySegmentStore`].
    pub fn into_engine(self, store_label: &str, config: EngineConfig) -> Engine {
        let store = MemorySegmentStore::new(store_label, self.segments);
        Engine::new(
            Arc::new(self.scenarios),
            Arc::new(self.regions),
            Arc::new(store),
            config,
        )
    }
}

/// Load `regions`, `scenarios` and the optional `segments` file from `dir`.
///
/// Region names are matched case-insensitively, both for duplicates and for
/// scenario `affected_regions` references.
pub fn load_config(dir: &Path) -> Result<EngineData, DataLoadError> {
    let regions_path = require_data_file(dir, "regions")?;
    let region_defs: Vec<RegionData> = deserialize_list(&regions_path, "regions")?;
    let regions = load_regions(region_defs, &regions_path)?;

    let scenarios_path = require_data_file(dir, "scenarios")?;
    let scenario_defs: Vec<ScenarioData> = deserialize_list(&scenarios_path, "scenarios")?;
    let scenarios = load_scenarios(scenario_defs, &regions, &scenarios_path)?;

    let segments = match find_data_file(dir, "segments")? {
        Some(path) => deserialize_list(&path, "segments")?,
        None => {
            debug!(dir = %dir.display(), "no segments file");
            Vec::new()
        }
    };

    info!(
        dir = %dir.display(),
        scenarios = scenarios.len(),
        regions = regions.len(),
        segments = segments.len(),
        "loaded configuration"
    );
    Ok(EngineData {
        scenarios,
        regions,
        segments,
    })
}

fn load_regions(defs: Vec<RegionData>, file: &Path) -> Result<RegionTable, DataLoadError> {
    let mut seen = HashSet::new();
    let mut builder = RegionTableBuilder::new();

    for def in defs {
        check_duplicate(&mut seen, &def.name.to_lowercase(), file)?;

        let invalid = |role: &'static str| {
            let region = def.name.clone();
            move |source: SelectorError| DataLoadError::Selector {
                file: file.to_path_buf(),
                region,
                role,
                source,
            }
        };
        let policy = SelectorPolicy {
            sources: def.sources.resolve().map_err(invalid("source"))?,
            sinks: def.sinks.resolve().map_err(invalid("sink"))?,
        };
        let region = Region::new(
            def.name.clone(),
            def.evacuation_azimuth_deg,
            def.population,
            def.thresholds.map(Into::into).unwrap_or_default(),
            policy,
        );
        builder.register(region).map_err(|source| DataLoadError::Config {
            file: file.to_path_buf(),
            source,
        })?;
    }

    Ok(builder.build())
}

fn load_scenarios(
    defs: Vec<ScenarioData>,
    regions: &RegionTable,
    file: &Path,
) -> Result<ScenarioTable, DataLoadError> {
    let region_names: HashMap<String, &str> = regions
        .iter()
        .map(|r| (r.name.to_lowercase(), r.name.as_str()))
        .collect();
    let mut seen = HashSet::new();
    let mut builder = ScenarioTableBuilder::new();

    for def in defs {
        check_duplicate(&mut seen, &def.id, file)?;

        let mut affected = Vec::with_capacity(def.affected_regions.len());
        for name in &def.affected_regions {
            let canonical = resolve_name(&region_names, &name.to_lowercase(), file, "region")?;
            affected.push(canonical.to_string());
        }

        let landfall = def.landfall_point();
        let scenario = Scenario {
            label: def.label.unwrap_or_else(|| def.id.clone()),
            id: def.id,
            category: def.category,
            wind_speed_mph: def.wind_speed_mph,
            pressure_mb: def.pressure_mb,
            landfall,
            heading_deg: def.heading_deg,
            translation_speed_kt: def.translation_speed_kt,
            affected_regions: affected,
            contraflow: def.contraflow.map(Into::into),
        };
        builder.register(scenario).map_err(|source| DataLoadError::Config {
            file: file.to_path_buf(),
            source,
        })?;
    }

    builder.build(regions).map_err(|source| DataLoadError::Config {
        file: file.to_path_buf(),
        source,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use evacflow_core::scenario::ContraflowMode;
    use std::fs;

    /// Create a temporary directory with a unique name for test isolation.
    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "evacflow_data_test_{suffix}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Clean up a test directory.
    fn cleanup(dir: &Path) {
        let _ = fs::remove_dir_all(dir);
    }

    const REGIONS_RON: &str = r#"[
        (name: "Tampa Bay", evacuation_azimuth_deg: 45.0, population: 1000),
        (name: "Miami", evacuation_azimuth_deg: 315.0, population: 2000,
         thresholds: Some((low_hours: 6.0, critical_hours: 30.0))),
    ]"#;

    // -----------------------------------------------------------------------
    // detect_format
    // -----------------------------------------------------------------------

    #[test]
    fn detect_format_by_extension() {
        assert_eq!(detect_format(Path::new("a.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("a.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("a.json")).unwrap(), Format::Json);
    }

    #[test]
    fn detect_format_unsupported() {
        for name in ["regions.yaml", "regions"] {
            let result = detect_format(Path::new(name));
            assert!(matches!(
                result,
                Err(DataLoadError::UnsupportedFormat { .. })
            ));
        }
    }

    // -----------------------------------------------------------------------
    // find_data_file / require_data_file
    // -----------------------------------------------------------------------

    #[test]
    fn find_data_file_found_and_missing() {
        let dir = make_test_dir("find");
        assert_eq!(find_data_file(&dir, "regions").unwrap(), None);

        fs::write(dir.join("regions.toml"), "").unwrap();
        assert_eq!(
            find_data_file(&dir, "regions").unwrap(),
            Some(dir.join("regions.toml"))
        );

        cleanup(&dir);
    }

    #[test]
    fn find_data_file_conflict() {
        let dir = make_test_dir("conflict");
        fs::write(dir.join("regions.ron"), "[]").unwrap();
        fs::write(dir.join("regions.json"), "[]").unwrap();

        let result = find_data_file(&dir, "regions");
        assert!(matches!(
            result,
            Err(DataLoadError::ConflictingFormats { .. })
        ));

        cleanup(&dir);
    }

    #[test]
    fn require_data_file_missing() {
        let dir = make_test_dir("require_missing");

        let result = require_data_file(&dir, "scenarios");
        assert!(matches!(
            result,
            Err(DataLoadError::MissingRequired { ref file, .. }) if file == "scenarios"
        ));

        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // deserialize_list
    // -----------------------------------------------------------------------

    #[test]
    fn deserialize_list_toml() {
        let dir = make_test_dir("list_toml");
        let path = dir.join("regions.toml");
        fs::write(
            &path,
            r#"
[[regions]]
name = "Tampa Bay"
evacuation_azimuth_deg = 45.0
population = 1000

[[regions]]
name = "Orlando"
evacuation_azimuth_deg = 45.0
population = 500
sources = { nodes = [1, 2] }
"#,
        )
        .unwrap();

        let regions: Vec<RegionData> = deserialize_list(&path, "regions").unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[1].name, "Orlando");

        cleanup(&dir);
    }

    #[test]
    fn deserialize_list_toml_missing_key() {
        let dir = make_test_dir("list_toml_missing");
        let path = dir.join("regions.toml");
        fs::write(&path, "title = \"nothing here\"\n").unwrap();

        let result: Result<Vec<RegionData>, _> = deserialize_list(&path, "regions");
        assert!(matches!(result, Err(DataLoadError::Parse { .. })));

        cleanup(&dir);
    }

    #[test]
    fn deserialize_file_parse_error() {
        let dir = make_test_dir("parse_err");
        let path = dir.join("scenarios.json");
        fs::write(&path, "[{\"id\": ").unwrap();

        let result: Result<Vec<ScenarioData>, _> = deserialize_file(&path);
        assert!(matches!(result, Err(DataLoadError::Parse { .. })));

        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // load_config
    // -----------------------------------------------------------------------

    #[test]
    fn load_config_resolves_tables() {
        let dir = make_test_dir("load_ok");
        fs::write(dir.join("regions.ron"), REGIONS_RON).unwrap();
        fs::write(
            dir.join("scenarios.json"),
            r#"[
                {"id": "baseline", "label": "Baseline"},
                {"id": "cat4", "category": 4, "windSpeed": 140,
                 "affectedRegions": ["tampa bay"],
                 "contraflow": {"mode": "reallocate"}}
            ]"#,
        )
        .unwrap();

        let data = load_config(&dir).unwrap();
        assert_eq!(data.regions.len(), 2);
        assert_eq!(data.scenarios.len(), 2);
        assert!(data.segments.is_empty());

        let miami = data.regions.get("MIAMI").unwrap();
        assert_eq!(miami.thresholds.low_hours, 6.0);

        let cat4 = data.scenarios.get("cat4").unwrap();
        assert_eq!(cat4.label, "cat4");
        assert_eq!(cat4.affected_regions, vec!["Tampa Bay"]);
        assert_eq!(
            cat4.contraflow.as_ref().map(|r| r.mode),
            Some(ContraflowMode::Reallocate)
        );
        assert!(data.scenarios.get("baseline").unwrap().is_baseline());

        cleanup(&dir);
    }

    #[test]
    fn load_config_reads_segments() {
        let dir = make_test_dir("load_segments");
        fs::write(dir.join("regions.ron"), REGIONS_RON).unwrap();
        fs::write(dir.join("scenarios.ron"), r#"[(id: "baseline")]"#).unwrap();
        fs::write(
            dir.join("segments.json"),
            r#"[{"id": 1, "source": 1, "target": 2, "region": "Miami",
                 "length_m": 500.0, "lanes": 2, "speed_limit_mph": 45.0}]"#,
        )
        .unwrap();

        let data = load_config(&dir).unwrap();
        assert_eq!(data.segments.len(), 1);
        assert_eq!(data.segments[0].lanes, 2);

        cleanup(&dir);
    }

    #[test]
    fn load_config_rejects_unknown_region_reference() {
        let dir = make_test_dir("load_unresolved");
        fs::write(dir.join("regions.ron"), REGIONS_RON).unwrap();
        fs::write(
            dir.join("scenarios.ron"),
            r#"[(id: "cat2", affected_regions: ["Atlantis"])]"#,
        )
        .unwrap();

        let result = load_config(&dir);
        assert!(matches!(
            result,
            Err(DataLoadError::UnresolvedRef { ref name, expected_kind: "region", .. })
                if name == "atlantis"
        ));

        cleanup(&dir);
    }

    #[test]
    fn load_config_rejects_duplicates() {
        let dir = make_test_dir("load_dup");
        fs::write(
            dir.join("regions.ron"),
            r#"[
                (name: "Miami", evacuation_azimuth_deg: 315.0, population: 1),
                (name: "miami", evacuation_azimuth_deg: 315.0, population: 1),
            ]"#,
        )
        .unwrap();
        fs::write(dir.join("scenarios.ron"), "[]").unwrap();

        let result = load_config(&dir);
        assert!(matches!(result, Err(DataLoadError::DuplicateName { .. })));

        cleanup(&dir);
    }

    #[test]
    fn load_config_surfaces_engine_validation() {
        let dir = make_test_dir("load_invalid");
        fs::write(
            dir.join("regions.ron"),
            r#"[(name: "Miami", evacuation_azimuth_deg: 360.0, population: 1)]"#,
        )
        .unwrap();
        fs::write(dir.join("scenarios.ron"), "[]").unwrap();

        let result = load_config(&dir);
        assert!(matches!(
            result,
            Err(DataLoadError::Config {
                source: ConfigError::InvalidAzimuth { .. },
                ..
            })
        ));

        cleanup(&dir);
    }

    #[test]
    fn load_config_rejects_bad_selector() {
        let dir = make_test_dir("load_selector");
        fs::write(
            dir.join("regions.ron"),
            r#"[(name: "Miami", evacuation_azimuth_deg: 315.0, population: 1,
                 sinks: nodes([]))]"#,
        )
        .unwrap();
        fs::write(dir.join("scenarios.ron"), "[]").unwrap();

        let err = load_config(&dir).unwrap_err();
        assert!(matches!(
            err,
            DataLoadError::Selector {
                role: "sink",
                source: SelectorError::EmptyNodeList,
                ..
            }
        ));
        let message = err.to_string();
        assert!(message.starts_with("invalid sink selector for region 'Miami' in "));
        assert!(message.ends_with("regions.ron: node list is empty"));

        cleanup(&dir);
    }

    #[test]
    fn check_duplicate_tracks_seen_names() {
        let mut seen = HashSet::new();
        let file = Path::new("scenarios.ron");
        check_duplicate(&mut seen, "baseline", file).unwrap();
        check_duplicate(&mut seen, "cat4", file).unwrap();
        assert!(matches!(
            check_duplicate(&mut seen, "baseline", file),
            Err(DataLoadError::DuplicateName { ref name, .. }) if name == "baseline"
        ));
    }

    #[test]
    fn load_config_requires_regions() {
        let dir = make_test_dir("load_no_regions");
        fs::write(dir.join("scenarios.ron"), "[]").unwrap();

        let result = load_config(&dir);
        assert!(matches!(
            result,
            Err(DataLoadError::MissingRequired { ref file, .. }) if file == "regions"
        ));

        cleanup(&dir);
    }

    #[test]
    fn error_display_messages() {
        let err = DataLoadError::DuplicateName {
            file: PathBuf::from("regions.ron"),
            name: "miami".to_string(),
        };
        assert_eq!(err.to_string(), "duplicate name 'miami' in regions.ron");

        let err = DataLoadError::UnresolvedRef {
            file: PathBuf::from("scenarios.ron"),
            name: "atlantis".to_string(),
            expected_kind: "region",
        };
        assert_eq!(
            err.to_string(),
            "unresolved region reference 'atlantis' in scenarios.ron"
        );
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: DataLoadError = io.into();
        assert!(matches!(err, DataLoadError::Io(_)));
    }
}
