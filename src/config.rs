//! Host configuration: broker settings plus the fixture sources to federate.
//!
//! Loaded from TOML. Every table is optional; a missing `[broker]` table
//! yields [`BrokerConfig::default`] and a missing `[[sources]]` list yields
//! no sources.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use fedbroker_core::filter::Geometry;
use fedbroker_core::types::LOCATION_ATTRIBUTE;
use fedbroker_core::{AttributeValue, BrokerConfig, Record};
use serde::{Deserialize, Serialize};

use crate::error::{HostError, Result};

/// Top-level host configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Broker tuning.
    pub broker: BrokerConfig,
    /// Fixture sources served in-process.
    pub sources: Vec<FixtureSourceConfig>,
}

/// One in-process source backed by a fixed record list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureSourceConfig {
    /// Source id, unique across the config.
    pub id: String,
    /// Simulated response latency.
    #[serde(default)]
    pub latency_ms: u64,
    /// When set, every query fails with this message.
    #[serde(default)]
    pub failure: Option<String>,
    /// Reported total hit count. Defaults to the number of matching records.
    #[serde(default)]
    pub total_hits: Option<u64>,
    /// Records this source serves.
    #[serde(default)]
    pub records: Vec<FixtureRecord>,
}

/// A record as written in the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureRecord {
    /// Record key, unique within its source.
    pub id: String,
    /// Display title.
    #[serde(default)]
    pub title: Option<String>,
    /// XML metadata, searched as text and by path.
    #[serde(default)]
    pub metadata: Option<String>,
    /// WKT geometry, stored as the record's `location` attribute.
    #[serde(default)]
    pub location: Option<String>,
    /// Typed attributes such as `created`.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl FixtureRecord {
    /// Materialize as a [`Record`] owned by `source_id`.
    pub fn to_record(&self, source_id: &str) -> Record {
        let mut record = Record::new(&self.id, source_id);
        record.title = self.title.clone();
        record.metadata = self.metadata.clone();
        record.attributes = self.attributes.clone();
        if let Some(wkt) = &self.location {
            record
                .attributes
                .insert(LOCATION_ATTRIBUTE.to_owned(), AttributeValue::Geometry(wkt.clone()));
        }
        record
    }
}

impl HostConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// parsed config fails [`HostConfig::validate`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| HostError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| HostError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/fedbroker/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("fedbroker").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("fedbroker")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/fedbroker-config/config.toml")
        }
    }

    /// Checks broker settings and source definitions.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Broker`] for invalid broker settings and
    /// [`HostError::Config`] for blank or duplicate source ids and
    /// unreadable record locations.
    pub fn validate(&self) -> Result<()> {
        self.broker.validate()?;
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(HostError::Config("source id must not be empty".into()));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(HostError::Config(format!("duplicate source id '{}'", source.id)));
            }
            for record in &source.records {
                if let Some(wkt) = &record.location {
                    Geometry::parse_wkt(wkt).map_err(|e| {
                        HostError::Config(format!(
                            "record '{}' in source '{}': {e}",
                            record.id, source.id
                        ))
                    })?;
                }
            }
        }
        Ok(())
    }

    /// A small demo federation: two healthy sources, one too slow for the
    /// default timeout, one that always fails.
    pub fn sample() -> Self {
        Self {
            broker: BrokerConfig::default(),
            sources: vec![
                FixtureSourceConfig {
                    id: "north-archive".into(),
                    latency_ms: 40,
                    records: vec![
                        sample_record(
                            "na-001",
                            "Coastal ice survey",
                            "<metacard><title>Coastal ice survey</title><keywords>coast ice satellite</keywords></metacard>",
                            Some("POINT(-63.60 44.60)"),
                            (2024, 2, 10),
                        ),
                        sample_record(
                            "na-002",
                            "Harbour traffic report",
                            "<metacard><title>Harbour traffic report</title><keywords>harbour shipping</keywords></metacard>",
                            Some("POINT(-63.57 44.65)"),
                            (2023, 11, 2),
                        ),
                        sample_record(
                            "na-003",
                            "Quarterly budget",
                            "<metacard><title>Quarterly budget</title></metacard>",
                            None,
                            (2024, 4, 1),
                        ),
                    ],
                    ..Default::default()
                },
                FixtureSourceConfig {
                    id: "harbour-feed".into(),
                    latency_ms: 15,
                    total_hits: Some(42),
                    records: vec![
                        sample_record(
                            "hf-001",
                            "Harbour imagery",
                            "<metacard><title>Harbour imagery</title><origin name=\"satelite feed\"/></metacard>",
                            Some("POINT(-63.58 44.64)"),
                            (2024, 3, 5),
                        ),
                        sample_record(
                            "hf-002",
                            "Tide gauge readings",
                            "<metacard><title>Tide gauge readings</title><keywords>coast tide</keywords></metacard>",
                            Some("POINT(-63.50 44.70)"),
                            (2024, 1, 20),
                        ),
                    ],
                    ..Default::default()
                },
                FixtureSourceConfig {
                    id: "slow-mirror".into(),
                    latency_ms: 60_000,
                    records: vec![sample_record(
                        "sm-001",
                        "Coastal ice survey (mirror)",
                        "<metacard><title>Coastal ice survey</title></metacard>",
                        None,
                        (2024, 2, 10),
                    )],
                    ..Default::default()
                },
                FixtureSourceConfig {
                    id: "offline".into(),
                    failure: Some("connection refused".into()),
                    ..Default::default()
                },
            ],
        }
    }
}

fn sample_record(
    id: &str,
    title: &str,
    metadata: &str,
    location: Option<&str>,
    (year, month, day): (i32, u32, u32),
) -> FixtureRecord {
    let mut attributes = BTreeMap::new();
    if let Some(created) = Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single() {
        attributes.insert("created".to_owned(), AttributeValue::Date(created));
    }
    FixtureRecord {
        id: id.into(),
        title: Some(title.into()),
        metadata: Some(metadata.into()),
        location: location.map(str::to_owned),
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_valid() {
        let config = HostConfig::sample();
        assert!(config.validate().is_ok());
        assert_eq!(config.sources.len(), 4);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let mut config = HostConfig::sample();
        config.broker.local_id = "edge-1".into();
        config.broker.renormalize_relevance = true;

        config.save_to_file(&path).expect("save");
        assert!(path.exists());

        let loaded = HostConfig::from_file(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[broker]
local_id = "edge-2"

[[sources]]
id = "solo"

[[sources.records]]
id = "r1"
title = "Coastal survey"
location = "POINT(10 20)"
"#,
        )
        .expect("write");

        let config = HostConfig::from_file(&path).expect("load");
        assert_eq!(config.broker.local_id, "edge-2");
        assert_eq!(config.broker.max_concurrent_sources, 8);
        assert_eq!(config.sources[0].latency_ms, 0);
        let record = config.sources[0].records[0].to_record("solo");
        assert_eq!(record.source_id, "solo");
        assert_eq!(
            record.attributes.get(LOCATION_ATTRIBUTE),
            Some(&AttributeValue::Geometry("POINT(10 20)".into()))
        );
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = HostConfig::from_file(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(HostError::Io(_))));
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").expect("write");
        assert!(matches!(HostConfig::from_file(&path), Err(HostError::Config(_))));
    }

    #[test]
    fn duplicate_source_ids_rejected() {
        let config = HostConfig {
            sources: vec![
                FixtureSourceConfig {
                    id: "a".into(),
                    ..Default::default()
                },
                FixtureSourceConfig {
                    id: "a".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate source id 'a'"));
    }

    #[test]
    fn bad_location_rejected() {
        let config = HostConfig {
            sources: vec![FixtureSourceConfig {
                id: "a".into(),
                records: vec![FixtureRecord {
                    id: "r1".into(),
                    location: Some("POINT(oops)".into()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(HostError::Config(_))));
    }

    #[test]
    fn invalid_broker_settings_rejected() {
        let mut config = HostConfig::default();
        config.broker.max_concurrent_sources = 0;
        assert!(matches!(config.validate(), Err(HostError::Broker(_))));
    }
}
