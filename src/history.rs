//! Bounded per-location weather history persisted as JSON files.
//!
//! Every location owns one file, `{key}_history.json`, under the configured
//! base directory. Each write is a full load → append → truncate → overwrite
//! cycle with no locking, so concurrent writers to the same key race and the
//! last one to persist wins.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Maximum number of entries retained per location.
pub const HISTORY_LIMIT: usize = 100;

const FILE_SUFFIX: &str = "_history.json";
const KEY_SEPARATOR: char = '_';

/// Observation fields as handed to the store, before timestamping.
pub type ObservationFields = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub base_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("weather"),
        }
    }
}

/// Current time as RFC 3339 in UTC with microseconds, e.g. `2026-10-18T09:30:00.123456Z`.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Normalized identifier of one history file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationKey(String);

impl LocationKey {
    /// Lowercases `location` and joins its whitespace-separated words with `_`.
    pub fn new(location: &str) -> Result<Self, StoreError> {
        let key = location
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join("_");

        if !is_valid_key(&key) {
            return Err(StoreError::InvalidLocation(location.to_string()));
        }

        Ok(Self(key))
    }

    /// Accepts only names `new` could have produced.
    fn from_file_name(name: &str) -> Option<Self> {
        let key = name.strip_suffix(FILE_SUFFIX)?;
        let normalized = Self::new(key).ok()?;
        (normalized.0 == key).then_some(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", self.0, FILE_SUFFIX)
    }

    /// Reverse of the normalization: `new_york` becomes `New York`.
    pub fn display_name(&self) -> String {
        self.0
            .split(KEY_SEPARATOR)
            .filter(|word| !word.is_empty())
            .map(title_case)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && !key.starts_with('.') && !key.contains(['/', '\\', '\0'])
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// One timestamped observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    #[serde(flatten)]
    pub fields: ObservationFields,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryLog {
    pub location: String,
    #[serde(default)]
    pub entries: Vec<WeatherRecord>,
}

impl HistoryLog {
    fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            entries: Vec::new(),
        }
    }

    fn push(&mut self, record: WeatherRecord) {
        self.entries.push(record);
        self.truncate_to_latest(HISTORY_LIMIT);
    }

    /// Keeps only the newest `limit` entries.
    pub fn truncate_to_latest(&mut self, limit: usize) {
        if self.entries.len() > limit {
            let excess = self.entries.len() - limit;
            self.entries.drain(..excess);
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    base_path: PathBuf,
}

impl HistoryStore {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            base_path: config.base_path,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, key: &LocationKey) -> PathBuf {
        self.base_path.join(key.file_name())
    }

    /// Appends `fields` to the log of `location`, stamped with the current time.
    pub async fn record(
        &self,
        location: &str,
        mut fields: ObservationFields,
    ) -> Result<(), StoreError> {
        let key = LocationKey::new(location)?;
        let path = self.path_for(&key);

        let mut log = match read_log(&path).await? {
            Some(log) => log,
            None => HistoryLog::new(location),
        };

        // The store owns the timestamp.
        fields.remove("timestamp");
        log.push(WeatherRecord {
            fields,
            timestamp: timestamp_now(),
        });

        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.base_path.clone(),
                source,
            })?;

        let encoded = serde_json::to_vec_pretty(&log)?;
        tokio::fs::write(&path, encoded)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(
            key = key.as_str(),
            entries = log.entries.len(),
            "recorded weather history"
        );
        Ok(())
    }

    pub async fn fetch(&self, location: &str) -> Result<HistoryLog, StoreError> {
        let key = LocationKey::new(location)?;
        read_log(&self.path_for(&key))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                location: location.to_string(),
            })
    }

    /// Display names of every location with a history file, in directory order.
    pub async fn list_known_locations(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.base_path.clone(),
                    source,
                });
            }
        };

        let mut locations = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(StoreError::Io {
                        path: self.base_path.clone(),
                        source,
                    });
                }
            };

            let Some(key) = entry
                .file_name()
                .to_str()
                .and_then(LocationKey::from_file_name)
            else {
                continue;
            };

            match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => locations.push(key.display_name()),
                Ok(_) => {}
                Err(source) => {
                    return Err(StoreError::Io {
                        path: entry.path(),
                        source,
                    });
                }
            }
        }

        Ok(locations)
    }
}

async fn read_log(path: &Path) -> Result<Option<HistoryLog>, StoreError> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|source| StoreError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> HistoryStore {
        HistoryStore::new(StorageConfig {
            base_path: dir.path().join("weather"),
        })
    }

    fn fields(pairs: &[(&str, &str)]) -> ObservationFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_location_key_normalization() {
        let a = LocationKey::new("New York").unwrap();
        let b = LocationKey::new("new york").unwrap();
        let c = LocationKey::new("  NEW \t YORK ").unwrap();

        assert_eq!(a.as_str(), "new_york");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.file_name(), "new_york_history.json");
    }

    #[test]
    fn test_location_key_rejects_paths() {
        assert!(LocationKey::new("").is_err());
        assert!(LocationKey::new("   ").is_err());
        assert!(LocationKey::new("../etc").is_err());
        assert!(LocationKey::new("a/b").is_err());
        assert!(LocationKey::new("a\\b").is_err());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(LocationKey::new("new york").unwrap().display_name(), "New York");
        assert_eq!(LocationKey::new("PARIS").unwrap().display_name(), "Paris");
        assert_eq!(
            LocationKey::from_file_name("rio_de_janeiro_history.json")
                .unwrap()
                .display_name(),
            "Rio De Janeiro"
        );
        assert!(LocationKey::from_file_name("notes.txt").is_none());
        assert!(LocationKey::from_file_name("_history.json").is_none());
        assert!(LocationKey::from_file_name(".x_history.json").is_none());
        assert!(LocationKey::from_file_name("Paris_history.json").is_none());
        assert!(LocationKey::from_file_name("new york_history.json").is_none());
    }

    #[tokio::test]
    async fn test_record_then_fetch_berlin() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store
            .record("Berlin", fields(&[("temperature_c", "5")]))
            .await
            .unwrap();

        let log = store.fetch("Berlin").await.unwrap();
        assert_eq!(log.location, "Berlin");
        assert_eq!(log.entries.len(), 1);
        assert_eq!(log.entries[0].fields, fields(&[("temperature_c", "5")]));
        assert!(chrono::DateTime::parse_from_rfc3339(&log.entries[0].timestamp).is_ok());

        let raw = std::fs::read_to_string(dir.path().join("weather/berlin_history.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["location"], "Berlin");
        assert_eq!(value["entries"][0]["temperature_c"], "5");
        assert!(value["entries"][0]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_record_keeps_first_display_name() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.record("New York", fields(&[("n", "1")])).await.unwrap();
        store.record("new york", fields(&[("n", "2")])).await.unwrap();
        store.record("NEW  YORK", fields(&[("n", "3")])).await.unwrap();

        let log = store.fetch("new York").await.unwrap();
        assert_eq!(log.location, "New York");
        let order: Vec<_> = log.entries.iter().map(|e| e.fields["n"].as_str()).collect();
        assert_eq!(order, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        for i in 0..130 {
            store
                .record("Oslo", fields(&[("seq", i.to_string().as_str())]))
                .await
                .unwrap();
        }

        let log = store.fetch("Oslo").await.unwrap();
        assert_eq!(log.entries.len(), HISTORY_LIMIT);
        let expected: Vec<String> = (30..130).map(|i| i.to_string()).collect();
        let actual: Vec<String> = log.entries.iter().map(|e| e.fields["seq"].clone()).collect();
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_caller_timestamp_is_replaced() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store
            .record("Lima", fields(&[("timestamp", "yesterday"), ("humidity", "80")]))
            .await
            .unwrap();

        let log = store.fetch("Lima").await.unwrap();
        let entry = &log.entries[0];
        assert_ne!(entry.timestamp, "yesterday");
        assert!(!entry.fields.contains_key("timestamp"));
        assert_eq!(entry.fields["humidity"], "80");
    }

    #[tokio::test]
    async fn test_fetch_missing_location() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let err = store.fetch("Nowhere").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "No weather history recorded for Nowhere");
    }

    #[tokio::test]
    async fn test_fetch_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.base_path()).unwrap();
        std::fs::write(store.base_path().join("rome_history.json"), "{not json").unwrap();

        let err = store.fetch("Rome").await.unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));

        let err = store.record("Rome", fields(&[("a", "b")])).await.unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_list_known_locations() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(store.list_known_locations().await.unwrap().is_empty());

        store.record("Paris", fields(&[("a", "1")])).await.unwrap();
        store.record("Tokyo", fields(&[("a", "2")])).await.unwrap();
        store.record("new york", fields(&[("a", "3")])).await.unwrap();
        std::fs::write(store.base_path().join("README.txt"), "ignored").unwrap();
        std::fs::write(store.base_path().join(".x_history.json"), "{}").unwrap();
        std::fs::create_dir(store.base_path().join("lyon_history.json")).unwrap();

        let mut locations = store.list_known_locations().await.unwrap();
        locations.sort();
        assert_eq!(locations, vec!["New York", "Paris", "Tokyo"]);
    }

    #[test]
    fn test_truncate_to_latest() {
        let mut log = HistoryLog::new("X");
        for i in 0..5 {
            log.push(WeatherRecord {
                fields: fields(&[("i", i.to_string().as_str())]),
                timestamp: String::new(),
            });
        }
        log.truncate_to_latest(2);
        assert_eq!(log.entries.len(), 2);
        assert_eq!(log.entries[0].fields["i"], "3");

        log.truncate_to_latest(10);
        assert_eq!(log.entries.len(), 2);
    }
}
