//! On-disk layout: one `<model>.json` per model class (id -> record), one shared
//! index file, and the static schema file, all under the data directory.

mod queue;

pub use queue::WriteQueue;

use crate::config::StoreConfig;
use crate::error::{LedgerDbError, Result};
use crate::index::IndexCache;
use crate::record::{DataCache, ModelData};
use crate::schema::{SchemaDefinition, SchemaRegistry};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Model data loaded at startup.
#[derive(Debug, Default)]
pub struct LoadedData {
    pub data: DataCache,
    /// Model classes whose data file was created from bootstrap content.
    pub bootstrapped: Vec<String>,
}

pub struct Persistence {
    config: StoreConfig,
    queue: WriteQueue,
}

impl Persistence {
    /// Ensure the data directory exists.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Persistence {
            config: config.clone(),
            queue: WriteQueue::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.data_dir
    }

    /// Load every model's file, creating missing ones from bootstrap content.
    pub fn load_models(&self, schemas: &SchemaRegistry) -> Result<LoadedData> {
        let mut loaded = LoadedData::default();
        for (model, schema) in schemas.models() {
            let path = self.config.model_path(model);
            if !path.exists() {
                log::info!(
                    "Creating {} with {} bootstrap record(s)",
                    path.display(),
                    schema.bootstrap.len()
                );
                let bytes = self.encode(&schema.bootstrap).map_err(|e| load_error(&path, e))?;
                std::fs::write(&path, bytes).map_err(|e| load_error(&path, e.into()))?;
                loaded.bootstrapped.push(model.to_string());
            }
            let records: ModelData = read_json(&path)?;
            loaded.data.insert(model.to_string(), records);
        }
        Ok(loaded)
    }

    /// Load the shared index file, or `None` when it does not exist yet.
    pub fn load_indexes(&self) -> Result<Option<IndexCache>> {
        let path = self.config.index_path();
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    /// Write the schema file when the data dir has none.
    pub fn ensure_schema_file(&mut self, definition: &SchemaDefinition) {
        if self.config.resolve_schema_path().is_some() {
            return;
        }
        let path = self.config.data_dir.join("schema.json");
        self.enqueue(path, definition);
    }

    pub fn write_model(&mut self, model: &str, records: &ModelData) {
        let path = self.config.model_path(model);
        self.enqueue(path, records);
    }

    pub fn write_indexes(&mut self, indexes: &IndexCache) {
        let path = self.config.index_path();
        self.enqueue(path, indexes);
    }

    pub fn flush(&self) {
        self.queue.flush();
    }

    fn enqueue<T: Serialize>(&mut self, path: PathBuf, value: &T) {
        match self.encode(value) {
            Ok(bytes) => self.queue.enqueue(&path, bytes),
            Err(e) => log::error!("Failed to serialize {}: {e}", path.display()),
        }
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let bytes = if self.config.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(bytes)
    }
}

/// Whole-file read and parse. Failures name the file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read(path).map_err(|e| load_error(path, e.into()))?;
    serde_json::from_slice(&content).map_err(|e| load_error(path, e.into()))
}

fn load_error(path: &Path, source: LedgerDbError) -> LedgerDbError {
    log::error!("Failed to load {}: {source}", path.display());
    LedgerDbError::Load {
        path: path.to_path_buf(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_creates_files_with_bootstrap() {
        let tmp = TempDir::new().unwrap();
        let persistence = Persistence::open(&StoreConfig::new(tmp.path().join("books"))).unwrap();
        let loaded = persistence.load_models(&fixtures::registry()).unwrap();

        assert!(tmp.path().join("books/tags.json").exists());
        assert_eq!(loaded.data["sequences"]["1"]["name"], "receipts");
        assert!(loaded.data["tags"].is_empty());
        assert_eq!(loaded.bootstrapped.len(), fixtures::registry().model_names().count());
    }

    #[test]
    fn test_existing_files_are_not_bootstrapped() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("sequences.json"), "{}").unwrap();
        let persistence = Persistence::open(&StoreConfig::new(tmp.path())).unwrap();
        let loaded = persistence.load_models(&fixtures::registry()).unwrap();

        assert!(loaded.data["sequences"].is_empty());
        assert!(!loaded.bootstrapped.contains(&"sequences".to_string()));
    }

    #[test]
    fn test_corrupt_file_is_fatal() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("tags.json"), "{ not json").unwrap();
        let persistence = Persistence::open(&StoreConfig::new(tmp.path())).unwrap();
        let err = persistence.load_models(&fixtures::registry()).unwrap_err();

        match err {
            LedgerDbError::Load { path, source } => {
                assert_eq!(path, tmp.path().join("tags.json"));
                assert!(matches!(*source, LedgerDbError::Json(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_index_file_round_trip() {
        let tmp = TempDir::new().unwrap();
        let mut persistence = Persistence::open(&StoreConfig::new(tmp.path())).unwrap();
        assert_eq!(persistence.load_indexes().unwrap(), None);

        let mut cache = IndexCache::default();
        cache
            .unique
            .entry("sequences".into())
            .or_default()
            .entry("name".into())
            .or_default()
            .insert("receipts".into(), "1".into());
        persistence.write_indexes(&cache);
        persistence.flush();

        assert_eq!(persistence.load_indexes().unwrap(), Some(cache));
    }

    #[test]
    fn test_compact_output() {
        let tmp = TempDir::new().unwrap();
        let mut persistence = Persistence::open(&StoreConfig::new(tmp.path()).compact()).unwrap();
        persistence.write_indexes(&IndexCache::default());
        persistence.flush();

        let raw = std::fs::read_to_string(tmp.path().join("_indexes.json")).unwrap();
        assert_eq!(raw, r#"{"unique":{},"foreign":{},"filter":{}}"#);
    }

    #[test]
    fn test_schema_file_written_once() {
        let tmp = TempDir::new().unwrap();
        let mut persistence = Persistence::open(&StoreConfig::new(tmp.path())).unwrap();
        let registry = fixtures::registry();
        persistence.ensure_schema_file(registry.definition());
        persistence.flush();

        let written = SchemaRegistry::load(&tmp.path().join("schema.json")).unwrap();
        assert_eq!(written.definition(), registry.definition());
    }
}
