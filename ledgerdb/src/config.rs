use std::path::{Path, PathBuf};

pub const DATA_DIR_VAR: &str = "LEDGERDB_DATA_DIR";
pub const SCHEMA_VAR: &str = "LEDGERDB_SCHEMA";
pub const DEFAULT_INDEX_FILE: &str = "_indexes.json";

/// Schema file names looked up in the data directory, in order.
const SCHEMA_FILES: [&str; 3] = ["schema.json", "schema.yaml", "schema.yml"];

/// Where and how a store persists its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Explicit schema file; otherwise `schema.json`/`schema.yaml` in the data dir.
    pub schema_path: Option<PathBuf>,
    pub index_file: String,
    /// Pretty-print data and index files.
    pub pretty: bool,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        StoreConfig {
            data_dir: data_dir.into(),
            schema_path: None,
            index_file: DEFAULT_INDEX_FILE.to_string(),
            pretty: true,
        }
    }

    /// Read `LEDGERDB_DATA_DIR` (default `data`) and `LEDGERDB_SCHEMA`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup(DATA_DIR_VAR).unwrap_or_else(|| "data".to_string());
        let mut config = StoreConfig::new(data_dir);
        config.schema_path = lookup(SCHEMA_VAR).map(PathBuf::from);
        config
    }

    pub fn with_schema_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_path = Some(path.into());
        self
    }

    pub fn with_index_file(mut self, name: impl Into<String>) -> Self {
        self.index_file = name.into();
        self
    }

    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(&self.index_file)
    }

    pub fn model_path(&self, model: &str) -> PathBuf {
        self.data_dir.join(format!("{model}.json"))
    }

    /// The explicit schema path, or the first schema file present in the data dir.
    pub fn resolve_schema_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.schema_path {
            return Some(path.clone());
        }
        SCHEMA_FILES
            .iter()
            .map(|name| self.data_dir.join(name))
            .find(|path| path.exists())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
