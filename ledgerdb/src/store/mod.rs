use crate::atomic::{self, Step, StepResult};
use crate::config::StoreConfig;
use crate::error::{LedgerDbError, Result};
use crate::index::{IndexCache, IndexManager};
use crate::persist::Persistence;
use crate::query::{self, ListParams, ListResult, ViewParams, ViewResult};
use crate::record::{self, DataCache, ModelData, Record};
use crate::schema::{SchemaDefinition, SchemaRegistry};
use crate::validation::{self, Checks};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Borrowed view of everything the store loaded.
#[derive(Debug, Serialize)]
pub struct InitData<'a> {
    pub schemas: &'a SchemaDefinition,
    pub data: &'a DataCache,
    pub indexes: &'a IndexCache,
}

/// The main entry point for LedgerDB.
/// Owns the schema registry, the record cache and the index cache, and keeps
/// the files under the data directory in step with them.
pub struct Store {
    schemas: SchemaRegistry,
    data: DataCache,
    indexes: IndexCache,
    /// Highest id ever handed out per model class.
    high_water: BTreeMap<String, u64>,
    persistence: Persistence,
}

impl Store {
    /// Open a store, loading the schema from the configured path or the data dir.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let schema_path = config.resolve_schema_path().ok_or_else(|| {
            LedgerDbError::Schema(format!(
                "no schema file found in {}",
                config.data_dir().display()
            ))
        })?;
        let schemas = SchemaRegistry::load(&schema_path)?;
        Self::init(config, schemas)
    }

    /// Open a store over `config.data_dir` with an in-code schema registry.
    /// Missing model files are created from bootstrap content; a missing index
    /// file is rebuilt from the loaded records.
    pub fn init(config: StoreConfig, schemas: SchemaRegistry) -> Result<Self> {
        let mut persistence = Persistence::open(&config)?;
        persistence.ensure_schema_file(schemas.definition());

        let loaded = persistence.load_models(&schemas)?;
        let data = loaded.data;
        let manager = IndexManager::new(&schemas);

        let indexes = match persistence.load_indexes()? {
            Some(mut indexes) => {
                for model in &loaded.bootstrapped {
                    for record in data.get(model).into_iter().flat_map(|r| r.values()) {
                        indexes.merge(&manager.apply(model, record)?);
                    }
                }
                indexes
            }
            None => {
                log::info!("No index file in {}, rebuilding", config.data_dir().display());
                manager.rebuild(&data)?
            }
        };
        persistence.write_indexes(&indexes);

        let high_water = data
            .iter()
            .map(|(model, records)| (model.clone(), record::max_id(records)))
            .collect();

        log::info!(
            "Opened store at {} ({} model class(es))",
            config.data_dir().display(),
            data.len()
        );

        Ok(Store {
            schemas,
            data,
            indexes,
            high_water,
            persistence,
        })
    }

    pub fn init_data(&self) -> InitData<'_> {
        InitData {
            schemas: self.schemas.definition(),
            data: &self.data,
            indexes: &self.indexes,
        }
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn root(&self) -> &Path {
        self.persistence.root()
    }

    pub fn list(&self, model: &str, params: &ListParams) -> Result<ListResult> {
        query::list(&self.schemas, &self.indexes, &self.data, model, params)
    }

    pub fn view(&self, model: &str, id: &str, params: &ViewParams) -> Result<ViewResult> {
        query::view(&self.schemas, &self.data, model, id, params)
    }

    pub fn find(&self, model: &str, id: &str) -> Option<&Record> {
        self.data.get(model).and_then(|records| records.get(id))
    }

    /// Validate and insert a new record under the next id.
    pub fn create(&mut self, model: &str, params: Record) -> Result<Record> {
        let schema = self.schemas.schema_for(model)?;
        let mut candidate = record::strip_reserved(params);
        schema.apply_defaults(&mut candidate);
        self.check(model, &candidate)?;

        let id = self.next_id(model);
        let now = record::timestamp();
        candidate.insert(record::ID.into(), Value::String(id.clone()));
        candidate.insert(record::CREATED_AT.into(), Value::String(now.clone()));
        candidate.insert(record::UPDATED_AT.into(), Value::String(now));

        let delta = IndexManager::new(&self.schemas).apply(model, &candidate)?;
        self.indexes.merge(&delta);
        self.data
            .entry(model.to_string())
            .or_default()
            .insert(id.clone(), candidate.clone());
        self.persist(model);

        log::debug!("Created {model}/{id}");
        Ok(candidate)
    }

    /// Merge `params` over an existing record and re-validate the result.
    pub fn update(&mut self, model: &str, id: &str, params: Record) -> Result<Record> {
        let schema = self.schemas.schema_for(model)?;
        let existing = self.existing(model, id)?;

        let mut candidate = existing.clone();
        candidate.extend(record::strip_reserved(params));
        schema.apply_defaults(&mut candidate);
        self.check(model, &candidate)?;
        candidate.insert(
            record::UPDATED_AT.into(),
            Value::String(record::timestamp()),
        );

        let delta = IndexManager::new(&self.schemas).diff(model, &existing, &candidate)?;
        self.data
            .entry(model.to_string())
            .or_default()
            .insert(id.to_string(), candidate.clone());
        if delta.is_empty() {
            self.persist_model(model);
        } else {
            self.indexes.merge(&delta);
            self.persist(model);
        }

        log::debug!("Updated {model}/{id}");
        Ok(candidate)
    }

    /// Delete a record nothing references. Returns the removed record.
    pub fn remove(&mut self, model: &str, id: &str) -> Result<Record> {
        self.schemas.schema_for(model)?;
        let existing = self.existing(model, id)?;
        if validation::is_used(&self.indexes, model, &existing) {
            return Err(LedgerDbError::InUse {
                model: model.to_string(),
                id: id.to_string(),
            });
        }

        let delta = IndexManager::new(&self.schemas).retract(model, &existing)?;
        self.indexes.merge(&delta);
        if let Some(records) = self.data.get_mut(model) {
            records.remove(id);
        }
        self.persist(model);

        log::debug!("Removed {model}/{id}");
        Ok(existing)
    }

    /// Remove a record this process just created, handing its id back when
    /// nothing newer was issued. Used by compensating steps.
    pub(crate) fn withdraw(&mut self, model: &str, id: &str) -> Result<Record> {
        let removed = self.remove(model, id)?;
        if let (Some(numeric), Some(mark)) = (record::parse_id(id), self.high_water.get_mut(model)) {
            if *mark == numeric {
                *mark = numeric.saturating_sub(1);
            }
        }
        Ok(removed)
    }

    /// Put back an exact record (timestamps included) without validation.
    /// Used by compensating steps.
    pub(crate) fn reinstate(&mut self, model: &str, record: Record) -> Result<Record> {
        self.schemas.schema_for(model)?;
        let id = record::record_id(&record)
            .map(str::to_string)
            .ok_or_else(|| LedgerDbError::Other(format!("cannot reinstate {model} record without id")))?;

        let manager = IndexManager::new(&self.schemas);
        let delta = match self.find(model, &id) {
            Some(current) => manager.diff(model, current, &record)?,
            None => manager.apply(model, &record)?,
        };
        self.indexes.merge(&delta);
        if let Some(numeric) = record::parse_id(&id) {
            let mark = self.high_water.entry(model.to_string()).or_default();
            *mark = (*mark).max(numeric);
        }
        self.data
            .entry(model.to_string())
            .or_default()
            .insert(id.clone(), record.clone());
        self.persist(model);

        log::debug!("Reinstated {model}/{id}");
        Ok(record)
    }

    /// Run steps in order, compensating the ones that succeeded on failure.
    pub fn atomic(&mut self, steps: Vec<Step<'_, Store>>) -> Result<Vec<StepResult>> {
        atomic::execute(self, steps)
    }

    /// Raw copy of a model's records.
    pub fn download(&self, model: &str) -> Result<ModelData> {
        self.schemas.schema_for(model)?;
        Ok(self.data.get(model).cloned().unwrap_or_default())
    }

    /// Replace a model's records wholesale. No validation, indexes untouched.
    pub fn upload(&mut self, model: &str, records: ModelData) -> Result<()> {
        self.schemas.schema_for(model)?;
        let mark = self.high_water.entry(model.to_string()).or_default();
        *mark = (*mark).max(record::max_id(&records));
        log::debug!("Uploaded {} record(s) into {model}", records.len());
        self.data.insert(model.to_string(), records);
        self.persist_model(model);
        Ok(())
    }

    pub fn download_indexes(&self) -> IndexCache {
        self.indexes.clone()
    }

    /// Replace the index cache wholesale.
    pub fn upload_indexes(&mut self, indexes: IndexCache) {
        self.indexes = indexes;
        self.persistence.write_indexes(&self.indexes);
    }

    /// Recompute every index from the record cache.
    pub fn rebuild_indexes(&mut self) -> Result<()> {
        self.indexes = IndexManager::new(&self.schemas).rebuild(&self.data)?;
        self.persistence.write_indexes(&self.indexes);
        log::info!("Rebuilt indexes for {} model class(es)", self.data.len());
        Ok(())
    }

    /// Record counts per model class.
    pub fn status(&self) -> Value {
        let mut models = serde_json::Map::new();
        for name in self.schemas.model_names() {
            let count = self.data.get(name).map(|r| r.len()).unwrap_or(0);
            models.insert(name.to_string(), serde_json::json!({ "count": count }));
        }

        serde_json::json!({
            "root": self.root().display().to_string(),
            "models": models,
        })
    }

    /// Block until every queued file write has landed.
    pub fn flush(&self) {
        self.persistence.flush();
    }

    fn check(&self, model: &str, candidate: &Record) -> Result<()> {
        validation::validate(
            &self.schemas,
            &self.indexes,
            &self.data,
            model,
            candidate,
            Checks::default(),
        )?
        .into_result()
    }

    fn existing(&self, model: &str, id: &str) -> Result<Record> {
        self.find(model, id)
            .cloned()
            .ok_or_else(|| LedgerDbError::NotFound {
                model: model.to_string(),
                id: id.to_string(),
            })
    }

    fn next_id(&mut self, model: &str) -> String {
        let current = self.data.get(model).map(record::max_id).unwrap_or(0);
        let mark = self.high_water.entry(model.to_string()).or_default();
        *mark = (*mark).max(current) + 1;
        mark.to_string()
    }

    /// Rewrite the model file and the index file.
    fn persist(&mut self, model: &str) {
        self.persist_model(model);
        self.persistence.write_indexes(&self.indexes);
    }

    fn persist_model(&mut self, model: &str) {
        let empty = ModelData::new();
        let records = self.data.get(model).unwrap_or(&empty);
        self.persistence.write_model(model, records);
    }
}
