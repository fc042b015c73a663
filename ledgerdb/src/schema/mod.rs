mod parser;
mod types;

pub use parser::{parse_schema, parse_schema_json, parse_schema_str};
pub use types::*;

use crate::error::{LedgerDbError, Result};
use std::path::Path;

/// Read-only registry of every model class schema, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    definition: SchemaDefinition,
}

impl SchemaRegistry {
    /// Build a registry, checking that foreign references and unique specs are well formed.
    pub fn new(definition: SchemaDefinition) -> Result<Self> {
        check_definition(&definition)?;
        Ok(SchemaRegistry { definition })
    }

    /// Load a registry from a schema file (`.json`, otherwise YAML).
    pub fn load(path: &Path) -> Result<Self> {
        Self::new(parse_schema(path)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Self::new(parse_schema_str(content)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Self::new(parse_schema_json(content)?)
    }

    /// Schema of a model class. Unknown names are a caller bug.
    pub fn schema_for(&self, model: &str) -> Result<&ModelSchema> {
        self.definition
            .models
            .get(model)
            .ok_or_else(|| LedgerDbError::UnknownModel(model.to_string()))
    }

    pub fn contains(&self, model: &str) -> bool {
        self.definition.models.contains_key(model)
    }

    pub fn models(&self) -> impl Iterator<Item = (&str, &ModelSchema)> {
        self.definition
            .models
            .iter()
            .map(|(name, schema)| (name.as_str(), schema))
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.definition.models.keys().map(String::as_str)
    }

    pub fn definition(&self) -> &SchemaDefinition {
        &self.definition
    }

    /// `(model, field)` pairs whose foreign key references `model`.
    pub fn dependents_of<'a>(&'a self, model: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.models().flat_map(move |(name, schema)| {
            schema
                .constraints
                .foreign
                .iter()
                .filter(move |(_, fk)| fk.reference == model)
                .map(move |(field, _)| (name, field.as_str()))
        })
    }
}

fn check_definition(definition: &SchemaDefinition) -> Result<()> {
    for (name, schema) in &definition.models {
        for (field, fk) in &schema.constraints.foreign {
            if !definition.models.contains_key(&fk.reference) {
                return Err(LedgerDbError::Schema(format!(
                    "Field '{name}.{field}' references unknown model class '{}'",
                    fk.reference
                )));
            }
        }
        for key in &schema.constraints.unique {
            if key.fields().any(str::is_empty) {
                return Err(LedgerDbError::Schema(format!(
                    "Model class '{name}' has a malformed unique key '{}'",
                    key.spec()
                )));
            }
        }
    }
    Ok(())
}
