use crate::record::{self, ModelData, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Top-level schema definition: model class name -> model schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDefinition {
    pub models: BTreeMap<String, ModelSchema>,
}

/// Schema of a single model class
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDefinition>,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub indexes: IndexDefinitions,
    /// Seed records written when the model's data file does not exist yet.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bootstrap: ModelData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(default)]
    pub default: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub unique: Vec<UniqueKey>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub foreign: BTreeMap<String, ForeignKey>,
}

/// A composite unique key spec, e.g. `code|symbol|effectiveStart`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueKey(pub String);

impl UniqueKey {
    pub fn spec(&self) -> &str {
        &self.0
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.split('|')
    }

    /// Join the record's values for every field of this key with `|`.
    pub fn joined_value(&self, record: &Record) -> String {
        self.fields()
            .map(|field| record::value_key(record.get(field)))
            .collect::<Vec<_>>()
            .join("|")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinitions {
    #[serde(default)]
    pub filter: BTreeMap<String, FilterIndexDefinition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterIndexDefinition {
    /// Partial (case-insensitive regex) matching instead of equality.
    #[serde(rename = "match", default)]
    pub partial: bool,
}

impl ModelSchema {
    /// Default value declared for a field, if any.
    pub fn default_for(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).map(|f| &f.default)
    }

    /// Model class referenced by a foreign-key field.
    pub fn foreign_reference(&self, field: &str) -> Option<&str> {
        self.constraints
            .foreign
            .get(field)
            .map(|fk| fk.reference.as_str())
    }

    /// Whether the field uses partial matching in `list` filters.
    pub fn is_partial_match(&self, field: &str) -> bool {
        self.indexes
            .filter
            .get(field)
            .map(|def| def.partial)
            .unwrap_or(false)
    }

    /// Fill every declared field that is missing or null with its non-null default.
    pub fn apply_defaults(&self, record: &mut Record) {
        for (field_name, field_def) in &self.fields {
            let has_value = record.get(field_name).map(|v| !v.is_null()).unwrap_or(false);
            if !has_value && !field_def.default.is_null() {
                record.insert(field_name.clone(), field_def.default.clone());
            }
        }
    }
}
