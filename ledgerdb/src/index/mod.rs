//! Hand-maintained secondary indexes.
//!
//! Three families live in one [`IndexCache`], persisted together:
//!
//! - `unique[model][keySpec][joinedValue] = id`
//! - `foreign[referencedModel][referencedId][dependentModel] = [dependentId, ...]`
//! - `filter[model][field][value] = [id, ...]`
//!
//! [`IndexManager`] computes [`IndexDelta`]s from records without touching the
//! cache; [`IndexCache::merge`] is the only place the cache is mutated.

use crate::error::Result;
use crate::record::{self, DataCache, Record};
use crate::schema::SchemaRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type UniqueIndex = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;
pub type ForeignIndex = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<String>>>>;
pub type FilterIndex = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<String>>>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexCache {
    #[serde(default)]
    pub unique: UniqueIndex,
    #[serde(default)]
    pub foreign: ForeignIndex,
    #[serde(default)]
    pub filter: FilterIndex,
}

/// A single index entry produced by one record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexEntry {
    Unique {
        model: String,
        key: String,
        value: String,
        id: String,
    },
    Foreign {
        referenced: String,
        referenced_id: String,
        dependent: String,
        id: String,
    },
    Filter {
        model: String,
        field: String,
        value: String,
        id: String,
    },
}

/// Whole sub-trees dropped when a record goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Purge {
    /// `foreign[model][id]`: everything that referenced the removed record.
    ForeignFanOut { model: String, id: String },
    /// `filter[model][field][value]` where `value` is the removed record's id.
    FilterValue {
        model: String,
        field: String,
        value: String,
    },
}

/// Changes to apply to an [`IndexCache`]: removals first, then purges, then inserts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDelta {
    pub insert: Vec<IndexEntry>,
    pub remove: Vec<IndexEntry>,
    pub purge: Vec<Purge>,
}

impl IndexDelta {
    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.remove.is_empty() && self.purge.is_empty()
    }
}

/// Computes index deltas for records of the registered model classes.
pub struct IndexManager<'a> {
    schemas: &'a SchemaRegistry,
}

impl<'a> IndexManager<'a> {
    pub fn new(schemas: &'a SchemaRegistry) -> Self {
        IndexManager { schemas }
    }

    /// Every index entry the record contributes under the model's schema.
    pub fn entries(&self, model: &str, record: &Record) -> Result<Vec<IndexEntry>> {
        let schema = self.schemas.schema_for(model)?;
        let Some(id) = record::record_id(record) else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();

        for key in &schema.constraints.unique {
            entries.push(IndexEntry::Unique {
                model: model.to_string(),
                key: key.spec().to_string(),
                value: key.joined_value(record),
                id: id.to_string(),
            });
        }

        for (field, fk) in &schema.constraints.foreign {
            for value in record::flatten_keys(record.get(field)) {
                entries.push(IndexEntry::Foreign {
                    referenced: fk.reference.clone(),
                    referenced_id: value,
                    dependent: model.to_string(),
                    id: id.to_string(),
                });
            }
        }

        for field in schema.indexes.filter.keys() {
            for value in record::flatten_keys(record.get(field)) {
                entries.push(IndexEntry::Filter {
                    model: model.to_string(),
                    field: field.clone(),
                    value,
                    id: id.to_string(),
                });
            }
        }

        Ok(entries)
    }

    /// Index a newly created (or reinstated) record.
    pub fn apply(&self, model: &str, record: &Record) -> Result<IndexDelta> {
        Ok(IndexDelta {
            insert: self.entries(model, record)?,
            ..IndexDelta::default()
        })
    }

    /// Drop everything a removed record contributed, plus entries keyed by its id.
    pub fn retract(&self, model: &str, record: &Record) -> Result<IndexDelta> {
        let purge = match record::record_id(record) {
            Some(id) => self.cleanup(model, id),
            None => Vec::new(),
        };
        Ok(IndexDelta {
            remove: self.entries(model, record)?,
            purge,
            ..IndexDelta::default()
        })
    }

    /// Re-index an updated record. Entries both records produce are left
    /// alone, so an update that touches no indexed value yields an empty delta.
    pub fn diff(&self, model: &str, old: &Record, new: &Record) -> Result<IndexDelta> {
        let old_entries: BTreeSet<IndexEntry> = self.entries(model, old)?.into_iter().collect();
        let new_entries: BTreeSet<IndexEntry> = self.entries(model, new)?.into_iter().collect();

        Ok(IndexDelta {
            remove: old_entries.difference(&new_entries).cloned().collect(),
            insert: new_entries.difference(&old_entries).cloned().collect(),
            purge: Vec::new(),
        })
    }

    /// Sub-trees keyed by a removed record's id.
    pub fn cleanup(&self, model: &str, id: &str) -> Vec<Purge> {
        let mut purge = vec![Purge::ForeignFanOut {
            model: model.to_string(),
            id: id.to_string(),
        }];
        for (dependent, field) in self.schemas.dependents_of(model) {
            let filtered = self
                .schemas
                .schema_for(dependent)
                .map(|schema| schema.indexes.filter.contains_key(field))
                .unwrap_or(false);
            if filtered {
                purge.push(Purge::FilterValue {
                    model: dependent.to_string(),
                    field: field.to_string(),
                    value: id.to_string(),
                });
            }
        }
        purge
    }

    /// Recompute every index from scratch.
    pub fn rebuild(&self, data: &DataCache) -> Result<IndexCache> {
        let mut cache = IndexCache::default();
        for (model, records) in data {
            if !self.schemas.contains(model) {
                log::warn!("Skipping index rebuild for undeclared model class '{model}'");
                continue;
            }
            for record in records.values() {
                cache.merge(&self.apply(model, record)?);
            }
        }
        Ok(cache)
    }
}

impl IndexCache {
    pub fn merge(&mut self, delta: &IndexDelta) {
        for entry in &delta.remove {
            self.remove_entry(entry);
        }
        for purge in &delta.purge {
            self.purge(purge);
        }
        for entry in &delta.insert {
            self.insert_entry(entry);
        }
    }

    /// Ids of dependents of `model/id`, grouped by dependent model class.
    pub fn dependents(&self, model: &str, id: &str) -> Option<&BTreeMap<String, Vec<String>>> {
        self.foreign.get(model).and_then(|by_id| by_id.get(id))
    }

    /// Filter index for one field of a model.
    pub fn filter_index(&self, model: &str, field: &str) -> Option<&BTreeMap<String, Vec<String>>> {
        self.filter.get(model).and_then(|fields| fields.get(field))
    }

    pub fn unique_lookup(&self, model: &str, key: &str, value: &str) -> Option<&str> {
        self.unique
            .get(model)
            .and_then(|keys| keys.get(key))
            .and_then(|values| values.get(value))
            .map(String::as_str)
    }

    fn insert_entry(&mut self, entry: &IndexEntry) {
        match entry {
            IndexEntry::Unique {
                model,
                key,
                value,
                id,
            } => {
                self.unique
                    .entry(model.clone())
                    .or_default()
                    .entry(key.clone())
                    .or_default()
                    .insert(value.clone(), id.clone());
            }
            IndexEntry::Foreign {
                referenced,
                referenced_id,
                dependent,
                id,
            } => {
                let ids = self
                    .foreign
                    .entry(referenced.clone())
                    .or_default()
                    .entry(referenced_id.clone())
                    .or_default()
                    .entry(dependent.clone())
                    .or_default();
                push_unique(ids, id);
            }
            IndexEntry::Filter {
                model,
                field,
                value,
                id,
            } => {
                let ids = self
                    .filter
                    .entry(model.clone())
                    .or_default()
                    .entry(field.clone())
                    .or_default()
                    .entry(value.clone())
                    .or_default();
                push_unique(ids, id);
            }
        }
    }

    fn remove_entry(&mut self, entry: &IndexEntry) {
        match entry {
            IndexEntry::Unique {
                model,
                key,
                value,
                id,
            } => {
                let Some(keys) = self.unique.get_mut(model) else {
                    return;
                };
                if let Some(values) = keys.get_mut(key) {
                    // Another record may own the value by now
                    if values.get(value) == Some(id) {
                        values.remove(value);
                    }
                    if values.is_empty() {
                        keys.remove(key);
                    }
                }
                if keys.is_empty() {
                    self.unique.remove(model);
                }
            }
            IndexEntry::Foreign {
                referenced,
                referenced_id,
                dependent,
                id,
            } => {
                remove_id(&mut self.foreign, referenced, referenced_id, dependent, id);
            }
            IndexEntry::Filter {
                model,
                field,
                value,
                id,
            } => {
                remove_id(&mut self.filter, model, field, value, id);
            }
        }
    }

    fn purge(&mut self, purge: &Purge) {
        match purge {
            Purge::ForeignFanOut { model, id } => {
                if let Some(by_id) = self.foreign.get_mut(model) {
                    by_id.remove(id);
                    if by_id.is_empty() {
                        self.foreign.remove(model);
                    }
                }
            }
            Purge::FilterValue {
                model,
                field,
                value,
            } => {
                if let Some(fields) = self.filter.get_mut(model) {
                    if let Some(values) = fields.get_mut(field) {
                        values.remove(value);
                        if values.is_empty() {
                            fields.remove(field);
                        }
                    }
                    if fields.is_empty() {
                        self.filter.remove(model);
                    }
                }
            }
        }
    }
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

/// Remove `id` from `index[a][b][c]`, pruning containers left empty.
fn remove_id(
    index: &mut BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<String>>>>,
    a: &str,
    b: &str,
    c: &str,
    id: &str,
) {
    let Some(level_b) = index.get_mut(a) else {
        return;
    };
    if let Some(level_c) = level_b.get_mut(b) {
        if let Some(ids) = level_c.get_mut(c) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                level_c.remove(c);
            }
        }
        if level_c.is_empty() {
            level_b.remove(b);
        }
    }
    if level_b.is_empty() {
        index.remove(a);
    }
}
