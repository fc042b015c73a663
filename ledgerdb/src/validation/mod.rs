use crate::error::{LedgerDbError, Result};
use crate::index::IndexCache;
use crate::record::{self, DataCache, Record};
use crate::schema::SchemaRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of constraint a field violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Required,
    Unique,
    Foreign,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Required => "required",
            ErrorKind::Unique => "unique",
            ErrorKind::Foreign => "foreign",
        })
    }
}

/// Field name -> constraint kinds it violated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<ErrorKind>>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, kind: ErrorKind) {
        let kinds = self.0.entry(field.to_string()).or_default();
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }

    pub fn get(&self, field: &str) -> &[ErrorKind] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ErrorKind])> {
        self.0.iter().map(|(field, kinds)| (field.as_str(), kinds.as_slice()))
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(field, kinds)| {
                let kinds: Vec<String> = kinds.iter().map(ToString::to_string).collect();
                format!("{field}: {}", kinds.join(", "))
            })
            .collect();
        f.write_str(&parts.join("; "))
    }
}

/// Which constraint families to check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checks {
    pub unique: bool,
    pub required: bool,
    pub foreign: bool,
}

impl Default for Checks {
    fn default() -> Self {
        Checks {
            unique: true,
            required: true,
            foreign: true,
        }
    }
}

/// Result of validating a candidate record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub errors: FieldErrors,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Err(Validation)` when any field failed.
    pub fn into_result(self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(LedgerDbError::Validation(self.errors))
        }
    }
}

/// Validate a candidate record against its model's constraints, using the
/// current index and data snapshot. Nothing is mutated.
pub fn validate(
    schemas: &SchemaRegistry,
    indexes: &IndexCache,
    data: &DataCache,
    model: &str,
    candidate: &Record,
    checks: Checks,
) -> Result<Validation> {
    let schema = schemas.schema_for(model)?;
    let own_id = record::record_id(candidate);
    let mut errors = FieldErrors::default();

    if checks.unique {
        for key in &schema.constraints.unique {
            let joined = key.joined_value(candidate);
            let taken = indexes
                .unique_lookup(model, key.spec(), &joined)
                .map(|found| Some(found) != own_id)
                .unwrap_or(false);
            if taken {
                for field in key.fields() {
                    errors.add(field, ErrorKind::Unique);
                }
            }
        }
    }

    if checks.required {
        for field in &schema.constraints.required {
            if record::is_empty_value(candidate.get(field))
                && record::is_empty_value(schema.default_for(field))
            {
                errors.add(field, ErrorKind::Required);
            }
        }
    }

    if checks.foreign {
        for (field, fk) in &schema.constraints.foreign {
            let values = record::flatten_keys(candidate.get(field));
            if values.is_empty() {
                continue;
            }
            let referenced = data.get(&fk.reference);
            let missing = values
                .iter()
                .any(|value| !referenced.map(|records| records.contains_key(value)).unwrap_or(false));
            if missing {
                errors.add(field, ErrorKind::Foreign);
            }
        }
    }

    Ok(Validation { errors })
}

/// Whether any other record still references this one.
pub fn is_used(indexes: &IndexCache, model: &str, record: &Record) -> bool {
    let Some(id) = record::record_id(record) else {
        return false;
    };
    indexes
        .dependents(model, id)
        .map(|by_model| by_model.values().any(|ids| !ids.is_empty()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::index::IndexManager;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Snapshot {
        schemas: SchemaRegistry,
        indexes: IndexCache,
        data: DataCache,
    }

    impl Snapshot {
        fn new() -> Self {
            Snapshot {
                schemas: fixtures::registry(),
                indexes: IndexCache::default(),
                data: DataCache::new(),
            }
        }

        fn insert(&mut self, model: &str, value: serde_json::Value) {
            let record = fixtures::record(value);
            let id = record::record_id(&record).unwrap().to_string();
            let delta = IndexManager::new(&self.schemas).apply(model, &record).unwrap();
            self.indexes.merge(&delta);
            self.data
                .entry(model.to_string())
                .or_default()
                .insert(id, record);
        }

        fn validate(&self, model: &str, value: serde_json::Value) -> Validation {
            validate(
                &self.schemas,
                &self.indexes,
                &self.data,
                model,
                &fixtures::record(value),
                Checks::default(),
            )
            .unwrap()
        }
    }

    fn usd() -> serde_json::Value {
        json!({ "code": "USD", "symbol": "$", "effectiveStart": "2023-01-01T00:00:00.000Z" })
    }

    #[test]
    fn test_unique_collision_marks_every_field() {
        let mut snap = Snapshot::new();
        let mut existing = usd();
        existing["id"] = json!("1");
        snap.insert("currencies", existing);

        let result = snap.validate("currencies", usd());
        assert!(!result.is_valid());
        assert_eq!(result.errors.len(), 3);
        for field in ["code", "symbol", "effectiveStart"] {
            assert_eq!(result.errors.get(field), &[ErrorKind::Unique]);
        }
    }

    #[test]
    fn test_unique_allows_own_record() {
        let mut snap = Snapshot::new();
        let mut existing = usd();
        existing["id"] = json!("1");
        snap.insert("currencies", existing.clone());

        assert!(snap.validate("currencies", existing).is_valid());
    }

    #[test]
    fn test_required_uses_default() {
        let snap = Snapshot::new();

        let missing = snap.validate("sequences", json!({ "next": 4 }));
        assert_eq!(missing.errors.get("name"), &[ErrorKind::Required]);

        let empty = snap.validate("sequences", json!({ "name": "" }));
        assert_eq!(empty.errors.get("name"), &[ErrorKind::Required]);

        // tags.color is required but declares a non-empty default
        let defaulted = snap.validate("tags", json!({ "name": "billable" }));
        assert!(defaulted.is_valid(), "{}", defaulted.errors);
    }

    #[test]
    fn test_foreign_reference_must_exist() {
        let mut snap = Snapshot::new();

        let result = snap.validate("work_logs", json!({ "tags": ["1"] }));
        assert_eq!(result.errors.get("tags"), &[ErrorKind::Foreign]);

        snap.insert("tags", json!({ "id": "1", "name": "billable" }));
        assert!(snap.validate("work_logs", json!({ "tags": ["1"] })).is_valid());

        let partial = snap.validate("work_logs", json!({ "tags": ["1", "2"] }));
        assert_eq!(partial.errors.get("tags"), &[ErrorKind::Foreign]);
    }

    #[test]
    fn test_empty_foreign_is_not_an_error() {
        let snap = Snapshot::new();
        for value in [json!({}), json!({ "tags": [] }), json!({ "tags": ["", null], "contact": "" })] {
            let result = snap.validate("work_logs", value);
            assert!(result.is_valid(), "{}", result.errors);
        }
    }

    #[test]
    fn test_checks_can_be_disabled() {
        let snap = Snapshot::new();
        let result = validate(
            &snap.schemas,
            &snap.indexes,
            &snap.data,
            "receipts",
            &fixtures::record(json!({ "transaction": "9" })),
            Checks {
                required: false,
                ..Checks::default()
            },
        )
        .unwrap();
        assert_eq!(result.errors.get("number"), &[] as &[ErrorKind]);
        assert_eq!(result.errors.get("transaction"), &[ErrorKind::Foreign]);
    }

    #[test]
    fn test_is_used() {
        let mut snap = Snapshot::new();
        snap.insert("tags", json!({ "id": "1", "name": "billable" }));
        snap.insert("tags", json!({ "id": "2", "name": "internal" }));
        snap.insert("work_logs", json!({ "id": "1", "tags": ["1"] }));

        let tag = |id: &str| snap.data["tags"][id].clone();
        assert!(is_used(&snap.indexes, "tags", &tag("1")));
        assert!(!is_used(&snap.indexes, "tags", &tag("2")));
    }

    #[test]
    fn test_field_errors_serialize_as_map() {
        let mut errors = FieldErrors::default();
        errors.add("tags", ErrorKind::Foreign);
        errors.add("tags", ErrorKind::Foreign);
        errors.add("name", ErrorKind::Required);
        assert_eq!(
            serde_json::to_value(&errors).unwrap(),
            json!({ "name": ["required"], "tags": ["foreign"] })
        );
        assert_eq!(errors.to_string(), "name: required; tags: foreign");
    }
}
