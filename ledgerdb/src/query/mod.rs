//! `list` / `view`: filtering, sorting, pagination and foreign-key hydration.
//!
//! Each filter field is resolved by [`IndexedLookup`] first; when the index has
//! nothing for that field the query falls back to [`FullScan`]. Both strategies
//! test the same rendered value keys with the same [`Matcher`], so the fallback
//! returns exactly what a fully populated index would.

use crate::error::Result;
use crate::index::IndexCache;
use crate::record::{self, DataCache, ModelData, Record};
use crate::schema::{ModelSchema, SchemaRegistry};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Parameters for `list`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
    #[serde(default)]
    pub sort: Option<Sort>,
    /// Integer or integer string; pagination needs both offset and limit.
    #[serde(default)]
    pub offset: Option<Value>,
    #[serde(default)]
    pub limit: Option<Value>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub match_mode: MatchMode,
}

impl ListParams {
    pub fn filter(mut self, field: &str, value: Value) -> Self {
        self.filters.insert(field.to_string(), value);
        self
    }

    pub fn sort_by(mut self, field: &str, order: SortOrder) -> Self {
        self.sort = Some(Sort {
            field: field.to_string(),
            order,
        });
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(Value::from(offset));
        self.limit = Some(Value::from(limit));
        self
    }

    pub fn include(mut self, field: &str) -> Self {
        self.include.push(field.to_string());
        self
    }

    pub fn match_all(mut self) -> Self {
        self.match_mode = MatchMode::All;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    #[serde(alias = "ASC")]
    Asc,
    #[serde(alias = "DESC")]
    Desc,
}

/// How per-field filter results combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Union of the ids matched by each field.
    #[default]
    Any,
    /// Intersection of the ids matched by each field.
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListResult {
    pub total: usize,
    pub data: Vec<Record>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewParams {
    #[serde(default)]
    pub include: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewResult {
    /// Empty when the id does not exist.
    pub record: Record,
}

/// A requested filter value, parsed from its JSON form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Exact(String),
    OneOf(Vec<String>),
    /// Inclusive bounds; `None` is unbounded.
    Range {
        start: Option<String>,
        end: Option<String>,
    },
}

impl FilterValue {
    /// `None` for empty values, which select nothing and are skipped.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(_) => {
                let keys = record::flatten_keys(Some(value));
                if keys.is_empty() {
                    None
                } else {
                    Some(FilterValue::OneOf(keys))
                }
            }
            Value::Object(map) if map.contains_key("startDate") || map.contains_key("endDate") => {
                let bound = |key: &str| {
                    let value = map.get(key);
                    (!record::is_empty_value(value)).then(|| record::value_key(value))
                };
                Some(FilterValue::Range {
                    start: bound("startDate"),
                    end: bound("endDate"),
                })
            }
            other if record::is_empty_value(Some(other)) => None,
            other => Some(FilterValue::Exact(record::value_key(Some(other)))),
        }
    }
}

/// A filter value compiled for one field.
#[derive(Debug, Clone)]
pub struct Matcher {
    value: FilterValue,
    pattern: Option<Regex>,
}

impl Matcher {
    pub fn new(value: FilterValue, partial: bool) -> Self {
        let pattern = match (&value, partial) {
            (FilterValue::Exact(raw), true) => compile_partial(raw),
            _ => None,
        };
        Matcher { value, pattern }
    }

    /// Test one rendered value key.
    pub fn matches(&self, key: &str) -> bool {
        match &self.value {
            FilterValue::Range { start, end } => {
                start.as_deref().map_or(true, |s| key >= s) && end.as_deref().map_or(true, |e| key <= e)
            }
            FilterValue::OneOf(options) => options.iter().any(|option| option == key),
            FilterValue::Exact(expected) => match &self.pattern {
                Some(pattern) => pattern.is_match(key),
                None => key == expected,
            },
        }
    }
}

fn compile_partial(raw: &str) -> Option<Regex> {
    RegexBuilder::new(raw)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(raw))
                .case_insensitive(true)
                .build()
        })
        .ok()
}

/// One way of resolving the ids that match a filter on a field.
pub trait FilterStrategy {
    fn select(&self, field: &str, matcher: &Matcher) -> BTreeSet<String>;
}

/// Walk the filter index for the field and union the ids of matching values.
pub struct IndexedLookup<'a> {
    index: Option<&'a BTreeMap<String, Vec<String>>>,
}

impl<'a> IndexedLookup<'a> {
    pub fn new(indexes: &'a IndexCache, model: &str, field: &str) -> Self {
        IndexedLookup {
            index: indexes.filter_index(model, field),
        }
    }
}

impl FilterStrategy for IndexedLookup<'_> {
    fn select(&self, _field: &str, matcher: &Matcher) -> BTreeSet<String> {
        let Some(index) = self.index else {
            return BTreeSet::new();
        };
        index
            .iter()
            .filter(|(value, _)| matcher.matches(value))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }
}

/// Compare every record's value for the field.
pub struct FullScan<'a> {
    records: Option<&'a ModelData>,
}

impl<'a> FullScan<'a> {
    pub fn new(records: Option<&'a ModelData>) -> Self {
        FullScan { records }
    }
}

impl FilterStrategy for FullScan<'_> {
    fn select(&self, field: &str, matcher: &Matcher) -> BTreeSet<String> {
        let Some(records) = self.records else {
            return BTreeSet::new();
        };
        records
            .iter()
            .filter(|(_, record)| {
                record::flatten_keys(record.get(field))
                    .iter()
                    .any(|key| matcher.matches(key))
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Ids matching one field filter: index first, full scan on a miss.
fn select_ids(
    indexes: &IndexCache,
    records: Option<&ModelData>,
    model: &str,
    field: &str,
    matcher: &Matcher,
) -> BTreeSet<String> {
    let hits = IndexedLookup::new(indexes, model, field).select(field, matcher);
    if !hits.is_empty() {
        return hits;
    }
    log::debug!("Filter index miss on {model}.{field}, scanning");
    FullScan::new(records).select(field, matcher)
}

pub fn list(
    schemas: &SchemaRegistry,
    indexes: &IndexCache,
    data: &DataCache,
    model: &str,
    params: &ListParams,
) -> Result<ListResult> {
    let schema = schemas.schema_for(model)?;
    let records = data.get(model);

    let matchers: Vec<(&str, Matcher)> = params
        .filters
        .iter()
        .filter_map(|(field, raw)| {
            FilterValue::from_value(raw)
                .map(|value| (field.as_str(), Matcher::new(value, schema.is_partial_match(field))))
        })
        .collect();

    let mut working: Vec<&Record> = if matchers.is_empty() {
        records.map(|r| r.values().collect()).unwrap_or_default()
    } else {
        let mut selected: Option<BTreeSet<String>> = None;
        for (field, matcher) in &matchers {
            let ids = select_ids(indexes, records, model, field, matcher);
            selected = Some(match (selected, params.match_mode) {
                (None, _) => ids,
                (Some(acc), MatchMode::Any) => acc.union(&ids).cloned().collect(),
                (Some(acc), MatchMode::All) => acc.intersection(&ids).cloned().collect(),
            });
        }
        let ids = selected.unwrap_or_default();
        ids.iter()
            .filter_map(|id| records.and_then(|r| r.get(id)))
            .collect()
    };
    working.sort_by(|a, b| {
        record::compare_ids(
            record::record_id(a).unwrap_or_default(),
            record::record_id(b).unwrap_or_default(),
        )
    });

    if let Some(sort) = &params.sort {
        working.sort_by(|a, b| {
            let ordering = compare_values(a.get(&sort.field), b.get(&sort.field));
            match sort.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
    }

    let total = working.len();
    if let (Some(offset), Some(limit)) = (as_index(&params.offset), as_index(&params.limit)) {
        working = working.into_iter().skip(offset).take(limit).collect();
    }

    let page = working
        .into_iter()
        .map(|r| hydrate(schema, data, r, &params.include))
        .collect();
    Ok(ListResult { total, data: page })
}

pub fn view(
    schemas: &SchemaRegistry,
    data: &DataCache,
    model: &str,
    id: &str,
    params: &ViewParams,
) -> Result<ViewResult> {
    let schema = schemas.schema_for(model)?;
    let record = data
        .get(model)
        .and_then(|records| records.get(id))
        .map(|r| hydrate(schema, data, r, &params.include))
        .unwrap_or_default();
    Ok(ViewResult { record })
}

/// Clone a record, adding `includes[field] = {foreignId: record | null}`.
fn hydrate(schema: &ModelSchema, data: &DataCache, record: &Record, include: &[String]) -> Record {
    let mut hydrated = record.clone();
    if include.is_empty() {
        return hydrated;
    }

    let mut includes = serde_json::Map::new();
    for field in include {
        let Some(reference) = schema.foreign_reference(field) else {
            continue;
        };
        let referenced = data.get(reference);
        let resolved: serde_json::Map<String, Value> = record::flatten_keys(record.get(field))
            .into_iter()
            .map(|id| {
                let found = referenced
                    .and_then(|records| records.get(&id))
                    .map(|r| Value::Object(r.clone()))
                    .unwrap_or(Value::Null);
                (id, found)
            })
            .collect();
        includes.insert(field.clone(), Value::Object(resolved));
    }
    hydrated.insert(record::INCLUDES.to_string(), Value::Object(includes));
    hydrated
}

/// Null/missing < booleans < numbers < strings < everything else.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => match rank(a).cmp(&rank(b)) {
            Ordering::Equal if rank(a) == 4 => record::value_key(a).cmp(&record::value_key(b)),
            ordering => ordering,
        },
    }
}

fn as_index(value: &Option<Value>) -> Option<usize> {
    match value {
        Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexManager;
    use crate::fixtures;
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

        fn insert(&mut self, model: &str, value: Value) {
            let record = fixtures::record(value);
            let id = record::record_id(&record).unwrap().to_string();
            let delta = IndexManager::new(&self.schemas).apply(model, &record).unwrap();
            self.indexes.merge(&delta);
            self.data
                .entry(model.to_string())
                .or_default()
                .insert(id, record);
        }

        fn list(&self, model: &str, params: &ListParams) -> ListResult {
            list(&self.schemas, &self.indexes, &self.data, model, params).unwrap()
        }

        fn ids(&self, model: &str, params: &ListParams) -> Vec<String> {
            self.list(model, params)
                .data
                .iter()
                .map(|r| record::record_id(r).unwrap().to_string())
                .collect()
        }
    }

    fn bookkeeping() -> Snapshot {
        let mut snap = Snapshot::new();
        snap.insert("contacts", json!({ "id": "1", "name": "Acme Corp", "kind": "vendor" }));
        snap.insert("contacts", json!({ "id": "2", "name": "Bolt Ltd", "kind": "customer" }));
        snap.insert("contacts", json!({ "id": "10", "name": "acme labs", "kind": "customer" }));
        snap.insert("tags", json!({ "id": "1", "name": "billable" }));
        snap.insert("tags", json!({ "id": "2", "name": "internal" }));
        snap.insert("work_logs", json!({ "id": "1", "contact": "1", "tags": ["1"], "date": "2024-01-05", "hours": 2 }));
        snap.insert("work_logs", json!({ "id": "2", "contact": "2", "tags": ["1", "2"], "date": "2024-02-10", "hours": 5 }));
        snap.insert("work_logs", json!({ "id": "3", "contact": "10", "tags": [], "date": "2024-03-15", "hours": 1 }));
        snap
    }

    #[test]
    fn test_list_all_in_id_order() {
        let snap = bookkeeping();
        let result = snap.list("contacts", &ListParams::default());
        assert_eq!(result.total, 3);
        assert_eq!(snap.ids("contacts", &ListParams::default()), vec!["1", "2", "10"]);
    }

    #[test]
    fn test_exact_filter_uses_index() {
        let snap = bookkeeping();
        let params = ListParams::default().filter("kind", json!("customer"));
        assert_eq!(snap.ids("contacts", &params), vec!["2", "10"]);
    }

    #[test]
    fn test_partial_match_is_case_insensitive() {
        let snap = bookkeeping();
        let params = ListParams::default().filter("name", json!("acme"));
        assert_eq!(snap.ids("contacts", &params), vec!["1", "10"]);

        // Invalid regex degrades to a literal substring match
        let params = ListParams::default().filter("name", json!("acme ("));
        assert!(snap.ids("contacts", &params).is_empty());
    }

    #[test]
    fn test_array_field_and_membership() {
        let snap = bookkeeping();
        let single = ListParams::default().filter("tags", json!("2"));
        assert_eq!(snap.ids("work_logs", &single), vec!["2"]);

        let any_of = ListParams::default().filter("contact", json!(["1", "10"]));
        assert_eq!(snap.ids("work_logs", &any_of), vec!["1", "3"]);
    }

    #[test]
    fn test_date_range() {
        let snap = bookkeeping();
        let both = ListParams::default()
            .filter("date", json!({ "startDate": "2024-02-01", "endDate": "2024-03-15" }));
        assert_eq!(snap.ids("work_logs", &both), vec!["2", "3"]);

        let open_end = ListParams::default().filter("date", json!({ "startDate": "2024-02-10" }));
        assert_eq!(snap.ids("work_logs", &open_end), vec!["2", "3"]);

        let open_start = ListParams::default().filter("date", json!({ "endDate": "2024-01-31", "startDate": null }));
        assert_eq!(snap.ids("work_logs", &open_start), vec!["1"]);
    }

    #[test]
    fn test_full_scan_fallback_matches_indexed() {
        let mut snap = bookkeeping();
        let params = ListParams::default().filter("kind", json!("customer"));
        let indexed = snap.list("contacts", &params);

        snap.indexes = IndexCache::default();
        let scanned = snap.list("contacts", &params);
        assert_eq!(scanned, indexed);
    }

    #[test]
    fn test_undeclared_field_scans() {
        let snap = bookkeeping();
        let params = ListParams::default().filter("hours", json!(5));
        assert_eq!(snap.ids("work_logs", &params), vec!["2"]);
    }

    #[test]
    fn test_strategies_agree_field_by_field() {
        let snap = bookkeeping();
        let records = snap.data.get("work_logs");
        for (field, raw) in [
            ("tags", json!("1")),
            ("contact", json!(["2", "10"])),
            ("date", json!({ "startDate": "2024-01-01", "endDate": "2024-02-28" })),
        ] {
            let matcher = Matcher::new(FilterValue::from_value(&raw).unwrap(), false);
            let indexed = IndexedLookup::new(&snap.indexes, "work_logs", field).select(field, &matcher);
            let scanned = FullScan::new(records).select(field, &matcher);
            assert_eq!(indexed, scanned, "field {field}");
        }
    }

    #[test]
    fn test_multiple_filters_union_by_default() {
        let snap = bookkeeping();
        let params = ListParams::default()
            .filter("contact", json!("1"))
            .filter("tags", json!("2"));
        assert_eq!(snap.ids("work_logs", &params), vec!["1", "2"]);

        let params = params.match_all();
        assert!(snap.ids("work_logs", &params).is_empty());

        let params = ListParams::default()
            .filter("contact", json!("2"))
            .filter("tags", json!("2"))
            .match_all();
        assert_eq!(snap.ids("work_logs", &params), vec!["2"]);
    }

    #[test]
    fn test_empty_filter_values_are_skipped() {
        let snap = bookkeeping();
        let params = ListParams::default()
            .filter("kind", json!(""))
            .filter("name", Value::Null);
        assert_eq!(snap.list("contacts", &params).total, 3);
    }

    #[test]
    fn test_sort_is_stable_both_ways() {
        let snap = bookkeeping();
        let asc = ListParams::default().sort_by("kind", SortOrder::Asc);
        assert_eq!(snap.ids("contacts", &asc), vec!["2", "10", "1"]);

        let desc = ListParams::default().sort_by("kind", SortOrder::Desc);
        assert_eq!(snap.ids("contacts", &desc), vec!["1", "2", "10"]);

        let numeric = ListParams::default().sort_by("hours", SortOrder::Desc);
        assert_eq!(snap.ids("work_logs", &numeric), vec!["2", "1", "3"]);
    }

    #[test]
    fn test_pagination() {
        let snap = bookkeeping();
        let page = snap.list("contacts", &ListParams::default().page(1, 1));
        assert_eq!(page.total, 3);
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0]["id"], json!("2"));

        let params: ListParams =
            serde_json::from_value(json!({ "offset": "2", "limit": "5" })).unwrap();
        assert_eq!(snap.ids("contacts", &params), vec!["10"]);

        let params: ListParams =
            serde_json::from_value(json!({ "offset": "two", "limit": 1 })).unwrap();
        assert_eq!(snap.list("contacts", &params).data.len(), 3);

        let params: ListParams = serde_json::from_value(json!({ "limit": 1 })).unwrap();
        assert_eq!(snap.list("contacts", &params).data.len(), 3);
    }

    #[test]
    fn test_include_hydrates_foreign_records() {
        let mut snap = bookkeeping();
        // Dangling reference loaded without validation
        snap.insert("work_logs", json!({ "id": "4", "contact": "1", "tags": ["2", "9"] }));

        let params = ListParams::default()
            .filter("contact", json!("1"))
            .include("tags")
            .include("contact")
            .include("hours");
        let result = snap.list("work_logs", &params);
        let last = &result.data[1];
        assert_eq!(last["includes"]["tags"]["2"]["name"], json!("internal"));
        assert_eq!(last["includes"]["tags"]["9"], Value::Null);
        assert_eq!(last["includes"]["contact"]["1"]["name"], json!("Acme Corp"));
        assert!(last["includes"].get("hours").is_none());
    }

    #[test]
    fn test_view() {
        let snap = bookkeeping();
        let found = view(&snap.schemas, &snap.data, "work_logs", "2", &ViewParams::default()).unwrap();
        assert_eq!(found.record["hours"], json!(5));
        assert!(found.record.get("includes").is_none());

        let missing = view(&snap.schemas, &snap.data, "work_logs", "99", &ViewParams::default()).unwrap();
        assert!(missing.record.is_empty());

        let hydrated = view(
            &snap.schemas,
            &snap.data,
            "work_logs",
            "2",
            &ViewParams { include: vec!["contact".into()] },
        )
        .unwrap();
        assert_eq!(hydrated.record["includes"]["contact"]["2"]["name"], json!("Bolt Ltd"));
    }

    #[test]
    fn test_params_deserialize_from_json() {
        let params: ListParams = serde_json::from_value(json!({
            "filters": { "kind": "customer" },
            "sort": { "field": "name", "order": "DESC" },
            "include": ["contact"],
            "matchMode": "all"
        }))
        .unwrap();
        assert_eq!(params.sort.unwrap().order, SortOrder::Desc);
        assert_eq!(params.match_mode, MatchMode::All);
        assert_eq!(params.include, vec!["contact"]);
    }
}
