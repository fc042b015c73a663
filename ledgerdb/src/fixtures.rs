//! Shared bookkeeping schema for unit tests.

use crate::config::StoreConfig;
use crate::record::{self, Record};
use crate::schema::SchemaRegistry;
use crate::store::Store;
use serde_json::Value;
use tempfile::TempDir;

pub const SCHEMA: &str = r#"
currencies:
  fields:
    code: { default: "" }
    symbol: { default: "" }
    effectiveStart: { default: "" }
    rate: { default: 1 }
  constraints:
    unique: ["code|symbol|effectiveStart"]
    required: [code]
  indexes:
    filter:
      symbol: {}

tags:
  fields:
    name: { default: "" }
    color: { default: gray }
  constraints:
    required: [name, color]
  indexes:
    filter:
      name: { match: true }

contacts:
  fields:
    name: {}
    email: {}
    kind: { default: customer }
  constraints:
    required: [name]
  indexes:
    filter:
      kind: {}
      name: { match: true }

work_logs:
  fields:
    contact: {}
    tags: { default: [] }
    date: {}
    hours: { default: 0 }
  constraints:
    foreign:
      contact: { reference: contacts }
      tags: { reference: tags }
  indexes:
    filter:
      contact: {}
      tags: {}
      date: {}

sequences:
  fields:
    name: {}
    next: { default: 1 }
  constraints:
    unique: [name]
    required: [name]
  bootstrap:
    "1":
      id: "1"
      name: receipts
      next: 1
      createdAt: "2023-01-01T00:00:00.000Z"
      updatedAt: "2023-01-01T00:00:00.000Z"

transactions:
  fields:
    amount: { default: 0 }
    contact: {}
    reversalOf: {}
  constraints:
    foreign:
      contact: { reference: contacts }
      reversalOf: { reference: transactions }
  indexes:
    filter:
      contact: {}

receipts:
  fields:
    number: {}
    transaction: {}
  constraints:
    unique: [number]
    required: [number, transaction]
    foreign:
      transaction: { reference: transactions }
"#;

pub fn registry() -> SchemaRegistry {
    SchemaRegistry::from_yaml(SCHEMA).unwrap()
}

pub fn record(value: Value) -> Record {
    record::into_record(value).unwrap()
}

pub fn open_store() -> (TempDir, Store) {
    let tmp = TempDir::new().unwrap();
    let store = Store::init(StoreConfig::new(tmp.path()), registry()).unwrap();
    (tmp, store)
}

/// Reopen a store over an existing data directory, flushing the previous one first.
pub fn reopen(tmp: &TempDir, store: Store) -> Store {
    drop(store);
    Store::init(StoreConfig::new(tmp.path()), registry()).unwrap()
}
