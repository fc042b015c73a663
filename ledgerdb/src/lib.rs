pub mod atomic;
pub mod config;
pub mod error;
pub mod index;
pub mod outcome;
pub mod persist;
pub mod query;
pub mod record;
pub mod schema;
pub mod store;
pub mod validation;

#[cfg(test)]
mod fixtures;

pub use atomic::{Step, StepResult};
pub use config::StoreConfig;
pub use error::{LedgerDbError, Result};
pub use index::IndexCache;
pub use outcome::Outcome;
pub use query::{ListParams, ListResult, MatchMode, SortOrder, ViewParams, ViewResult};
pub use record::{ModelData, Record};
pub use schema::{SchemaDefinition, SchemaRegistry};
pub use store::Store;
pub use validation::{ErrorKind, FieldErrors};
