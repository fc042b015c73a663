//! Response shapes handed back to callers of the store contract.

use crate::atomic::StepResult;
use crate::error::{LedgerDbError, Result};
use crate::record::Record;
use crate::validation::FieldErrors;
use serde::Serialize;
use serde_json::Value;

/// `{success, record}`, `{success:false, errors}`, `{success:false, error}`
/// or, for atomic calls, `{success, results}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Value>>,
}

impl Outcome {
    pub fn from_mutation(result: &Result<Record>) -> Self {
        match result {
            Ok(record) => Outcome {
                success: true,
                record: Some(record.clone()),
                ..Outcome::default()
            },
            Err(e) => Self::failure(e),
        }
    }

    /// Atomic outcome. On failure `results` holds the failing step only.
    pub fn from_atomic(result: &Result<Vec<StepResult>>) -> Self {
        match result {
            Ok(steps) => Outcome {
                success: true,
                results: Some(
                    steps
                        .iter()
                        .map(|step| serde_json::json!({ "id": step.id, "result": step.result }))
                        .collect(),
                ),
                ..Outcome::default()
            },
            Err(e) => {
                let step = match e {
                    LedgerDbError::StepFailed { step, .. } => Value::String(step.clone()),
                    _ => Value::Null,
                };
                let mut failure = serde_json::to_value(Self::failure(e)).unwrap_or(Value::Null);
                if let Value::Object(fields) = &mut failure {
                    fields.insert("id".into(), step);
                }
                Outcome {
                    success: false,
                    results: Some(vec![failure]),
                    ..Outcome::default()
                }
            }
        }
    }

    fn failure(e: &LedgerDbError) -> Self {
        match e.field_errors() {
            Some(errors) => Outcome {
                errors: Some(errors.clone()),
                ..Outcome::default()
            },
            None => {
                let kind = e.kind();
                let message = match kind {
                    "notFound" | "isUsed" => None,
                    _ => Some(e.to_string()),
                };
                Outcome {
                    error: Some(kind.to_string()),
                    message,
                    ..Outcome::default()
                }
            }
        }
    }
}
