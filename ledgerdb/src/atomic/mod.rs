//! Saga-style multi-step execution.
//!
//! Steps run strictly in order against a mutable target. When a step fails,
//! every step that already succeeded is compensated in reverse order and the
//! failing step's error is returned unchanged inside
//! [`LedgerDbError::StepFailed`]. Compensation is best-effort: rollback errors
//! are logged, never retried and never surfaced. This is not an ACID
//! transaction; a crash mid-way leaves whatever was applied.

use crate::error::{LedgerDbError, Result};
use crate::record::{self, Record};
use crate::store::Store;
use serde::Serialize;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

type Invoke<'s, S> = Box<dyn FnOnce(&mut S, &Value, &[StepResult]) -> Result<Record> + 's>;
type Rollback<'s, S> = Box<dyn FnOnce(&mut S, &Record) -> Result<()> + 's>;

/// Output of a step that succeeded, visible to later steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub id: String,
    pub result: Record,
}

impl StepResult {
    /// Id of the record the step produced.
    pub fn record_id(&self) -> Option<&str> {
        record::record_id(&self.result)
    }
}

/// One named step with its forward action and its compensation.
pub struct Step<'s, S> {
    pub id: String,
    pub params: Value,
    invoke: Invoke<'s, S>,
    rollback: Rollback<'s, S>,
}

impl<'s, S> Step<'s, S> {
    pub fn new(
        id: impl Into<String>,
        params: Value,
        invoke: impl FnOnce(&mut S, &Value, &[StepResult]) -> Result<Record> + 's,
        rollback: impl FnOnce(&mut S, &Record) -> Result<()> + 's,
    ) -> Self {
        Step {
            id: id.into(),
            params,
            invoke: Box::new(invoke),
            rollback: Box::new(rollback),
        }
    }
}

impl<'s> Step<'s, Store> {
    /// Create a record; compensated by removing it and releasing its id.
    pub fn create(id: impl Into<String>, model: &str, params: Value) -> Self {
        let forward = model.to_string();
        let backward = model.to_string();
        Step::new(
            id,
            params,
            move |store: &mut Store, params: &Value, _: &[StepResult]| {
                store.create(&forward, record::into_record(params.clone())?)
            },
            move |store: &mut Store, created: &Record| {
                let id = record::record_id(created).unwrap_or_default().to_string();
                store.withdraw(&backward, &id).map(|_| ())
            },
        )
    }

    /// Update a record; compensated by restoring its previous contents.
    pub fn update(id: impl Into<String>, model: &str, record_id: &str, params: Value) -> Self {
        let previous: Rc<RefCell<Option<Record>>> = Rc::default();
        let saved = Rc::clone(&previous);
        let forward = model.to_string();
        let backward = model.to_string();
        let target = record_id.to_string();
        Step::new(
            id,
            params,
            move |store: &mut Store, params: &Value, _: &[StepResult]| {
                let before = store.find(&forward, &target).cloned();
                let updated = store.update(&forward, &target, record::into_record(params.clone())?)?;
                *saved.borrow_mut() = before;
                Ok(updated)
            },
            move |store: &mut Store, _: &Record| {
                let before = previous.borrow_mut().take();
                match before {
                    Some(before) => store.reinstate(&backward, before).map(|_| ()),
                    None => Ok(()),
                }
            },
        )
    }

    /// Remove a record; compensated by reinstating it under its original id.
    pub fn remove(id: impl Into<String>, model: &str, record_id: &str) -> Self {
        let forward = model.to_string();
        let backward = model.to_string();
        let target = record_id.to_string();
        Step::new(
            id,
            Value::Null,
            move |store: &mut Store, _: &Value, _: &[StepResult]| store.remove(&forward, &target),
            move |store: &mut Store, removed: &Record| {
                store.reinstate(&backward, removed.clone()).map(|_| ())
            },
        )
    }
}

/// Run steps in order; on the first failure, roll back what succeeded.
pub fn execute<S>(target: &mut S, steps: Vec<Step<'_, S>>) -> Result<Vec<StepResult>> {
    let mut results: Vec<StepResult> = Vec::with_capacity(steps.len());
    let mut compensations = Vec::with_capacity(steps.len());

    for step in steps {
        let Step {
            id,
            params,
            invoke,
            rollback,
        } = step;

        match invoke(&mut *target, &params, &results) {
            Ok(result) => {
                log::debug!("Atomic step '{id}' applied");
                results.push(StepResult { id, result });
                compensations.push(rollback);
            }
            Err(error) => {
                log::warn!(
                    "Atomic step '{id}' failed ({error}), rolling back {} step(s)",
                    results.len()
                );
                unwind(target, results, compensations);
                return Err(LedgerDbError::StepFailed {
                    step: id,
                    source: Box::new(error),
                });
            }
        }
    }

    Ok(results)
}

fn unwind<S>(target: &mut S, results: Vec<StepResult>, compensations: Vec<Rollback<'_, S>>) {
    for (done, rollback) in results.into_iter().zip(compensations).rev() {
        if let Err(e) = rollback(&mut *target, &done.result) {
            log::warn!("Rollback of step '{}' failed: {e}", done.id);
        }
    }
}
