//! In-process `Store` used by the tests and by offline runs of the binary.
//!
//! It mimics the backend closely enough for the client logic: generated `id`
//! and `created_at` defaults, upsert-by-key merging, and refusal of
//! unfiltered updates and deletes.

use chrono::{SecondsFormat, Utc};
use futures::future;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, ErrorBody};
use crate::query::{loosely_equal, Query};
use crate::store::{BoxFuture, Store};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Select(Query),
    Insert(String),
    Update(Query),
    Upsert(String),
    Delete(Query),
}

impl Operation {
    pub fn is_mutation(&self) -> bool {
        match self {
            Operation::Select(_) => false,
            _ => true,
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Vec<Map<String, Value>>>,
    log: Vec<Operation>,
    fail_next: Option<ErrorBody>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Loads rows as-is, without logging an operation.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.lock(|inner| {
            let entries = inner.tables.entry(table.to_string()).or_insert_with(Vec::new);
            entries.extend(rows.into_iter().filter_map(|row| match row {
                Value::Object(map) => Some(with_defaults(map)),
                _ => None,
            }));
        })
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock(|inner| {
            inner
                .tables
                .get(table)
                .map(|rows| rows.iter().cloned().map(Value::Object).collect())
                .unwrap_or_default()
        })
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.lock(|inner| inner.log.clone())
    }

    /// Number of successfully applied inserts, updates, upserts and deletes.
    pub fn mutation_count(&self) -> usize {
        self.lock(|inner| inner.log.iter().filter(|op| op.is_mutation()).count())
    }

    /// Makes the next operation fail with `error` without touching any rows.
    pub fn fail_next(&self, error: ErrorBody) {
        self.lock(|inner| inner.fail_next = Some(error))
    }

    fn lock<T, F: FnOnce(&mut Inner) -> T>(&self, f: F) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }

    fn run<T, F>(&self, op: Operation, f: F) -> BoxFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Inner) -> Result<T, Error>,
    {
        let result = self.lock(|inner| {
            if let Some(error) = inner.fail_next.take() {
                return Err(Error::Response(error));
            }
            let result = f(inner);
            if result.is_ok() {
                inner.log.push(op);
            }
            result
        });
        Box::new(future::result(result))
    }
}

impl Store for MemoryStore {
    fn select(&self, query: &Query) -> BoxFuture<Vec<Value>> {
        let query = query.clone();
        self.run(Operation::Select(query.clone()), move |inner| {
            let rows = inner
                .tables
                .get(query.table_name())
                .map(|rows| {
                    rows.iter()
                        .cloned()
                        .map(Value::Object)
                        .filter(|row| query.matches(row))
                        .collect()
                })
                .unwrap_or_default();
            Ok(query.arrange(rows))
        })
    }

    fn insert(&self, table: &str, row: Value) -> BoxFuture<Value> {
        let table = table.to_string();
        self.run(Operation::Insert(table.clone()), move |inner| {
            let row = with_defaults(into_object(row)?);
            inner.tables.entry(table).or_insert_with(Vec::new).push(row.clone());
            Ok(Value::Object(row))
        })
    }

    fn update(&self, query: &Query, patch: Value) -> BoxFuture<Vec<Value>> {
        let query = query.clone();
        self.run(Operation::Update(query.clone()), move |inner| {
            if !query.is_filtered() {
                return Err(Error::UnfilteredMutation("update", query.table_name().to_string()));
            }
            let patch = into_object(patch)?;
            let mut updated = Vec::new();
            if let Some(rows) = inner.tables.get_mut(query.table_name()) {
                for row in rows.iter_mut() {
                    if query.matches(&Value::Object(row.clone())) {
                        merge(row, &patch);
                        updated.push(Value::Object(row.clone()));
                    }
                }
            }
            Ok(updated)
        })
    }

    fn upsert(&self, table: &str, row: Value, on_conflict: &[&str]) -> BoxFuture<Value> {
        let table = table.to_string();
        let keys: Vec<String> = on_conflict.iter().map(|key| key.to_string()).collect();
        self.run(Operation::Upsert(table.clone()), move |inner| {
            let row = into_object(row)?;
            let rows = inner.tables.entry(table).or_insert_with(Vec::new);

            let conflict = rows.iter().position(|existing| {
                keys.iter().all(|key| match (existing.get(key), row.get(key)) {
                    (Some(a), Some(b)) => !b.is_null() && loosely_equal(a, b),
                    _ => false,
                })
            });

            match conflict {
                Some(index) => {
                    let existing = &mut rows[index];
                    merge(existing, &row);
                    Ok(Value::Object(existing.clone()))
                }
                None => {
                    let row = with_defaults(row);
                    rows.push(row.clone());
                    Ok(Value::Object(row))
                }
            }
        })
    }

    fn delete(&self, query: &Query) -> BoxFuture<()> {
        let query = query.clone();
        self.run(Operation::Delete(query.clone()), move |inner| {
            if !query.is_filtered() {
                return Err(Error::UnfilteredMutation("delete", query.table_name().to_string()));
            }
            if let Some(rows) = inner.tables.get_mut(query.table_name()) {
                rows.retain(|row| !query.matches(&Value::Object(row.clone())));
            }
            Ok(())
        })
    }
}

fn into_object(row: Value) -> Result<Map<String, Value>, Error> {
    match row {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Response(ErrorBody::new(400, "row must be a JSON object"))),
    }
}

fn with_defaults(mut row: Map<String, Value>) -> Map<String, Value> {
    if row.get("id").map_or(true, Value::is_null) {
        row.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
    }
    if row.get("created_at").map_or(true, Value::is_null) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        row.insert("created_at".to_string(), Value::String(now));
    }
    row
}

fn merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::Future;
    use serde_json::json;

    #[test]
    fn insert_fills_defaults() {
        let store = MemoryStore::new();
        let row = store.insert("posts", json!({"title": "hello"})).wait().unwrap();
        assert!(row["id"].is_string());
        assert!(row["created_at"].is_string());
        assert_eq!(store.rows("posts").len(), 1);
    }

    #[test]
    fn upsert_merges_on_key() {
        let store = MemoryStore::new();
        let keys = ["post_id", "user_id"];
        store
            .upsert("votes", json!({"post_id": "p", "user_id": "u", "vote_type": 1}), &keys)
            .wait()
            .unwrap();
        store
            .upsert("votes", json!({"post_id": "p", "user_id": "u", "vote_type": -1}), &keys)
            .wait()
            .unwrap();
        store
            .upsert("votes", json!({"post_id": "p", "user_id": "v", "vote_type": 1}), &keys)
            .wait()
            .unwrap();

        let rows = store.rows("votes");
        assert_eq!(rows.len(), 2);
        let mine = rows.iter().find(|row| row["user_id"] == "u").unwrap();
        assert_eq!(mine["vote_type"], -1);
    }

    #[test]
    fn upsert_key_matches_number_and_text() {
        let store = MemoryStore::new();
        store.seed("votes", vec![json!({"post_id": 7, "user_id": "u", "vote_type": 1})]);
        store
            .upsert(
                "votes",
                json!({"post_id": "7", "user_id": "u", "vote_type": -1}),
                &["post_id", "user_id"],
            )
            .wait()
            .unwrap();

        let rows = store.rows("votes");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["vote_type"], -1);
    }

    #[test]
    fn refuses_unfiltered_delete() {
        let store = MemoryStore::new();
        store.seed("posts", vec![json!({"title": "keep me"})]);
        let err = store.delete(&Query::table("posts")).wait().unwrap_err();
        match err {
            Error::UnfilteredMutation("delete", table) => assert_eq!(table, "posts"),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(store.rows("posts").len(), 1);
        assert_eq!(store.mutation_count(), 0);
    }

    #[test]
    fn injected_failure_is_returned_once() {
        let store = MemoryStore::new();
        store.fail_next(ErrorBody::new(503, "maintenance"));
        let err = store.select(&Query::table("posts")).wait().unwrap_err();
        match err {
            Error::Response(body) => assert_eq!(body.message, "maintenance"),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(store.select(&Query::table("posts")).wait().unwrap().is_empty());
        assert_eq!(store.operations().len(), 1);
    }

    #[test]
    fn update_patches_matching_rows() {
        let store = MemoryStore::new();
        store.seed(
            "user_profiles",
            vec![
                json!({"user_id": "a", "is_admin": false}),
                json!({"user_id": "b", "is_admin": false}),
            ],
        );
        let updated = store
            .update(&Query::table("user_profiles").eq("user_id", "b"), json!({"is_admin": true}))
            .wait()
            .unwrap();
        assert_eq!(updated.len(), 1);
        let rows = store.rows("user_profiles");
        assert_eq!(rows.iter().filter(|row| row["is_admin"] == true).count(), 1);
    }
}
