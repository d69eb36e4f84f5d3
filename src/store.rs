use futures::Future;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::query::Query;

pub type BoxFuture<T> = Box<dyn Future<Item = T, Error = Error> + Send>;

/// Relational row store. Consistency, indexing and authorization all live on
/// the other side of this trait.
pub trait Store: Clone + Send + 'static {
    fn select(&self, query: &Query) -> BoxFuture<Vec<Value>>;

    fn insert(&self, table: &str, row: Value) -> BoxFuture<Value>;

    /// Patches every row matching the query's filters.
    fn update(&self, query: &Query, patch: Value) -> BoxFuture<Vec<Value>>;

    /// Inserts, or merges into the existing row whose `on_conflict` columns
    /// are equal.
    fn upsert(&self, table: &str, row: Value, on_conflict: &[&str]) -> BoxFuture<Value>;

    fn delete(&self, query: &Query) -> BoxFuture<()>;
}

pub(crate) fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, Error> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(Error::from))
        .collect()
}

pub(crate) fn decode_row<T: DeserializeOwned>(row: Value) -> Result<T, Error> {
    serde_json::from_value(row).map_err(Error::from)
}

pub(crate) fn encode_row<T: Serialize>(record: &T) -> Result<Value, Error> {
    serde_json::to_value(record).map_err(Error::from)
}

/// Typed select.
pub fn fetch<S, T>(store: &S, query: &Query) -> BoxFuture<Vec<T>>
where
    S: Store,
    T: DeserializeOwned + Send + 'static,
{
    Box::new(store.select(query).and_then(decode_rows::<T>))
}

/// Typed single-row lookup; `None` when nothing matches.
pub fn fetch_one<S: Store, T: DeserializeOwned + Send + 'static>(
    store: &S,
    query: Query,
) -> BoxFuture<Option<T>> {
    Box::new(store.select(&query.single()).and_then(|rows| {
        match rows.into_iter().next() {
            Some(row) => decode_row(row).map(Some),
            None => Ok(None),
        }
    }))
}
