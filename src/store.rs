//! Backend boundary: documents, queries, live subscriptions and blob uploads.
//!
//! [`DocumentStore`] is implemented by [`crate::storage::SqliteStore`] (the
//! backend service's own storage) and by [`crate::client::RemoteStore`] (the
//! network client used by the front end). Screen models are generic over it.

use std::cmp::Ordering;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Largest id list accepted by an `in` filter.
pub const MAX_BATCH: usize = 10;

/// Written in place of a field value, replaced with the store's clock (epoch
/// milliseconds) when the document is written.
pub const SERVER_TIMESTAMP: &str = "__server_timestamp__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Document {
            id: id.into(),
            data,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Deserializes the document, with its id injected as the `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let mut data = self.data.clone();
        if let Value::Object(map) = &mut data {
            map.insert("id".to_string(), Value::String(self.id.clone()));
        }
        Ok(serde_json::from_value(data)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    Eq(String, Value),
    ArrayContains(String, Value),
    In(String, Vec<Value>),
    IdIn(Vec<String>),
}

impl Filter {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Eq(field, value) => doc.field(field) == Some(value),
            Filter::ArrayContains(field, value) => match doc.field(field) {
                Some(Value::Array(items)) => items.contains(value),
                _ => false,
            },
            Filter::In(field, values) => doc.field(field).map_or(false, |v| values.contains(v)),
            Filter::IdIn(ids) => ids.iter().any(|id| id == &doc.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Position of the last document of a previous page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub id: String,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub start_after: Option<Cursor>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Query {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            start_after: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field.to_string(), value.into()));
        self
    }

    pub fn where_array_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters
            .push(Filter::ArrayContains(field.to_string(), value.into()));
        self
    }

    pub fn where_in(mut self, field: &str, values: Vec<Value>) -> Self {
        self.filters.push(Filter::In(field.to_string(), values));
        self
    }

    pub fn where_id_in(mut self, ids: Vec<String>) -> Self {
        self.filters.push(Filter::IdIn(ids));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.start_after = Some(cursor);
        self
    }

    /// Cursor pointing at `doc` under this query's ordering.
    pub fn cursor_for(&self, doc: &Document) -> Cursor {
        Cursor {
            id: doc.id.clone(),
            value: self
                .order_by
                .as_ref()
                .and_then(|order| doc.field(&order.field).cloned()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for filter in &self.filters {
            let len = match filter {
                Filter::In(_, values) => values.len(),
                Filter::IdIn(ids) => ids.len(),
                _ => continue,
            };
            if len == 0 {
                return Err(Error::Query("'in' filter needs at least one value".to_string()));
            }
            if len > MAX_BATCH {
                return Err(Error::Query(format!(
                    "'in' filter supports at most {} values, got {}",
                    MAX_BATCH, len
                )));
            }
        }
        Ok(())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|filter| filter.matches(doc))
    }

    /// Filters, orders, pages and limits `docs` (all from this collection).
    /// Without an explicit ordering documents are ordered by id.
    pub fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut docs: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).collect();
        docs.sort_by(|a, b| self.compare(self.key_of(a), self.key_of(b)));

        if let Some(cursor) = &self.start_after {
            let cursor_key = (cursor.value.as_ref(), cursor.id.as_str());
            docs.retain(|d| self.compare(self.key_of(d), cursor_key) == Ordering::Greater);
        }
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }

    fn key_of<'a>(&self, doc: &'a Document) -> (Option<&'a Value>, &'a str) {
        let value = self.order_by.as_ref().and_then(|o| doc.field(&o.field));
        (value, doc.id.as_str())
    }

    fn compare(&self, a: (Option<&Value>, &str), b: (Option<&Value>, &str)) -> Ordering {
        let primary = match &self.order_by {
            Some(order) => {
                let ord = compare_values(a.0, b.0);
                match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            }
            None => Ordering::Equal,
        };
        primary.then_with(|| a.1.cmp(b.1))
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order over field values; missing fields sort with null, lowest.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Replaces top-level [`SERVER_TIMESTAMP`] sentinels with `now_ms`.
pub fn resolve_server_timestamps(data: &mut Value, now_ms: i64) {
    if let Value::Object(map) = data {
        for value in map.values_mut() {
            if value.as_str() == Some(SERVER_TIMESTAMP) {
                *value = Value::from(now_ms);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    /// Full, ordered result set of the live query.
    Snapshot(Vec<Document>),
    /// Terminal: no events follow.
    Error(String),
}

/// Handle to a live query. Dropping it releases the listener.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<SnapshotEvent>,
    release: Option<Box<dyn FnOnce() + Send>>,
    finished: bool,
}

impl Subscription {
    pub fn new(
        events: mpsc::UnboundedReceiver<SnapshotEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Subscription {
            events,
            release: Some(Box::new(release)),
            finished: false,
        }
    }

    /// A subscription that reports `message` and ends.
    pub fn failed(message: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(SnapshotEvent::Error(message.into()));
        Subscription::new(rx, || {})
    }

    /// Next event, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<SnapshotEvent> {
        if self.finished {
            return None;
        }
        let event = self.events.recv().await;
        match &event {
            Some(SnapshotEvent::Error(_)) | None => self.finished = true,
            Some(SnapshotEvent::Snapshot(_)) => {}
        }
        event
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

pub trait DocumentStore: Send + Sync {
    fn get(&self, query: &Query) -> impl Future<Output = Result<Vec<Document>>> + Send;

    fn get_doc(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Document>>> + Send;

    /// Inserts under a generated id and returns it.
    fn add(&self, collection: &str, data: Value) -> impl Future<Output = Result<String>> + Send;

    fn set(&self, collection: &str, id: &str, data: Value)
        -> impl Future<Output = Result<()>> + Send;

    /// Merges the top-level fields of `fields` into an existing document.
    fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete(&self, collection: &str, id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Starts a live query. The first event is the current result set.
    fn subscribe(&self, query: Query) -> Subscription;
}

pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `path` and returns a URL that retrieves them.
    fn upload(&self, path: &str, bytes: Vec<u8>) -> impl Future<Output = Result<String>> + Send;
}
