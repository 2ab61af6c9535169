use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{
    resolve_server_timestamps, BlobStore, Document, DocumentStore, Query, SnapshotEvent,
    Subscription,
};

struct Listener {
    query: Query,
    tx: mpsc::UnboundedSender<SnapshotEvent>,
}

struct Inner {
    conn: Mutex<Connection>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_listener: AtomicU64,
}

/// Document store on a single SQLite table, with live queries re-run after
/// every write to the affected collection.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Inner>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SqliteStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )",
            [],
        )?;
        Ok(SqliteStore {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                listeners: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
            }),
        })
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    fn load_collection(conn: &Connection, collection: &str) -> Result<Vec<Document>> {
        let mut stmt = conn.prepare("SELECT id, data FROM documents WHERE collection = ?1")?;
        let rows = stmt.query_map([collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut docs = Vec::new();
        for row in rows {
            let (id, data) = row?;
            docs.push(Document::new(id, serde_json::from_str(&data)?));
        }
        Ok(docs)
    }

    fn run_query(conn: &Connection, query: &Query) -> Result<Vec<Document>> {
        query.validate()?;
        let docs = Self::load_collection(conn, &query.collection)?;
        Ok(query.apply(docs))
    }

    fn write(conn: &Connection, collection: &str, id: &str, data: &Value) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO documents (collection, id, data) VALUES (?1, ?2, ?3)",
            params![collection, id, serde_json::to_string(data)?],
        )?;
        Ok(())
    }

    fn read(conn: &Connection, collection: &str, id: &str) -> Result<Option<Document>> {
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(data) => Ok(Some(Document::new(id, serde_json::from_str(&data)?))),
            None => Ok(None),
        }
    }

    /// Pushes a fresh snapshot to every listener on `collection`. Listeners
    /// whose receiver is gone, or whose query fails, are removed.
    fn notify(&self, conn: &Connection, collection: &str) {
        let mut listeners = lock(&self.inner.listeners);
        listeners.retain(|id, listener| {
            if listener.query.collection != collection {
                return true;
            }
            let event = match Self::run_query(conn, &listener.query) {
                Ok(docs) => SnapshotEvent::Snapshot(docs),
                Err(e) => {
                    warn!("Live query {} on {} failed: {}", id, collection, e);
                    let _ = listener.tx.send(SnapshotEvent::Error(e.to_string()));
                    return false;
                }
            };
            listener.tx.send(event).is_ok()
        });
    }

    fn release(inner: &Weak<Inner>, id: u64) {
        if let Some(inner) = inner.upgrade() {
            lock(&inner.listeners).remove(&id);
            debug!("Live query {} released", id);
        }
    }
}

impl DocumentStore for SqliteStore {
    async fn get(&self, query: &Query) -> Result<Vec<Document>> {
        let conn = lock(&self.inner.conn);
        Self::run_query(&conn, query)
    }

    async fn get_doc(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let conn = lock(&self.inner.conn);
        Self::read(&conn, collection, id)
    }

    async fn add(&self, collection: &str, mut data: Value) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        resolve_server_timestamps(&mut data, Utc::now().timestamp_millis());
        let conn = lock(&self.inner.conn);
        Self::write(&conn, collection, &id, &data)?;
        self.notify(&conn, collection);
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, mut data: Value) -> Result<()> {
        resolve_server_timestamps(&mut data, Utc::now().timestamp_millis());
        let conn = lock(&self.inner.conn);
        Self::write(&conn, collection, id, &data)?;
        self.notify(&conn, collection);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, mut fields: Value) -> Result<()> {
        resolve_server_timestamps(&mut fields, Utc::now().timestamp_millis());
        let Value::Object(fields) = fields else {
            return Err(Error::Validation("update fields must be an object".to_string()));
        };
        let conn = lock(&self.inner.conn);
        let mut doc = Self::read(&conn, collection, id)?.ok_or_else(|| Error::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        })?;
        match &mut doc.data {
            Value::Object(existing) => existing.extend(fields),
            other => *other = Value::Object(fields),
        }
        Self::write(&conn, collection, id, &doc.data)?;
        self.notify(&conn, collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let conn = lock(&self.inner.conn);
        conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        self.notify(&conn, collection);
        Ok(())
    }

    fn subscribe(&self, query: Query) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);

        let initial = {
            let conn = lock(&self.inner.conn);
            Self::run_query(&conn, &query)
        };
        match initial {
            Ok(docs) => {
                let _ = tx.send(SnapshotEvent::Snapshot(docs));
                debug!("Live query {} registered on {}", id, query.collection);
                lock(&self.inner.listeners).insert(id, Listener { query, tx });
            }
            Err(e) => {
                let _ = tx.send(SnapshotEvent::Error(e.to_string()));
                return Subscription::new(rx, || {});
            }
        }

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(rx, move || Self::release(&inner, id))
    }
}

/// Small key-value cache for client-side preferences.
pub struct Preferences {
    conn: Connection,
}

impl Preferences {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Preferences { conn })
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM preferences WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM preferences WHERE key = ?1", [key])?;
        Ok(())
    }
}

/// Blob storage on the local filesystem; URLs are `file://` URLs.
#[derive(Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalBlobStore { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let is_plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !is_plain {
            return Err(Error::Validation(format!("invalid blob path: {}", path)));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for LocalBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &bytes).await?;
        let absolute = tokio::fs::canonicalize(&target).await?;
        debug!("Stored {} bytes at {}", bytes.len(), absolute.display());
        Ok(format!("file://{}", absolute.display()))
    }
}
