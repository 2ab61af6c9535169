//! Keeps a local, ordered list of view models in step with a live query.

use std::cmp::Ordering;

use log::{debug, error, warn};

use crate::auth::{AuthProvider, Session};
use crate::error::Result;
use crate::store::{Document, DocumentStore, Query, SnapshotEvent, Subscription};

/// How one screen's list is queried, mapped and ordered.
pub struct ListSpec<T> {
    /// Builds the live query for the signed-in user.
    pub query: Box<dyn Fn(&Session) -> Query + Send + Sync>,
    /// `Ok(None)` skips the record silently; `Err` skips it with a warning.
    pub map: fn(&Document, &Session) -> Result<Option<T>>,
    pub order: fn(&T, &T) -> Ordering,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListState<T> {
    pub items: Vec<T>,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct ListSync<T> {
    spec: ListSpec<T>,
    session: Option<Session>,
    subscription: Option<Subscription>,
    state: ListState<T>,
}

impl<T> ListSync<T> {
    /// Subscribes for the current session, or returns an idle, empty list
    /// when nobody is signed in.
    pub fn start<S, A>(store: &S, auth: &A, spec: ListSpec<T>) -> Self
    where
        S: DocumentStore,
        A: AuthProvider + ?Sized,
    {
        let session = auth.current_session();
        let subscription = session.as_ref().map(|session| {
            let query = (spec.query)(session);
            debug!("Subscribing to {}", query.collection);
            store.subscribe(query)
        });
        if session.is_none() {
            warn!("No authenticated user; list stays empty");
        }
        let loading = subscription.is_some();
        ListSync {
            spec,
            session,
            subscription,
            state: ListState {
                items: Vec::new(),
                loading,
                error: None,
            },
        }
    }

    pub fn state(&self) -> &ListState<T> {
        &self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    /// Waits for the next snapshot and republishes the list. Returns `None`
    /// once the subscription is closed or has ended.
    pub async fn next(&mut self) -> Option<&ListState<T>> {
        let subscription = self.subscription.as_mut()?;
        match subscription.next().await {
            Some(SnapshotEvent::Snapshot(docs)) => self.apply(docs),
            Some(SnapshotEvent::Error(message)) => {
                error!("Live query failed: {}", message);
                self.state.loading = false;
                self.state.error = Some(message);
                self.subscription = None;
            }
            None => {
                self.state.loading = false;
                self.subscription = None;
                return None;
            }
        }
        Some(&self.state)
    }

    fn apply(&mut self, docs: Vec<Document>) {
        let Some(session) = &self.session else {
            return;
        };
        let mut items = Vec::with_capacity(docs.len());
        for doc in &docs {
            match (self.spec.map)(doc, session) {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(e) => warn!("Skipping record {}: {}", doc.id, e),
            }
        }
        items.sort_by(self.spec.order);
        debug!("Snapshot with {} of {} records", items.len(), docs.len());
        self.state.items = items;
        self.state.loading = false;
        self.state.error = None;
    }

    /// Releases the subscription; the last list stays readable.
    pub fn close(&mut self) {
        if self.subscription.take().is_some() {
            debug!("List subscription released");
        }
        self.state.loading = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::LocalAuth;
    use crate::storage::SqliteStore;
    use crate::store::Direction;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: String,
        n: i64,
    }

    fn spec() -> ListSpec<Row> {
        ListSpec {
            query: Box::new(|session: &Session| {
                Query::collection("rows")
                    .where_eq("owner", session.uid.as_str())
                    .order_by("n", Direction::Ascending)
            }),
            map: |doc, _| {
                Ok(doc.field("n").and_then(|n| n.as_i64()).map(|n| Row {
                    id: doc.id.clone(),
                    n,
                }))
            },
            order: |a, b| b.n.cmp(&a.n),
        }
    }

    #[tokio::test]
    async fn test_without_session_list_is_idle() {
        let store = SqliteStore::new(":memory:").unwrap();
        let auth = LocalAuth::default();
        let mut sync = ListSync::start(&store, &auth, spec());

        assert!(!sync.state().loading);
        assert!(sync.state().items.is_empty());
        assert!(sync.next().await.is_none());
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshots_are_mapped_and_reordered() {
        let store = SqliteStore::new(":memory:").unwrap();
        store.set("rows", "r1", json!({"owner": "u1", "n": 1})).await.unwrap();
        store.set("rows", "r2", json!({"owner": "u1", "n": 5})).await.unwrap();
        store.set("rows", "r3", json!({"owner": "u2", "n": 9})).await.unwrap();
        store.set("rows", "r4", json!({"owner": "u1"})).await.unwrap();

        let auth = LocalAuth::new(Some(Session::new("u1")));
        let mut sync = ListSync::start(&store, &auth, spec());
        assert!(sync.state().loading);

        let state = sync.next().await.unwrap();
        assert!(!state.loading);
        let ids: Vec<_> = state.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r1"]);

        store.set("rows", "r5", json!({"owner": "u1", "n": 3})).await.unwrap();
        let state = sync.next().await.unwrap();
        let ids: Vec<_> = state.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r5", "r1"]);
    }

    #[tokio::test]
    async fn test_close_releases_listener_and_keeps_items() {
        let store = SqliteStore::new(":memory:").unwrap();
        store.set("rows", "r1", json!({"owner": "u1", "n": 1})).await.unwrap();
        let auth = LocalAuth::new(Some(Session::new("u1")));
        let mut sync = ListSync::start(&store, &auth, spec());
        sync.next().await.unwrap();

        assert_eq!(store.listener_count(), 1);
        sync.close();
        assert_eq!(store.listener_count(), 0);
        assert_eq!(sync.state().items.len(), 1);
        assert!(sync.next().await.is_none());
    }

    #[tokio::test]
    async fn test_error_keeps_last_known_list() {
        let store = SqliteStore::new(":memory:").unwrap();
        store.set("rows", "r1", json!({"owner": "u1", "n": 1})).await.unwrap();

        let spec = ListSpec {
            query: Box::new(|_: &Session| {
                let ids = (0..11).map(|i| i.to_string()).collect();
                Query::collection("rows").where_id_in(ids)
            }),
            ..spec()
        };
        let auth = LocalAuth::new(Some(Session::new("u1")));
        let mut sync = ListSync::start(&store, &auth, spec);
        sync.state.items.push(Row {
            id: "stale".to_string(),
            n: 0,
        });

        let state = sync.next().await.unwrap();
        assert!(!state.loading);
        assert!(state.error.is_some());
        assert_eq!(state.items.len(), 1);
        assert!(!sync.is_active());
    }
}
