//! Network client for the document service: a [`DocumentStore`] and
//! [`BlobStore`] whose operations travel as JSON lines over one TCP
//! connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::server::{ClientMessage, ServerResponse};
use crate::storage::lock;
use crate::store::{BlobStore, Document, DocumentStore, Query, SnapshotEvent, Subscription};

struct Connection {
    outgoing: mpsc::UnboundedSender<ClientMessage>,
    pending: Mutex<HashMap<u64, oneshot::Sender<ServerResponse>>>,
    subscriptions: Mutex<HashMap<u64, mpsc::UnboundedSender<SnapshotEvent>>>,
    next_id: AtomicU64,
    /// Set once the server side is gone; no new work is accepted after that.
    closed: AtomicBool,
}

impl Connection {
    fn route(&self, response: ServerResponse) {
        let req = match &response {
            ServerResponse::Snapshot { sub, documents } => {
                self.publish(*sub, SnapshotEvent::Snapshot(documents.clone()));
                return;
            }
            ServerResponse::SubscriptionError { sub, message } => {
                self.publish(*sub, SnapshotEvent::Error(message.clone()));
                lock(&self.subscriptions).remove(sub);
                return;
            }
            ServerResponse::Error { req: None, message } => {
                warn!("Backend error: {}", message);
                return;
            }
            ServerResponse::Error { req: Some(req), .. }
            | ServerResponse::Documents { req, .. }
            | ServerResponse::Document { req, .. }
            | ServerResponse::Added { req, .. }
            | ServerResponse::Done { req }
            | ServerResponse::Uploaded { req, .. } => *req,
        };
        match lock(&self.pending).remove(&req) {
            Some(waiter) => {
                let _ = waiter.send(response);
            }
            None => warn!("Response for unknown request {}", req),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn publish(&self, sub: u64, event: SnapshotEvent) {
        if let Some(tx) = lock(&self.subscriptions).get(&sub) {
            let _ = tx.send(event);
        }
    }

    /// Fails every waiting request and ends every live query.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.pending).clear();
        for (_, tx) in lock(&self.subscriptions).drain() {
            let _ = tx.send(SnapshotEvent::Error(Error::Disconnected.to_string()));
        }
    }
}

#[derive(Clone)]
pub struct RemoteStore {
    inner: Arc<Connection>,
}

impl fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStore")
            .field("pending", &lock(&self.inner.pending).len())
            .field("subscriptions", &lock(&self.inner.subscriptions).len())
            .finish()
    }
}

impl RemoteStore {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        info!("Connected to {}", addr);
        let (reader, mut writer) = tokio::io::split(stream);
        let (outgoing, mut rx) = mpsc::unbounded_channel::<ClientMessage>();

        let inner = Arc::new(Connection {
            outgoing,
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let connection = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let result = async {
                while let Some(message) = rx.recv().await {
                    let message_json = serde_json::to_string(&message)?;
                    writer.write_all(message_json.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await?;
                }
                writer.shutdown().await?;
                Ok::<(), Error>(())
            }
            .await;
            if let Err(e) = result {
                error!("Writer stopped: {}", e);
                if let Some(connection) = connection.upgrade() {
                    connection.close();
                }
            }
        });

        let connection = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        info!("Server disconnected");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Error reading from server: {}", e);
                        break;
                    }
                }
                let Some(connection) = connection.upgrade() else {
                    break;
                };
                match serde_json::from_str::<ServerResponse>(&line) {
                    Ok(response) => connection.route(response),
                    Err(e) => warn!("Invalid response: {}", e),
                }
            }
            if let Some(connection) = connection.upgrade() {
                connection.close();
            }
        });

        Ok(RemoteStore { inner })
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(&self, build: impl FnOnce(u64) -> ClientMessage) -> Result<ServerResponse> {
        if self.inner.is_closed() {
            return Err(Error::Disconnected);
        }
        let req = self.next_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(req, tx);
        // The reader may have closed the connection since the check above.
        if self.inner.is_closed() {
            lock(&self.inner.pending).remove(&req);
            return Err(Error::Disconnected);
        }
        if self.inner.outgoing.send(build(req)).is_err() {
            lock(&self.inner.pending).remove(&req);
            return Err(Error::Disconnected);
        }
        match rx.await {
            Ok(ServerResponse::Error { message, .. }) => Err(Error::Backend(message)),
            Ok(response) => Ok(response),
            Err(_) => Err(Error::Disconnected),
        }
    }
}

fn unexpected(response: ServerResponse) -> Error {
    Error::Backend(format!("unexpected response: {:?}", response))
}

impl DocumentStore for RemoteStore {
    async fn get(&self, query: &Query) -> Result<Vec<Document>> {
        let query = query.clone();
        match self.request(|req| ClientMessage::Get { req, query }).await? {
            ServerResponse::Documents { documents, .. } => Ok(documents),
            other => Err(unexpected(other)),
        }
    }

    async fn get_doc(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let message = |req| ClientMessage::GetDoc {
            req,
            collection: collection.to_string(),
            id: id.to_string(),
        };
        match self.request(message).await? {
            ServerResponse::Document { document, .. } => Ok(document),
            other => Err(unexpected(other)),
        }
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String> {
        let message = |req| ClientMessage::Add {
            req,
            collection: collection.to_string(),
            data,
        };
        match self.request(message).await? {
            ServerResponse::Added { id, .. } => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<()> {
        let message = |req| ClientMessage::Set {
            req,
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        };
        match self.request(message).await? {
            ServerResponse::Done { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<()> {
        let message = |req| ClientMessage::Update {
            req,
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        };
        match self.request(message).await? {
            ServerResponse::Done { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let message = |req| ClientMessage::Delete {
            req,
            collection: collection.to_string(),
            id: id.to_string(),
        };
        match self.request(message).await? {
            ServerResponse::Done { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    fn subscribe(&self, query: Query) -> Subscription {
        if self.inner.is_closed() {
            return Subscription::failed(Error::Disconnected.to_string());
        }
        let sub = self.next_id();
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscriptions).insert(sub, tx);
        if self.inner.is_closed() {
            lock(&self.inner.subscriptions).remove(&sub);
            return Subscription::failed(Error::Disconnected.to_string());
        }
        if self
            .inner
            .outgoing
            .send(ClientMessage::Subscribe { sub, query })
            .is_err()
        {
            lock(&self.inner.subscriptions).remove(&sub);
            return Subscription::failed(Error::Disconnected.to_string());
        }
        debug!("Subscription {} opened", sub);

        let connection: Weak<Connection> = Arc::downgrade(&self.inner);
        Subscription::new(rx, move || {
            if let Some(connection) = connection.upgrade() {
                lock(&connection.subscriptions).remove(&sub);
                let _ = connection.outgoing.send(ClientMessage::Unsubscribe { sub });
            }
        })
    }
}

impl BlobStore for RemoteStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<String> {
        let message = |req| ClientMessage::Upload {
            req,
            path: path.to_string(),
            data: STANDARD.encode(&bytes),
        };
        match self.request(message).await? {
            ServerResponse::Uploaded { url, .. } => Ok(url),
            other => Err(unexpected(other)),
        }
    }
}
