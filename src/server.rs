use std::collections::HashMap;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::storage::{LocalBlobStore, SqliteStore};
use crate::store::{BlobStore, Document, DocumentStore, Query, SnapshotEvent};

/// One JSON line sent by a client. `req` ids pair requests with their
/// response; `sub` ids tag live-query traffic.
#[derive(Debug, Serialize, Deserialize)]
pub enum ClientMessage {
    Get { req: u64, query: Query },
    GetDoc { req: u64, collection: String, id: String },
    Add { req: u64, collection: String, data: Value },
    Set { req: u64, collection: String, id: String, data: Value },
    Update { req: u64, collection: String, id: String, fields: Value },
    Delete { req: u64, collection: String, id: String },
    /// `data` is base64.
    Upload { req: u64, path: String, data: String },
    Subscribe { sub: u64, query: Query },
    Unsubscribe { sub: u64 },
}

#[derive(Debug, Serialize, Deserialize)]
pub enum ServerResponse {
    Documents { req: u64, documents: Vec<Document> },
    Document { req: u64, document: Option<Document> },
    Added { req: u64, id: String },
    Done { req: u64 },
    Uploaded { req: u64, url: String },
    Snapshot { sub: u64, documents: Vec<Document> },
    SubscriptionError { sub: u64, message: String },
    Error { req: Option<u64>, message: String },
}

impl ServerResponse {
    fn failure(req: u64, e: impl std::fmt::Display) -> Self {
        ServerResponse::Error {
            req: Some(req),
            message: e.to_string(),
        }
    }
}

/// Document service over TCP, one JSON message per line.
#[derive(Clone)]
pub struct Server {
    store: SqliteStore,
    blobs: LocalBlobStore,
}

impl Server {
    pub fn new(store: SqliteStore, blobs: LocalBlobStore) -> Self {
        Server { store, blobs }
    }

    pub async fn run(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server running on {}", addr);
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, addr) = listener.accept().await?;
            info!("New connection: {}", addr);

            let store = self.store.clone();
            let blobs = self.blobs.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(socket, store, blobs).await {
                    error!("Error handling client {}: {}", addr, e);
                }
                info!("Connection closed: {}", addr);
            });
        }
    }
}

async fn handle_client(socket: TcpStream, store: SqliteStore, blobs: LocalBlobStore) -> Result<()> {
    let (reader, mut socket_write) = tokio::io::split(socket);
    let mut reader = BufReader::new(reader);
    let (tx, mut rx) = mpsc::channel::<ServerResponse>(100);

    let writer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let response_json = serde_json::to_string(&response)?;
            socket_write.write_all(response_json.as_bytes()).await?;
            socket_write.write_all(b"\n").await?;
            socket_write.flush().await?;
        }
        Ok::<(), anyhow::Error>(())
    });

    let mut subscriptions: HashMap<u64, JoinHandle<()>> = HashMap::new();
    let mut line = String::new();

    let result = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break Ok(()),
            Ok(_) => {}
            Err(e) => break Err(e.into()),
        }
        if line.trim().is_empty() {
            continue;
        }

        let message = match serde_json::from_str::<ClientMessage>(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Invalid message format: {}", e);
                let response = ServerResponse::Error {
                    req: None,
                    message: format!("Invalid message format: {}", e),
                };
                if tx.send(response).await.is_err() {
                    break Ok(());
                }
                continue;
            }
        };

        let response = match message {
            ClientMessage::Subscribe { sub, query } => {
                debug!("Subscription {} on {}", sub, query.collection);
                let forward = forward_snapshots(&store, sub, query, tx.clone());
                if let Some(previous) = subscriptions.insert(sub, forward) {
                    previous.abort();
                }
                subscriptions.retain(|_, task| !task.is_finished());
                continue;
            }
            ClientMessage::Unsubscribe { sub } => {
                if let Some(task) = subscriptions.remove(&sub) {
                    task.abort();
                    debug!("Subscription {} released", sub);
                }
                continue;
            }
            request => handle_request(&store, &blobs, request).await,
        };
        if tx.send(response).await.is_err() {
            break Ok(());
        }
    };

    for (_, task) in subscriptions.drain() {
        task.abort();
    }
    drop(tx);
    if let Ok(Err(e)) = writer.await {
        debug!("Writer stopped: {}", e);
    }
    result
}

/// Relays one live query to the connection until it ends or is aborted.
/// Aborting drops the subscription, which releases the listener.
fn forward_snapshots(
    store: &SqliteStore,
    sub: u64,
    query: Query,
    tx: mpsc::Sender<ServerResponse>,
) -> JoinHandle<()> {
    let mut subscription = store.subscribe(query);
    tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            let response = match event {
                SnapshotEvent::Snapshot(documents) => ServerResponse::Snapshot { sub, documents },
                SnapshotEvent::Error(message) => ServerResponse::SubscriptionError { sub, message },
            };
            if tx.send(response).await.is_err() {
                break;
            }
        }
    })
}

async fn handle_request(
    store: &SqliteStore,
    blobs: &LocalBlobStore,
    request: ClientMessage,
) -> ServerResponse {
    match request {
        ClientMessage::Get { req, query } => match store.get(&query).await {
            Ok(documents) => ServerResponse::Documents { req, documents },
            Err(e) => ServerResponse::failure(req, e),
        },
        ClientMessage::GetDoc { req, collection, id } => {
            match store.get_doc(&collection, &id).await {
                Ok(document) => ServerResponse::Document { req, document },
                Err(e) => ServerResponse::failure(req, e),
            }
        }
        ClientMessage::Add { req, collection, data } => match store.add(&collection, data).await {
            Ok(id) => ServerResponse::Added { req, id },
            Err(e) => ServerResponse::failure(req, e),
        },
        ClientMessage::Set { req, collection, id, data } => {
            match store.set(&collection, &id, data).await {
                Ok(()) => ServerResponse::Done { req },
                Err(e) => ServerResponse::failure(req, e),
            }
        }
        ClientMessage::Update { req, collection, id, fields } => {
            match store.update(&collection, &id, fields).await {
                Ok(()) => ServerResponse::Done { req },
                Err(e) => ServerResponse::failure(req, e),
            }
        }
        ClientMessage::Delete { req, collection, id } => {
            match store.delete(&collection, &id).await {
                Ok(()) => ServerResponse::Done { req },
                Err(e) => ServerResponse::failure(req, e),
            }
        }
        ClientMessage::Upload { req, path, data } => {
            let bytes = match STANDARD.decode(data.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => return ServerResponse::failure(req, format!("Base64 decode error: {}", e)),
            };
            match blobs.upload(&path, bytes).await {
                Ok(url) => ServerResponse::Uploaded { req, url },
                Err(e) => ServerResponse::failure(req, e),
            }
        }
        ClientMessage::Subscribe { sub, .. } | ClientMessage::Unsubscribe { sub } => {
            ServerResponse::Error {
                req: None,
                message: format!("subscription {} is not a request", sub),
            }
        }
    }
}
