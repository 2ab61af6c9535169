//! One chat's message thread: the live message list, sending and read
//! receipts.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use log::{debug, error, info, warn};
use serde_json::json;

use crate::auth::{AuthProvider, Session};
use crate::error::{Alert, Result};
use crate::models::{messages_collection, ChatMessage, MessageStatus, CHATS};
use crate::store::{Direction, DocumentStore, Query, SERVER_TIMESTAMP};
use crate::sync::{ListSpec, ListState, ListSync};

#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub id: String,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Sent by the signed-in user.
    pub mine: bool,
    pub status: MessageStatus,
}

impl MessageView {
    /// Messages stored without a status read as sent by the user and
    /// received from the other side.
    fn from_message(message: ChatMessage, uid: &str) -> Self {
        let mine = message.sender_id == uid;
        let fallback = if mine {
            MessageStatus::Sent
        } else {
            MessageStatus::Received
        };
        MessageView {
            id: message.id,
            text: message.text,
            timestamp: message.timestamp,
            mine,
            status: message.status.unwrap_or(fallback),
        }
    }
}

fn newest_first(a: &MessageView, b: &MessageView) -> Ordering {
    b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id))
}

/// Messages of `chat_id`, newest first.
pub fn message_spec(chat_id: &str) -> ListSpec<MessageView> {
    let collection = messages_collection(chat_id);
    ListSpec {
        query: Box::new(move |_: &Session| {
            Query::collection(collection.clone()).order_by("timestamp", Direction::Descending)
        }),
        map: |doc, session| {
            let message: ChatMessage = doc.decode()?;
            Ok(Some(MessageView::from_message(message, &session.uid)))
        },
        order: newest_first,
    }
}

/// The open conversation with one doctor and the message being typed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatThread {
    chat_id: String,
    doctor_id: String,
    state: ListState<MessageView>,
    draft: String,
}

impl ChatThread {
    pub fn new(chat_id: impl Into<String>, doctor_id: impl Into<String>) -> Self {
        ChatThread {
            chat_id: chat_id.into(),
            doctor_id: doctor_id.into(),
            state: ListState {
                items: Vec::new(),
                loading: true,
                error: None,
            },
            draft: String::new(),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn doctor_id(&self) -> &str {
        &self.doctor_id
    }

    /// Starts the live message list for this chat.
    pub fn subscribe<S, A>(&self, store: &S, auth: &A) -> ListSync<MessageView>
    where
        S: DocumentStore,
        A: AuthProvider + ?Sized,
    {
        ListSync::start(store, auth, message_spec(&self.chat_id))
    }

    pub fn apply(&mut self, state: ListState<MessageView>) {
        self.state = state;
    }

    pub fn messages(&self) -> &[MessageView] {
        &self.state.items
    }

    pub fn loading(&self) -> bool {
        self.state.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.state.error.as_deref()
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// The trimmed draft, clearing it. `None` when there is nothing to send.
    pub fn take_draft(&mut self) -> Option<String> {
        let text = self.draft.trim().to_string();
        if text.is_empty() {
            return None;
        }
        self.draft.clear();
        Some(text)
    }
}

/// Adds a message from the signed-in user and points the chat's summary at
/// it, leaving the chat unread for the doctor. Returns the alert to show when
/// it could not be sent.
pub async fn send_message<S, A>(
    store: &S,
    auth: &A,
    chat_id: &str,
    doctor_id: &str,
    text: &str,
) -> Option<Alert>
where
    S: DocumentStore,
    A: AuthProvider + ?Sized,
{
    let Some(session) = auth.current_session() else {
        warn!("No authenticated user");
        return Some(Alert::error("Please sign in to send messages."));
    };
    let text = text.trim();
    if text.is_empty() {
        debug!("Empty message not sent");
        return None;
    }

    match write_message(store, &session, chat_id, doctor_id, text).await {
        Ok(id) => {
            info!("Sent message {} in chat {}", id, chat_id);
            None
        }
        Err(e) => {
            error!("Error sending message: {}", e);
            Some(Alert::failed("send message"))
        }
    }
}

async fn write_message<S: DocumentStore>(
    store: &S,
    session: &Session,
    chat_id: &str,
    doctor_id: &str,
    text: &str,
) -> Result<String> {
    let message = json!({
        "text": text,
        "senderId": session.uid,
        "receiverId": doctor_id,
        "senderType": "patient",
        "timestamp": SERVER_TIMESTAMP,
        "read": false,
        "status": MessageStatus::Sent.as_str(),
    });
    let id = store.add(&messages_collection(chat_id), message).await?;

    let summary = json!({
        "participants": [session.uid, doctor_id],
        "lastMessage": text,
        "lastMessageTime": SERVER_TIMESTAMP,
        "lastSenderId": session.uid,
        "read": false,
    });
    if store.get_doc(CHATS, chat_id).await?.is_some() {
        store.update(CHATS, chat_id, summary).await?;
    } else {
        store.set(CHATS, chat_id, summary).await?;
    }
    Ok(id)
}

/// Marks the doctor's side of the chat as read: the chat flag when the doctor
/// sent the last message, and every doctor message not yet read. Returns how
/// many messages changed.
pub async fn mark_read<S: DocumentStore>(store: &S, chat_id: &str, doctor_id: &str) -> Result<usize> {
    if let Some(chat) = store.get_doc(CHATS, chat_id).await? {
        let last_sender = chat.field("lastSenderId").and_then(|v| v.as_str());
        if last_sender == Some(doctor_id) {
            store.update(CHATS, chat_id, json!({ "read": true })).await?;
        }
    }

    let collection = messages_collection(chat_id);
    let from_doctor = store
        .get(&Query::collection(collection.as_str()).where_eq("senderId", doctor_id))
        .await?;
    let unread: Vec<String> = from_doctor
        .into_iter()
        .filter(|doc| doc.field("status").and_then(|v| v.as_str()) != Some(MessageStatus::Read.as_str()))
        .map(|doc| doc.id)
        .collect();
    if unread.is_empty() {
        return Ok(0);
    }

    try_join_all(
        unread
            .iter()
            .map(|id| store.update(&collection, id, json!({ "status": MessageStatus::Read.as_str() }))),
    )
    .await?;
    debug!("Marked {} messages read in chat {}", unread.len(), chat_id);
    Ok(unread.len())
}
