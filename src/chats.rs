use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Display;

use chrono::{DateTime, Duration, TimeZone, Utc};
use log::error;

use crate::auth::{AuthProvider, Session};
use crate::enrich::{distinct_ids, join, lookup_by_ids, MissingPolicy};
use crate::error::Result;
use crate::filter::{filter_items, Searchable};
use crate::models::{Chat, CHATS, DOCTORS};
use crate::store::{DocumentStore, Query};
use crate::sync::{ListSpec, ListSync};

/// A chat as read from the store, before its doctor is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRow {
    pub id: String,
    pub doctor_id: String,
    pub last_message: String,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoctorSummary {
    pub uid: String,
    pub full_name: String,
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatView {
    pub id: String,
    pub doctor: DoctorSummary,
    pub last_message: String,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread: bool,
}

impl Searchable for ChatView {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.doctor.full_name.as_str(), self.last_message.as_str()]
    }
}

fn latest_message_first(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
) -> Ordering {
    let a = a.map(|t| t.timestamp_millis()).unwrap_or(0);
    let b = b.map(|t| t.timestamp_millis()).unwrap_or(0);
    b.cmp(&a)
}

pub fn list_spec() -> ListSpec<ChatRow> {
    ListSpec {
        query: Box::new(|session: &Session| {
            Query::collection(CHATS).where_array_contains("participants", session.uid.as_str())
        }),
        map: |doc, session| {
            let chat: Chat = doc.decode()?;
            let Some(doctor_id) = chat.counterpart(&session.uid) else {
                return Ok(None);
            };
            Ok(Some(ChatRow {
                id: chat.id.clone(),
                doctor_id: doctor_id.to_string(),
                last_message: chat.last_message.clone(),
                last_message_time: chat.last_message_time,
                unread: chat.is_unread_for(&session.uid),
            }))
        },
        order: |a, b| latest_message_first(a.last_message_time, b.last_message_time),
    }
}

/// Resolves each chat's doctor in batches. Chats whose doctor cannot be found
/// are dropped.
pub async fn enrich_chats<S: DocumentStore>(store: &S, rows: &[ChatRow]) -> Result<Vec<ChatView>> {
    let ids = distinct_ids(rows.iter().map(|row| row.doctor_id.as_str()));
    let docs = lookup_by_ids(store, DOCTORS, &ids).await?;
    let doctors: HashMap<String, DoctorSummary> = docs
        .into_iter()
        .map(|(id, doc)| {
            let full_name = doc
                .field("fullName")
                .and_then(|v| v.as_str())
                .filter(|name| !name.is_empty())
                .unwrap_or("Doctor")
                .to_string();
            let profile_picture = doc
                .field("profilePicture")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let summary = DoctorSummary {
                uid: id.clone(),
                full_name,
                profile_picture,
            };
            (id, summary)
        })
        .collect();

    let mut chats = join(
        rows.to_vec(),
        &doctors,
        |row| row.doctor_id.as_str(),
        MissingPolicy::Drop,
        |row, doctor| ChatView {
            id: row.id,
            doctor: doctor.clone(),
            last_message: row.last_message,
            last_message_time: row.last_message_time,
            unread: row.unread,
        },
    );
    chats.sort_by(|a, b| latest_message_first(a.last_message_time, b.last_message_time));
    Ok(chats)
}

/// "HH:MM" for today, "Yesterday", otherwise "Mon D", in `now`'s time zone.
pub fn time_label<Tz>(time: DateTime<Utc>, now: DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let local = time.with_timezone(&now.timezone());
    let today = now.date_naive();
    let day = local.date_naive();
    if day == today {
        local.format("%H:%M").to_string()
    } else if today - Duration::days(1) == day {
        "Yesterday".to_string()
    } else {
        local.format("%b %-d").to_string()
    }
}

/// What a chat feed publishes for each snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatUpdate {
    Chats(Vec<ChatView>),
    /// The snapshot or its doctor lookup failed; the last list stands.
    Failed,
}

/// Live chat rows with their doctors resolved on every snapshot.
pub struct ChatFeed {
    sync: ListSync<ChatRow>,
}

impl ChatFeed {
    pub fn start<S, A>(store: &S, auth: &A) -> Self
    where
        S: DocumentStore,
        A: AuthProvider + ?Sized,
    {
        ChatFeed {
            sync: ListSync::start(store, auth, list_spec()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.sync.is_active()
    }

    /// Waits for the next snapshot and resolves its doctors. `None` once the
    /// subscription has ended.
    pub async fn next<S: DocumentStore>(&mut self, store: &S) -> Option<ChatUpdate> {
        let state = self.sync.next().await?;
        if state.error.is_some() {
            return Some(ChatUpdate::Failed);
        }
        let rows = state.items.clone();
        match enrich_chats(store, &rows).await {
            Ok(chats) => Some(ChatUpdate::Chats(chats)),
            Err(e) => {
                error!("Error fetching doctor data: {}", e);
                Some(ChatUpdate::Failed)
            }
        }
    }

    pub fn close(&mut self) {
        self.sync.close();
    }
}

/// The chat list screen: the last resolved chats and the search box.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatList {
    chats: Vec<ChatView>,
    loading: bool,
    search: String,
}

impl Default for ChatList {
    fn default() -> Self {
        ChatList {
            chats: Vec::new(),
            loading: true,
            search: String::new(),
        }
    }
}

impl ChatList {
    pub fn apply(&mut self, update: ChatUpdate) {
        if let ChatUpdate::Chats(chats) = update {
            self.chats = chats;
        }
        self.loading = false;
    }

    /// Nobody is signed in: nothing will arrive.
    pub fn set_idle(&mut self) {
        self.chats.clear();
        self.loading = false;
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn chats(&self) -> &[ChatView] {
        &self.chats
    }

    pub fn set_search(&mut self, query: impl Into<String>) {
        self.search = query.into();
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn visible(&self) -> Vec<&ChatView> {
        filter_items(&self.chats, &self.search, None)
    }

    pub fn unread_count(&self) -> usize {
        self.chats.iter().filter(|c| c.unread).count()
    }
}
