use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use ulid::Ulid;

use crate::model::*;
use crate::observability;

/// Identifies one browser session. Carried in the session cookie.
pub type SessionToken = Ulid;

/// Staff identity recorded in the session after a successful login.
pub type UserId = Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Draft,
    Confirmed,
    Flash,
    Warning,
    Error,
    UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionValue {
    Draft(ReservationDraft),
    Confirmed(Confirmation),
    Text(String),
    User(UserId),
}

/// How far a draft has progressed through the booking flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStage {
    #[default]
    Searching,
    RoomsOffered,
    RoomChosen,
    DetailsPending,
}

/// An in-progress reservation carried across requests. It gets an id only
/// once it is persisted, at which point it is replaced by a [`Confirmation`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReservationDraft {
    pub range: Option<DateRange>,
    /// Rooms the last search offered; a room choice must be one of these.
    pub offered: Vec<RoomId>,
    pub room_id: Option<RoomId>,
    pub room_name: Option<String>,
    pub guest: Option<Guest>,
    pub stage: DraftStage,
}

impl ReservationDraft {
    /// The room and range, once both are chosen.
    pub fn selection(&self) -> Option<(RoomId, DateRange)> {
        Some((self.room_id?, self.range?))
    }
}

/// A persisted reservation held for one-time display on the summary page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub reservation: Reservation,
    pub room_name: String,
}

/// Per-browser-session key/value storage.
pub trait SessionStore: Send + Sync {
    fn get(&self, token: SessionToken, key: SessionKey) -> Option<SessionValue>;
    fn put(&self, token: SessionToken, key: SessionKey, value: SessionValue);
    fn remove(&self, token: SessionToken, key: SessionKey) -> Option<SessionValue>;
    /// Move the session's values under a fresh token and return it.
    fn renew(&self, token: SessionToken) -> SessionToken;
    /// Drop the session and everything in it.
    fn destroy(&self, token: SessionToken);
}

struct SessionEntry {
    values: HashMap<SessionKey, SessionValue>,
    last_seen: Instant,
}

/// In-memory [`SessionStore`]. Sessions idle for longer than `lifetime`
/// are treated as absent and dropped by [`InMemorySessions::purge_expired`].
pub struct InMemorySessions {
    entries: DashMap<SessionToken, SessionEntry>,
    lifetime: Duration,
}

impl InMemorySessions {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            lifetime,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.last_seen.elapsed() < self.lifetime);
        let after = self.entries.len();
        metrics::gauge!(observability::SESSIONS_ACTIVE).set(after as f64);
        before.saturating_sub(after)
    }

    fn is_expired(&self, entry: &SessionEntry) -> bool {
        entry.last_seen.elapsed() >= self.lifetime
    }
}

impl SessionStore for InMemorySessions {
    fn get(&self, token: SessionToken, key: SessionKey) -> Option<SessionValue> {
        let mut entry = self.entries.get_mut(&token)?;
        if self.is_expired(&entry) {
            drop(entry);
            self.entries.remove(&token);
            return None;
        }
        entry.last_seen = Instant::now();
        entry.values.get(&key).cloned()
    }

    fn put(&self, token: SessionToken, key: SessionKey, value: SessionValue) {
        let mut entry = self.entries.entry(token).or_insert_with(|| SessionEntry {
            values: HashMap::new(),
            last_seen: Instant::now(),
        });
        if self.is_expired(&entry) {
            entry.values.clear();
        }
        entry.last_seen = Instant::now();
        entry.values.insert(key, value);
    }

    fn remove(&self, token: SessionToken, key: SessionKey) -> Option<SessionValue> {
        let mut entry = self.entries.get_mut(&token)?;
        if self.is_expired(&entry) {
            drop(entry);
            self.entries.remove(&token);
            return None;
        }
        entry.last_seen = Instant::now();
        entry.values.remove(&key)
    }

    fn renew(&self, token: SessionToken) -> SessionToken {
        let fresh = Ulid::new();
        if let Some((_, mut entry)) = self.entries.remove(&token) {
            if self.is_expired(&entry) {
                entry.values.clear();
            }
            entry.last_seen = Instant::now();
            self.entries.insert(fresh, entry);
        }
        fresh
    }

    fn destroy(&self, token: SessionToken) {
        self.entries.remove(&token);
    }
}

/// Typed view over one session in a [`SessionStore`].
pub struct Session<'a> {
    store: &'a dyn SessionStore,
    token: SessionToken,
}

impl<'a> Session<'a> {
    pub fn new(store: &'a dyn SessionStore, token: SessionToken) -> Self {
        Self { store, token }
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn draft(&self) -> Option<ReservationDraft> {
        match self.store.get(self.token, SessionKey::Draft)? {
            SessionValue::Draft(draft) => Some(draft),
            _ => None,
        }
    }

    pub fn put_draft(&self, draft: ReservationDraft) {
        self.store
            .put(self.token, SessionKey::Draft, SessionValue::Draft(draft));
    }

    pub fn remove_draft(&self) {
        self.store.remove(self.token, SessionKey::Draft);
    }

    pub fn put_confirmed(&self, confirmation: Confirmation) {
        self.store.put(
            self.token,
            SessionKey::Confirmed,
            SessionValue::Confirmed(confirmation),
        );
    }

    /// Take the confirmation out of the session; a second call returns `None`.
    pub fn take_confirmed(&self) -> Option<Confirmation> {
        match self.store.remove(self.token, SessionKey::Confirmed)? {
            SessionValue::Confirmed(confirmation) => Some(confirmation),
            _ => None,
        }
    }

    pub fn has_confirmed(&self) -> bool {
        matches!(
            self.store.get(self.token, SessionKey::Confirmed),
            Some(SessionValue::Confirmed(_))
        )
    }

    pub fn put_flash(&self, msg: impl Into<String>) {
        self.put_text(SessionKey::Flash, msg.into());
    }

    pub fn put_warning(&self, msg: impl Into<String>) {
        self.put_text(SessionKey::Warning, msg.into());
    }

    pub fn put_error(&self, msg: impl Into<String>) {
        self.put_text(SessionKey::Error, msg.into());
    }

    pub fn pop_flash(&self) -> Option<String> {
        self.pop_text(SessionKey::Flash)
    }

    pub fn pop_warning(&self) -> Option<String> {
        self.pop_text(SessionKey::Warning)
    }

    pub fn pop_error(&self) -> Option<String> {
        self.pop_text(SessionKey::Error)
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self.store.get(self.token, SessionKey::UserId)? {
            SessionValue::User(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }

    pub fn put_user_id(&self, id: UserId) {
        self.store.put(self.token, SessionKey::UserId, SessionValue::User(id));
    }

    fn put_text(&self, key: SessionKey, msg: String) {
        self.store.put(self.token, key, SessionValue::Text(msg));
    }

    fn pop_text(&self, key: SessionKey) -> Option<String> {
        match self.store.remove(self.token, key)? {
            SessionValue::Text(msg) => Some(msg),
            _ => None,
        }
    }
}
