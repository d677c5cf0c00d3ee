//! Hand-off between the cookie session and the chat [`Session`].
//!
//! Signing in proper happens in the community app's own auth flow. It hands the
//! browser a short-lived signed token, which is exchanged here for a cookie session.
//! Every later request resolves the cookie to the same chat session until sign-out or
//! idle expiry invalidates it, ending any WebSocket subscriptions that hold it.

mod login;
mod logout;
mod token;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use axum::{routing::post, Router};
use tokio::{task::JoinHandle, time::Instant};
use tracing::debug;
use uuid::Uuid;

pub use token::SignInKey;

use crate::{session::Session, AppError, AppResult, AppState};

/// Cookie-session key of the registry entry.
pub(crate) const SESSION_KEY: &str = "chat_session";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/session", post(login::login).delete(logout::logout))
}

struct Entry {
    session: Session,
    last_used: Instant,
}

/// Live chat sessions by registry key. An entry idle for longer than the cookie
/// session's inactivity window is signed out and dropped.
#[derive(Clone)]
pub struct Sessions {
    live: Arc<Mutex<HashMap<Uuid, Entry>>>,
    idle: Duration,
}

impl Sessions {
    pub fn new(idle: Duration) -> Self {
        Self {
            live: Arc::default(),
            idle,
        }
    }

    fn live(&self) -> MutexGuard<'_, HashMap<Uuid, Entry>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn evict_stale(&self, live: &mut HashMap<Uuid, Entry>, now: Instant) {
        live.retain(|key, entry| {
            let keep = entry.session.is_valid() && now.duration_since(entry.last_used) <= self.idle;
            if !keep {
                entry.session.sign_out();
                debug!("chat session {key} expired");
            }
            keep
        });
    }

    pub(crate) fn open(&self, key: Uuid, session: Session) {
        let now = Instant::now();
        let mut live = self.live();
        self.evict_stale(&mut live, now);
        live.insert(key, Entry { session, last_used: now });
    }

    /// The live session under `key`. Looking it up counts as use.
    pub(crate) fn get(&self, key: Uuid) -> Option<Session> {
        let now = Instant::now();
        let mut live = self.live();
        let entry = live.get_mut(&key)?;
        if !entry.session.is_valid() || now.duration_since(entry.last_used) > self.idle {
            if let Some(entry) = live.remove(&key) {
                entry.session.sign_out();
            }
            return None;
        }
        entry.last_used = now;
        Some(entry.session.clone())
    }

    pub(crate) fn close(&self, key: Uuid) {
        if let Some(entry) = self.live().remove(&key) {
            entry.session.sign_out();
        }
    }

    /// Signs out every expired entry, so idle subscriptions stop even when their
    /// cookie is never presented again.
    pub fn sweep(&self) {
        let mut live = self.live();
        self.evict_stale(&mut live, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let sessions = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            loop {
                tick.tick().await;
                sessions.sweep();
            }
        })
    }
}

/// The chat session behind the request's cookie.
pub(crate) async fn signed_in(session: &tower_sessions::Session, sessions: &Sessions) -> AppResult<Session> {
    let Some(key) = session.get::<Uuid>(SESSION_KEY).await? else {
        return Err(AppError::SignedOut);
    };
    sessions.get(key).ok_or(AppError::SignedOut)
}
