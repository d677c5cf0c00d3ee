use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::{sync::broadcast::{self, error::RecvError}, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    access,
    db::{Membership, Message, RoomId},
    error::{ChatError, Result},
    session::Session,
};

/// A committed row-level change in one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "record", rename_all = "snake_case")]
pub enum ChangeEvent {
    MessageInserted(Message),
    MessageUpdated(Message),
    MembershipUpdated(Membership),
}

impl ChangeEvent {
    pub fn room_id(&self) -> RoomId {
        match self {
            ChangeEvent::MessageInserted(message) | ChangeEvent::MessageUpdated(message) => message.room_id,
            ChangeEvent::MembershipUpdated(membership) => membership.room_id,
        }
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Change(ChangeEvent),
    /// The subscriber fell behind and `missed` events were dropped. The only way back to
    /// a consistent view is a full re-fetch of the room.
    Resync { missed: u64 },
}

/// Per-room fan-out of [`ChangeEvent`]s. Delivery is best effort: nothing is kept for
/// subscribers that are not listening.
#[derive(Clone)]
pub struct Notifier {
    topics: Arc<Mutex<HashMap<RoomId, broadcast::Sender<ChangeEvent>>>>,
    capacity: usize,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<RoomId, broadcast::Sender<ChangeEvent>>> {
        // a panic while holding the map cannot leave it half-updated
        self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns how many subscribers the event reached.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let room_id = event.room_id();
        let mut topics = self.topics();
        let Some(tx) = topics.get(&room_id) else {
            return 0;
        };
        match tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                topics.remove(&room_id);
                0
            }
        }
    }

    fn listen(&self, room_id: RoomId) -> broadcast::Receiver<ChangeEvent> {
        self.topics()
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn topic_count(&self) -> usize {
        self.topics().len()
    }

    pub fn subscriber_count(&self, room_id: RoomId) -> usize {
        self.topics().get(&room_id).map_or(0, |tx| tx.receiver_count())
    }
}

/// A live subscription to one room. Dropping it unsubscribes.
pub struct Subscription {
    room_id: RoomId,
    session: Session,
    db_pool: SqlitePool,
    notifier: Notifier,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    /// Callers must have checked membership already.
    pub(crate) fn open(notifier: &Notifier, db_pool: SqlitePool, session: Session, room_id: RoomId) -> Self {
        debug!("subscribed to room {room_id}");
        Self {
            room_id,
            session,
            db_pool,
            notifier: notifier.clone(),
            rx: notifier.listen(room_id),
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Waits for the next event. Each event is re-authorized before it is handed out,
    /// so a signed-out session or a caller who is no longer a member gets
    /// `Unauthorized` instead of the event.
    pub async fn recv(&mut self) -> Result<Notification> {
        let event = match self.rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                warn!("subscriber of room {} lagged by {missed} events", self.room_id);
                return Ok(Notification::Resync { missed });
            }
            Err(RecvError::Closed) => {
                return Err(ChatError::transport(format!("room {} topic closed", self.room_id)));
            }
        };

        let caller = self.session.identity()?;
        access::require_member(&self.db_pool, self.room_id, caller).await?;
        Ok(Notification::Change(event))
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut topics = self.notifier.topics();
        // our own receiver is still alive at this point
        if topics.get(&self.room_id).is_some_and(|tx| tx.receiver_count() <= 1) {
            topics.remove(&self.room_id);
        }
        debug!("unsubscribed from room {}", self.room_id);
    }
}

/// A subscription driven by a background task that hands every notification to a
/// callback. The task stops after the first error or when the handle is unsubscribed
/// or dropped.
pub struct SubscriptionHandle {
    room_id: RoomId,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub(crate) fn spawn<F>(mut subscription: Subscription, mut handler: F) -> Self
    where
        F: FnMut(Result<Notification>) + Send + 'static,
    {
        let room_id = subscription.room_id();
        let task = tokio::spawn(async move {
            loop {
                let next = subscription.recv().await;
                let stop = next.is_err();
                handler(next);
                if stop {
                    break;
                }
            }
        });
        Self { room_id, task }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
