//! The client-facing chat API. Every call takes the caller's [`Session`], passes the
//! access predicates, runs one atomic storage operation and then fans the committed
//! change out to the room's subscribers.

use std::collections::BTreeSet;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::{
    access,
    db::{now_millis, Identity, Membership, Message, MessageId, MessageStatus, Profile, Room, RoomId},
    error::{ChatError, Result},
    profiles,
    rooms::{
        directory, members, msg, receipts,
        notify::{ChangeEvent, Notification, Notifier, Subscription, SubscriptionHandle},
    },
    session::Session,
};

/// Everything a client needs to (re)build its view of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSnapshot {
    pub room: Room,
    pub members: Vec<Membership>,
    pub messages: Vec<Message>,
}

#[derive(Clone)]
pub struct ChatService {
    db_pool: SqlitePool,
    notifier: Notifier,
    page_limit: u32,
}

impl ChatService {
    pub fn new(db_pool: SqlitePool, notifier: Notifier, page_limit: u32) -> Self {
        Self {
            db_pool,
            notifier,
            page_limit: page_limit.max(1),
        }
    }

    pub fn db_pool(&self) -> &SqlitePool {
        &self.db_pool
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn publish_all(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        for event in events {
            self.notifier.publish(event);
        }
    }

    /// Account provisioning for the identity service. Not session-gated.
    pub async fn provision_profile(
        &self,
        id: Identity,
        display_name: &str,
        avatar_url: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Profile> {
        profiles::provision(&self.db_pool, id, display_name, avatar_url, phone).await
    }

    pub async fn get_profile(&self, session: &Session, id: Identity) -> Result<Profile> {
        session.identity()?;
        profiles::find(&self.db_pool, id).await
    }

    pub async fn get_or_create_room(&self, session: &Session, a: Identity, b: Identity) -> Result<RoomId> {
        access::require_creator(session.identity()?, a)?;
        Ok(directory::get_or_create_room(&self.db_pool, a, b).await?.id)
    }

    pub async fn list_rooms(&self, session: &Session, user: Identity) -> Result<Vec<Room>> {
        access::require_self(session.identity()?, user)?;
        directory::list_rooms(&self.db_pool, user).await
    }

    pub async fn get_room(&self, session: &Session, room_id: RoomId) -> Result<Room> {
        access::require_member(&self.db_pool, room_id, session.identity()?).await?;
        directory::get_room(&self.db_pool, room_id).await
    }

    pub async fn list_members(&self, session: &Session, room_id: RoomId) -> Result<BTreeSet<Identity>> {
        access::require_member(&self.db_pool, room_id, session.identity()?).await?;
        members::identities(&self.db_pool, room_id).await
    }

    pub async fn list_messages(&self, session: &Session, room_id: RoomId) -> Result<Vec<Message>> {
        access::require_member(&self.db_pool, room_id, session.identity()?).await?;
        msg::list(&self.db_pool, room_id).await
    }

    /// Cursor catch-up: messages stored after `after` (a message `seq`), at most
    /// `limit` of them, capped by the configured page limit.
    pub async fn list_messages_after(
        &self,
        session: &Session,
        room_id: RoomId,
        after: i64,
        limit: Option<u32>,
    ) -> Result<Vec<Message>> {
        access::require_member(&self.db_pool, room_id, session.identity()?).await?;
        let limit = limit.unwrap_or(self.page_limit).clamp(1, self.page_limit);
        msg::list_after(&self.db_pool, room_id, after, limit).await
    }

    /// The full re-fetch used on open and after a missed-event resync.
    pub async fn room_snapshot(&self, session: &Session, room_id: RoomId) -> Result<RoomSnapshot> {
        access::require_member(&self.db_pool, room_id, session.identity()?).await?;
        Ok(RoomSnapshot {
            room: directory::get_room(&self.db_pool, room_id).await?,
            members: members::list(&self.db_pool, room_id).await?,
            messages: msg::list(&self.db_pool, room_id).await?,
        })
    }

    /// Appends a message. A retry carrying the same `client_ref` returns the stored
    /// message and publishes nothing new.
    pub async fn send_message(
        &self,
        session: &Session,
        room_id: RoomId,
        user: Identity,
        content: &str,
        client_ref: Option<Uuid>,
    ) -> Result<Message> {
        access::require_sender(&self.db_pool, room_id, session.identity()?, user).await?;
        let appended = msg::append(&self.db_pool, room_id, user, content, client_ref).await?;
        if appended.inserted {
            self.notifier.publish(ChangeEvent::MessageInserted(appended.message.clone()));
        }
        Ok(appended.message)
    }

    pub async fn mark_read(&self, session: &Session, room_id: RoomId, user: Identity) -> Result<Vec<Message>> {
        self.mark_read_at(session, room_id, user, now_millis()).await
    }

    pub async fn mark_read_at(
        &self,
        session: &Session,
        room_id: RoomId,
        user: Identity,
        now: i64,
    ) -> Result<Vec<Message>> {
        let caller = session.identity()?;
        access::require_self(caller, user)?;
        access::require_member(&self.db_pool, room_id, caller).await?;

        let updated = receipts::mark_read(&self.db_pool, room_id, user, now).await?;
        self.publish_all(updated.iter().cloned().map(ChangeEvent::MessageUpdated));
        Ok(updated)
    }

    pub async fn mark_delivered(&self, session: &Session, room_id: RoomId, user: Identity) -> Result<Vec<Message>> {
        let caller = session.identity()?;
        access::require_self(caller, user)?;
        access::require_member(&self.db_pool, room_id, caller).await?;

        let updated = receipts::mark_delivered(&self.db_pool, room_id, user).await?;
        self.publish_all(updated.iter().cloned().map(ChangeEvent::MessageUpdated));
        Ok(updated)
    }

    /// Single-message transition on behalf of a recipient. The sender never drives the
    /// status of its own message.
    pub async fn advance_status(
        &self,
        session: &Session,
        message_id: MessageId,
        to: MessageStatus,
    ) -> Result<Message> {
        let caller = session.identity()?;
        let current = msg::get(&self.db_pool, message_id).await?;
        access::require_member(&self.db_pool, current.room_id, caller).await?;
        if current.user_id == caller {
            return Err(ChatError::Unauthorized);
        }

        let updated = receipts::advance(&self.db_pool, &current, to, now_millis()).await?;
        self.notifier.publish(ChangeEvent::MessageUpdated(updated.clone()));
        Ok(updated)
    }

    pub async fn set_typing(
        &self,
        session: &Session,
        room_id: RoomId,
        user: Identity,
        is_typing: bool,
    ) -> Result<Membership> {
        let caller = session.identity()?;
        access::require_self(caller, user)?;
        access::require_member(&self.db_pool, room_id, caller).await?;

        let membership = members::set_typing(&self.db_pool, room_id, user, is_typing).await?;
        self.notifier.publish(ChangeEvent::MembershipUpdated(membership.clone()));
        Ok(membership)
    }

    pub async fn subscribe(&self, session: &Session, room_id: RoomId) -> Result<Subscription> {
        let caller = session.identity()?;
        access::require_member(&self.db_pool, room_id, caller).await?;
        info!("{caller} subscribed to room {room_id}");
        Ok(Subscription::open(&self.notifier, self.db_pool.clone(), session.clone(), room_id))
    }

    pub async fn subscribe_with<F>(&self, session: &Session, room_id: RoomId, handler: F) -> Result<SubscriptionHandle>
    where
        F: FnMut(Result<Notification>) + Send + 'static,
    {
        let subscription = self.subscribe(session, room_id).await?;
        Ok(SubscriptionHandle::spawn(subscription, handler))
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        subscription.unsubscribe();
    }
}
