use std::collections::BTreeSet;

use uuid::Uuid;

use crate::{
    db::{Identity, Message, MessageStatus, MessageType, RoomId, Timestamp},
    rooms::notify::ChangeEvent,
    service::RoomSnapshot,
};

/// How far apart an optimistic copy and the stored row may be stamped and still be
/// treated as the same message when no `client_ref` came back.
pub const MATCH_WINDOW_MS: i64 = 5_000;

/// A client's local, reconciled picture of one room.
///
/// Confirmed messages are kept ordered by `(created_at, seq)`. Applying the same event
/// twice, or events out of order, converges to the same state, and a status never moves
/// backwards locally either.
#[derive(Debug, Clone)]
pub struct RoomView {
    room_id: RoomId,
    me: Identity,
    confirmed: Vec<Message>,
    pending: Vec<Message>,
    typing: BTreeSet<Identity>,
    visible: bool,
}

impl RoomView {
    pub fn new(room_id: RoomId, me: Identity) -> Self {
        Self {
            room_id,
            me,
            confirmed: Vec::new(),
            pending: Vec::new(),
            typing: BTreeSet::new(),
            visible: false,
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Confirmed messages in order, then the ones still being sent.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.confirmed.iter().chain(self.pending.iter())
    }

    pub fn pending(&self) -> &[Message] {
        &self.pending
    }

    pub fn typing(&self) -> &BTreeSet<Identity> {
        &self.typing
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Highest stored `seq` seen, for cursor catch-up.
    pub fn cursor(&self) -> i64 {
        self.confirmed.iter().map(|m| m.seq).max().unwrap_or(0)
    }

    /// Messages from others the user has not read yet.
    pub fn unread(&self) -> usize {
        self.confirmed
            .iter()
            .filter(|m| m.user_id != self.me && m.status < MessageStatus::Read)
            .count()
    }

    /// Returns true when the view just came to the foreground, which is when pending
    /// messages should be marked read.
    pub fn set_visible(&mut self, visible: bool) -> bool {
        let surfaced = visible && !self.visible;
        self.visible = visible;
        surfaced
    }

    /// Replaces everything with a server snapshot. Optimistic messages the snapshot
    /// already contains are dropped; the rest stay pending.
    pub fn load(&mut self, snapshot: RoomSnapshot) {
        self.confirmed.clear();
        self.typing = snapshot
            .members
            .iter()
            .filter(|m| m.is_typing && m.user_id != self.me)
            .map(|m| m.user_id)
            .collect();
        for message in snapshot.messages {
            self.upsert(message);
        }
    }

    /// Shows `content` immediately as a `sending` message and returns the correlation id
    /// to send along with it.
    pub fn begin_send(&mut self, content: &str, now: Timestamp) -> Uuid {
        let client_ref = Uuid::now_v7();
        self.pending.push(Message {
            id: client_ref,
            seq: 0,
            room_id: self.room_id,
            user_id: self.me,
            client_ref: Some(client_ref),
            content: content.to_owned(),
            message_type: MessageType::Text,
            status: MessageStatus::Sending,
            read_at: None,
            created_at: now,
        });
        client_ref
    }

    /// Drops a failed optimistic message and hands its content back as a draft.
    pub fn fail_send(&mut self, client_ref: Uuid) -> Option<String> {
        let index = self.pending.iter().position(|m| m.client_ref == Some(client_ref))?;
        Some(self.pending.remove(index).content)
    }

    pub fn apply(&mut self, event: &ChangeEvent) {
        if event.room_id() != self.room_id {
            return;
        }
        match event {
            ChangeEvent::MessageInserted(message) | ChangeEvent::MessageUpdated(message) => {
                self.upsert(message.clone())
            }
            ChangeEvent::MembershipUpdated(membership) => {
                if membership.user_id == self.me {
                    return;
                }
                if membership.is_typing {
                    self.typing.insert(membership.user_id);
                } else {
                    self.typing.remove(&membership.user_id);
                }
            }
        }
    }

    fn settle_pending(&mut self, stored: &Message) {
        if stored.user_id != self.me {
            return;
        }
        // a stored ref that matches nothing belongs to another device's send
        let index = match stored.client_ref {
            Some(r) => self.pending.iter().position(|m| m.client_ref == Some(r)),
            None => self.pending.iter().position(|m| {
                m.content == stored.content && (m.created_at - stored.created_at).abs() <= MATCH_WINDOW_MS
            }),
        };
        if let Some(index) = index {
            self.pending.remove(index);
        }
    }

    /// Inserts a stored message or merges it into the copy already held.
    pub fn upsert(&mut self, message: Message) {
        if let Some(existing) = self.confirmed.iter_mut().find(|m| m.id == message.id) {
            if message.status > existing.status {
                existing.status = message.status;
            }
            if existing.read_at.is_none() {
                existing.read_at = message.read_at;
            }
            return;
        }

        self.settle_pending(&message);
        let key = (message.created_at, message.seq);
        let at = self.confirmed.partition_point(|m| (m.created_at, m.seq) <= key);
        self.confirmed.insert(at, message);
    }
}
