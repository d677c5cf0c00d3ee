//! The client half of a room: a reconciled local view plus the receipt policy that
//! decides when to mark messages delivered or read.

mod typing;
mod view;

use std::time::Duration;

use tracing::{debug, info};

pub use typing::{TypingDebouncer, DEFAULT_WINDOW};
pub use view::{RoomView, MATCH_WINDOW_MS};

use crate::{
    db::{now_millis, Identity, Message, RoomId},
    error::{ChatError, Result},
    rooms::notify::{ChangeEvent, Notification, Subscription},
    service::ChatService,
    session::Session,
};

/// A send that did not make it. `draft` is the text the user typed, to be put back
/// into the input.
#[derive(Debug)]
pub struct SendFailure {
    pub draft: String,
    pub error: ChatError,
}

pub struct RoomClient {
    chat: ChatService,
    session: Session,
    me: Identity,
    view: RoomView,
    subscription: Subscription,
    typing: TypingDebouncer,
}

impl RoomClient {
    /// Opens a room: subscribes first, then fetches the snapshot, so nothing committed in
    /// between is missed. An open room that is visible marks its messages read.
    pub async fn open(chat: ChatService, session: Session, room_id: RoomId, visible: bool) -> Result<Self> {
        Self::open_with_window(chat, session, room_id, visible, DEFAULT_WINDOW).await
    }

    pub async fn open_with_window(
        chat: ChatService,
        session: Session,
        room_id: RoomId,
        visible: bool,
        typing_window: Duration,
    ) -> Result<Self> {
        let me = session.identity()?;
        let subscription = chat.subscribe(&session, room_id).await?;

        let typing = {
            let (chat, session) = (chat.clone(), session.clone());
            TypingDebouncer::spawn(typing_window, move |is_typing| {
                let (chat, session) = (chat.clone(), session.clone());
                async move {
                    chat.set_typing(&session, room_id, me, is_typing).await?;
                    Ok(())
                }
            })
        };

        let mut client = Self {
            chat,
            session,
            me,
            view: RoomView::new(room_id, me),
            subscription,
            typing,
        };
        client.resync().await?;
        client.set_visible(visible).await?;
        Ok(client)
    }

    pub fn view(&self) -> &RoomView {
        &self.view
    }

    pub fn room_id(&self) -> RoomId {
        self.view.room_id()
    }

    /// Full re-fetch of the room.
    pub async fn resync(&mut self) -> Result<()> {
        let snapshot = self.chat.room_snapshot(&self.session, self.room_id()).await?;
        self.view.load(snapshot);
        if self.view.is_visible() {
            self.read_all().await?;
        }
        Ok(())
    }

    /// Re-establishes the subscription after a dropped connection, then re-fetches.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.subscription = self.chat.subscribe(&self.session, self.room_id()).await?;
        info!("resubscribed to room {}", self.room_id());
        self.resync().await
    }

    async fn read_all(&mut self) -> Result<()> {
        for message in self.chat.mark_read(&self.session, self.room_id(), self.me).await? {
            self.view.upsert(message);
        }
        Ok(())
    }

    /// Foreground/background switch. Coming back to the foreground marks everything read;
    /// nothing is marked read while hidden.
    pub async fn set_visible(&mut self, visible: bool) -> Result<()> {
        if self.view.set_visible(visible) {
            self.read_all().await?;
        }
        Ok(())
    }

    pub fn set_typing(&self, is_typing: bool) {
        self.typing.set(is_typing);
    }

    pub async fn send(&mut self, content: &str) -> std::result::Result<Message, SendFailure> {
        let client_ref = self.view.begin_send(content, now_millis());
        match self
            .chat
            .send_message(&self.session, self.room_id(), self.me, content, Some(client_ref))
            .await
        {
            Ok(message) => {
                self.view.upsert(message.clone());
                Ok(message)
            }
            Err(error) => {
                let draft = self.view.fail_send(client_ref).unwrap_or_else(|| content.to_owned());
                Err(SendFailure { draft, error })
            }
        }
    }

    /// Waits for the next notification and folds it into the view, applying the
    /// receipt policy to messages from others. Returns the event that was applied, or
    /// `None` after a resync.
    pub async fn next(&mut self) -> Result<Option<ChangeEvent>> {
        let event = match self.subscription.recv().await? {
            Notification::Resync { missed } => {
                debug!("resyncing room {} after {missed} missed events", self.room_id());
                self.resync().await?;
                return Ok(None);
            }
            Notification::Change(event) => event,
        };

        self.view.apply(&event);
        if let ChangeEvent::MessageInserted(message) = &event {
            if message.user_id != self.me {
                let updated = if self.view.is_visible() {
                    self.chat.mark_read(&self.session, self.room_id(), self.me).await?
                } else {
                    self.chat.mark_delivered(&self.session, self.room_id(), self.me).await?
                };
                for message in updated {
                    self.view.upsert(message);
                }
            }
        }
        Ok(Some(event))
    }
}
