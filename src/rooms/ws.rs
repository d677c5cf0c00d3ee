use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use axum::{
    debug_handler,
    extract::{ws::{Message as WsMessage, WebSocket}, Path, State, WebSocketUpgrade},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_sessions::Session;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{self, Sessions},
    db::{Identity, Message, RoomId},
    error::Result,
    rooms::notify::{ChangeEvent, Notification, Subscription},
    service::ChatService,
    session, AppResult, AppState,
};

/// Frames a client may send over the room socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Send { content: String, client_ref: Option<Uuid> },
    Typing { is_typing: bool },
    Read,
    Visibility { visible: bool },
}

/// Frames the server sends besides the change events themselves.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Ack { record: Message },
    Resync { missed: u64 },
    Error { message: String, client_ref: Option<Uuid> },
}

fn encode<T: Serialize>(frame: &T) -> Option<String> {
    serde_json::to_string(frame)
        .map_err(|e| warn!("unencodable frame: {e}"))
        .ok()
}

#[debug_handler(state = AppState)]
pub(crate) async fn room_ws(
    Path(room_id): Path<Uuid>,
    State(chat): State<ChatService>,
    State(sessions): State<Sessions>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let caller = auth::signed_in(&session, &sessions).await?;
    let me = caller.identity()?;
    let subscription = chat.subscribe(&caller, room_id).await?;

    Ok(ws.on_upgrade(move |stream| serve(stream, chat, caller, me, subscription)))
}

struct Connection {
    chat: ChatService,
    caller: session::Session,
    me: Identity,
    room_id: RoomId,
    // sockets start in the foreground; clients report when they are hidden
    visible: AtomicBool,
}

impl Connection {
    async fn apply_receipts(&self) -> Result<Vec<Message>> {
        if self.visible.load(Ordering::Acquire) {
            self.chat.mark_read(&self.caller, self.room_id, self.me).await
        } else {
            self.chat.mark_delivered(&self.caller, self.room_id, self.me).await
        }
    }

    async fn handle(&self, frame: ClientFrame) -> Option<String> {
        match frame {
            ClientFrame::Send { content, client_ref } => {
                match self.chat.send_message(&self.caller, self.room_id, self.me, &content, client_ref).await {
                    Ok(record) => encode(&ServerFrame::Ack { record }),
                    Err(e) => encode(&ServerFrame::Error { message: e.to_string(), client_ref }),
                }
            }
            ClientFrame::Typing { is_typing } => self
                .chat
                .set_typing(&self.caller, self.room_id, self.me, is_typing)
                .await
                .err()
                .and_then(|e| encode(&ServerFrame::Error { message: e.to_string(), client_ref: None })),
            ClientFrame::Read => self
                .chat
                .mark_read(&self.caller, self.room_id, self.me)
                .await
                .err()
                .and_then(|e| encode(&ServerFrame::Error { message: e.to_string(), client_ref: None })),
            ClientFrame::Visibility { visible } => {
                let was_visible = self.visible.swap(visible, Ordering::AcqRel);
                if !visible || was_visible {
                    return None;
                }
                self.chat
                    .mark_read(&self.caller, self.room_id, self.me)
                    .await
                    .err()
                    .and_then(|e| encode(&ServerFrame::Error { message: e.to_string(), client_ref: None }))
            }
        }
    }

    /// Forwards the room's events to the socket until the subscription fails.
    async fn forward(&self, mut subscription: Subscription, out: mpsc::Sender<String>) {
        loop {
            let frame = match subscription.recv().await {
                Ok(Notification::Change(event)) => {
                    let foreign = matches!(&event, ChangeEvent::MessageInserted(m) if m.user_id != self.me);
                    let frame = encode(&event);
                    if foreign {
                        if let Err(e) = self.apply_receipts().await {
                            warn!("receipt update in room {} failed: {e}", self.room_id);
                        }
                    }
                    frame
                }
                Ok(Notification::Resync { missed }) => encode(&ServerFrame::Resync { missed }),
                Err(e) => {
                    debug!("subscription to room {} ended: {e}", self.room_id);
                    if let Some(frame) = encode(&ServerFrame::Error { message: e.to_string(), client_ref: None }) {
                        let _ = out.send(frame).await;
                    }
                    return;
                }
            };
            if let Some(frame) = frame {
                if out.send(frame).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn serve(stream: WebSocket, chat: ChatService, caller: session::Session, me: Identity, subscription: Subscription) {
    let room_id = subscription.room_id();
    info!("{me} connected to room {room_id}");

    let connection = Arc::new(Connection {
        chat,
        caller,
        me,
        room_id,
        visible: AtomicBool::new(true),
    });

    let (mut sender, mut receiver) = stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);

    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut forward_task = {
        let connection = connection.clone();
        let out = out_tx.clone();
        tokio::spawn(async move { connection.forward(subscription, out).await })
    };

    let receive = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let frame = match msg {
                WsMessage::Close(_) => break,
                WsMessage::Text(_) | WsMessage::Binary(_) => serde_json::from_slice::<ClientFrame>(&msg.into_data()),
                _ => continue,
            };
            let reply = match frame {
                Ok(frame) => connection.handle(frame).await,
                Err(e) => encode(&ServerFrame::Error { message: format!("bad frame: {e}"), client_ref: None }),
            };
            if let Some(reply) = reply {
                if out_tx.send(reply).await.is_err() {
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = receive => forward_task.abort(),
        _ = &mut forward_task => {},
    };

    drop(out_tx);
    let _ = writer.await;
    info!("{me} disconnected from room {room_id}");
}
