use axum::{debug_handler, extract::{Path, Query, State}, Json};
use serde::Deserialize;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    auth::{self, Sessions},
    db::{Membership, Message},
    service::{ChatService, RoomSnapshot},
    AppResult, AppState,
};

use super::msg::SendMessageQuery;

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesQuery {
    after: Option<i64>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TypingQuery {
    is_typing: bool,
}

#[debug_handler(state = AppState)]
pub(crate) async fn room(
    State(chat): State<ChatService>,
    State(sessions): State<Sessions>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> AppResult<Json<RoomSnapshot>> {
    let caller = auth::signed_in(&session, &sessions).await?;
    Ok(Json(chat.room_snapshot(&caller, room_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn messages(
    State(chat): State<ChatService>,
    State(sessions): State<Sessions>,
    session: Session,
    Path(room_id): Path<Uuid>,
    Query(MessagesQuery { after, limit }): Query<MessagesQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let caller = auth::signed_in(&session, &sessions).await?;
    let messages = match (after, limit) {
        (None, None) => chat.list_messages(&caller, room_id).await?,
        (after, limit) => chat.list_messages_after(&caller, room_id, after.unwrap_or(0), limit).await?,
    };
    Ok(Json(messages))
}

#[debug_handler(state = AppState)]
pub(crate) async fn send(
    State(chat): State<ChatService>,
    State(sessions): State<Sessions>,
    session: Session,
    Path(room_id): Path<Uuid>,
    Json(SendMessageQuery { content, client_ref }): Json<SendMessageQuery>,
) -> AppResult<Json<Message>> {
    let caller = auth::signed_in(&session, &sessions).await?;
    let me = caller.identity()?;
    Ok(Json(chat.send_message(&caller, room_id, me, &content, client_ref).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn read(
    State(chat): State<ChatService>,
    State(sessions): State<Sessions>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> AppResult<Json<Vec<Message>>> {
    let caller = auth::signed_in(&session, &sessions).await?;
    let me = caller.identity()?;
    Ok(Json(chat.mark_read(&caller, room_id, me).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn typing(
    State(chat): State<ChatService>,
    State(sessions): State<Sessions>,
    session: Session,
    Path(room_id): Path<Uuid>,
    Json(TypingQuery { is_typing }): Json<TypingQuery>,
) -> AppResult<Json<Membership>> {
    let caller = auth::signed_in(&session, &sessions).await?;
    let me = caller.identity()?;
    Ok(Json(chat.set_typing(&caller, room_id, me, is_typing).await?))
}
