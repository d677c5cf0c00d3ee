use axum::{debug_handler, extract::State, Json};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{auth::{self, Sessions}, db::RoomId, service::ChatService, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub(crate) struct DirectRoomQuery {
    with: Uuid,
}

#[derive(Debug, Serialize)]
pub(crate) struct DirectRoom {
    room_id: RoomId,
}

#[debug_handler(state = AppState)]
pub(crate) async fn direct_room(
    State(chat): State<ChatService>,
    State(sessions): State<Sessions>,
    session: Session,

    Json(DirectRoomQuery { with }): Json<DirectRoomQuery>,
) -> AppResult<Json<DirectRoom>> {
    let caller = auth::signed_in(&session, &sessions).await?;
    let me = caller.identity()?;
    let room_id = chat.get_or_create_room(&caller, me, with).await?;
    Ok(Json(DirectRoom { room_id }))
}
