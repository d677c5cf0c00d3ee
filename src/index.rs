use axum::{debug_handler, extract::State, Json};
use tower_sessions::Session;

use crate::{auth::{self, Sessions}, db::Room, service::ChatService, AppResult, AppState};

/// The signed-in user's rooms, most recently active first.
#[debug_handler(state = AppState)]
pub async fn index(
    State(chat): State<ChatService>,
    State(sessions): State<Sessions>,
    session: Session,
) -> AppResult<Json<Vec<Room>>> {
    let caller = auth::signed_in(&session, &sessions).await?;
    let user_id = caller.identity()?;
    Ok(Json(chat.list_rooms(&caller, user_id).await?))
}
