use axum::{debug_handler, extract::{Path, State}, Json};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{auth::{self, Sessions}, db::Profile, service::ChatService, AppResult, AppState};

#[debug_handler(state = AppState)]
pub(crate) async fn profile(
    Path(profile_id): Path<Uuid>,
    State(chat): State<ChatService>,
    State(sessions): State<Sessions>,
    session: Session,
) -> AppResult<Json<Profile>> {
    let caller = auth::signed_in(&session, &sessions).await?;
    Ok(Json(chat.get_profile(&caller, profile_id).await?))
}
