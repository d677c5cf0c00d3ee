use axum::{debug_handler, extract::State, http::StatusCode};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{AppResult, AppState};

use super::{Sessions, SESSION_KEY};

#[debug_handler(state = AppState)]
pub(crate) async fn logout(
    State(sessions): State<Sessions>,
    session: Session,
) -> AppResult<StatusCode> {
    if let Some(key) = session.get::<Uuid>(SESSION_KEY).await? {
        sessions.close(key);
    }
    session.clear().await;
    Ok(StatusCode::NO_CONTENT)
}
