use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{db::Profile, service::ChatService, session, AppError, AppResult, AppState};

use super::{SignInKey, Sessions, SESSION_KEY};

#[derive(Deserialize)]
pub(crate) struct LoginBody {
    #[serde(default)]
    pub(crate) token: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(chat): State<ChatService>,
    State(sessions): State<Sessions>,
    State(sign_in): State<SignInKey>,
    session: Session,
    Json(LoginBody { token }): Json<LoginBody>,
) -> AppResult<Json<Profile>> {
    let Some(user_id) = token.as_deref().and_then(|token| sign_in.verify(token)) else {
        warn!("sign-in without a valid token");
        return Err(AppError::SignedOut);
    };

    let chat_session = session::Session::new(user_id);
    // only provisioned identities may hold a session
    let profile = chat.get_profile(&chat_session, user_id).await?;

    if let Some(previous) = session.get::<Uuid>(SESSION_KEY).await? {
        sessions.close(previous);
    }
    session.cycle_id().await?;

    let key = Uuid::now_v7();
    session.insert(SESSION_KEY, key).await?;
    sessions.open(key, chat_session);

    info!("welcome u/{user_id}");
    Ok(Json(profile))
}
