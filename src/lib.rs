pub mod access;
pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod index;
pub mod profiles;
pub mod rooms;
pub mod service;
pub mod session;

use axum::{
    extract::FromRef,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

pub use config::Config;
pub use error::{ChatError, Result};
pub use rooms::notify::{ChangeEvent, Notification, Notifier, Subscription, SubscriptionHandle};
pub use service::{ChatService, RoomSnapshot};
pub use session::Session;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub chat: ChatService,
    pub sessions: auth::Sessions,
    pub sign_in: auth::SignInKey,
}

pub fn app(state: AppState, config: &Config) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(config.session_idle_minutes)));

    let mut router = Router::new()
        .route("/", get(index::index))
        .merge(auth::router())
        .nest("/r", rooms::router())
        .nest("/p", profiles::router())
        .with_state(state)
        .layer(session_layer);

    if let Some(origin) = &config.cors_origin {
        if let Ok(origin) = HeaderValue::from_str(origin) {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(origin)
                    .allow_credentials(true)
                    .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                    .allow_headers([header::CONTENT_TYPE]),
            );
        }
    }
    router
}

pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("session store: {0}")]
    Session(#[from] tower_sessions::session::Error),

    #[error("not signed in")]
    SignedOut,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Chat(ChatError::InvalidArgument(_)) => StatusCode::BAD_REQUEST,
            AppError::Chat(ChatError::Unauthorized) => StatusCode::FORBIDDEN,
            AppError::Chat(ChatError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Chat(ChatError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Chat(ChatError::Storage(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Chat(ChatError::Transport(_)) => StatusCode::BAD_GATEWAY,
            AppError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::SignedOut => StatusCode::UNAUTHORIZED,
        };

        if status.is_server_error() {
            tracing::error!("{self}");
        }

        let body = match &self {
            // storage details stay in the log
            AppError::Chat(ChatError::Storage(_)) => "storage unavailable".to_owned(),
            AppError::Session(_) => "session unavailable".to_owned(),
            _ => self.to_string(),
        };
        (status, body).into_response()
    }
}
