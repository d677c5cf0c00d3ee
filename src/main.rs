use std::time::Duration;

use anyhow::Context;
use townsquare::{auth::{Sessions, SignInKey}, config::DEFAULT_LOG_FILTER, db, AppState, ChatService, Config, Notifier};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    let config = Config::load()?;

    let db_pool = db::connect(&config.database_url, config.db_max_connections)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    info!("database ready at {}", config.database_url);

    let chat = ChatService::new(db_pool, Notifier::new(config.notifier_capacity), config.message_page_limit);
    let sign_in = SignInKey::new(config.session_secret.as_deref(), &config.session_issuer);
    if !sign_in.is_configured() {
        warn!("SESSION_SECRET not set, nobody can sign in");
    }
    let sessions = Sessions::new(config.session_idle());
    sessions.spawn_sweeper(Duration::from_secs(60));

    let app_state = AppState {
        chat,
        sessions,
        sign_in,
    };

    let app = townsquare::app(app_state, &config);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!("listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
