//! Identity/profile lookups. The chat core only stores and compares identities; the
//! profile content here is served for rendering and never interpreted.

mod page;

use axum::{routing::get, Router};
use sqlx::SqlitePool;
use tracing::info;

use crate::{
    db::{now_millis, Identity, Profile},
    error::{ChatError, Result},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{uuid}", get(page::profile))
}

/// Account provisioning hook. Re-provisioning an identity refreshes its profile fields.
pub async fn provision(
    db_pool: &SqlitePool,
    id: Identity,
    display_name: &str,
    avatar_url: Option<&str>,
    phone: Option<&str>,
) -> Result<Profile> {
    if display_name.trim().is_empty() {
        return Err(ChatError::invalid("display name must not be empty"));
    }

    let profile = sqlx::query_as(
        "INSERT INTO profiles (id,display_name,avatar_url,phone,created_at) VALUES (?,?,?,?,?)
         ON CONFLICT(id) DO UPDATE SET display_name=excluded.display_name,
             avatar_url=excluded.avatar_url, phone=excluded.phone
         RETURNING *",
    )
    .bind(id.to_string())
    .bind(display_name)
    .bind(avatar_url)
    .bind(phone)
    .bind(now_millis())
    .fetch_one(db_pool)
    .await?;

    info!("provisioned profile {id}");
    Ok(profile)
}

pub async fn find(db_pool: &SqlitePool, id: Identity) -> Result<Profile> {
    sqlx::query_as("SELECT * FROM profiles WHERE id=?")
        .bind(id.to_string())
        .fetch_optional(db_pool)
        .await?
        .ok_or(ChatError::NotFound("identity"))
}

/// Both identities exist.
pub(crate) async fn exist(db_pool: &SqlitePool, a: Identity, b: Identity) -> Result<bool> {
    let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM profiles WHERE id IN (?,?)")
        .bind(a.to_string())
        .bind(b.to_string())
        .fetch_one(db_pool)
        .await?;
    Ok(count == 2)
}
