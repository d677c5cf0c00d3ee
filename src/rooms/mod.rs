pub mod directory;
pub mod members;
pub mod msg;
pub mod notify;
pub mod receipts;

mod new;
mod room;
mod ws;

use axum::{routing::{get, post, put}, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/direct", post(new::direct_room))
        .route("/{uuid}", get(room::room))
        .route("/{uuid}/messages", get(room::messages).post(room::send))
        .route("/{uuid}/read", post(room::read))
        .route("/{uuid}/typing", put(room::typing))
        .route("/{uuid}/ws", get(ws::room_ws))
}
