//! Delivery and read receipts. Every update is guarded by the current status in SQL,
//! so concurrent writers can only ever move a message forward.

use sqlx::SqlitePool;
use tracing::debug;

use crate::{
    db::{Identity, Message, MessageStatus, RoomId, Timestamp},
    error::{ChatError, Result},
};

fn in_order(mut messages: Vec<Message>) -> Vec<Message> {
    messages.sort_by_key(|m| (m.created_at, m.seq));
    messages
}

/// Moves every `sent` or `delivered` message not written by `reader` to `read`.
/// Returns the messages that changed; a second call with nothing new returns none.
pub async fn mark_read(
    db_pool: &SqlitePool,
    room_id: RoomId,
    reader: Identity,
    now: Timestamp,
) -> Result<Vec<Message>> {
    let updated: Vec<Message> = sqlx::query_as(
        "UPDATE messages SET status=?, read_at=?
         WHERE room_id=? AND user_id<>? AND status IN (?,?)
         RETURNING *",
    )
    .bind(MessageStatus::Read.rank())
    .bind(now)
    .bind(room_id.to_string())
    .bind(reader.to_string())
    .bind(MessageStatus::Sent.rank())
    .bind(MessageStatus::Delivered.rank())
    .fetch_all(db_pool)
    .await?;

    if !updated.is_empty() {
        debug!("{reader} read {} messages in room {room_id}", updated.len());
    }
    Ok(in_order(updated))
}

/// Moves every `sent` message not written by `recipient` to `delivered`.
pub async fn mark_delivered(
    db_pool: &SqlitePool,
    room_id: RoomId,
    recipient: Identity,
) -> Result<Vec<Message>> {
    let updated: Vec<Message> = sqlx::query_as(
        "UPDATE messages SET status=?
         WHERE room_id=? AND user_id<>? AND status=?
         RETURNING *",
    )
    .bind(MessageStatus::Delivered.rank())
    .bind(room_id.to_string())
    .bind(recipient.to_string())
    .bind(MessageStatus::Sent.rank())
    .fetch_all(db_pool)
    .await?;

    Ok(in_order(updated))
}

/// Moves one message forward to `to`. Anything that is not strictly forward is a
/// `Conflict`, including a writer that lost a race to a newer status.
pub async fn advance(
    db_pool: &SqlitePool,
    current: &Message,
    to: MessageStatus,
    now: Timestamp,
) -> Result<Message> {
    if to == MessageStatus::Sending {
        return Err(ChatError::conflict("stored messages are already past sending"));
    }
    if to <= current.status {
        return Err(ChatError::conflict(format!(
            "status cannot move from {:?} to {:?}",
            current.status, to
        )));
    }

    let read_at = (to == MessageStatus::Read).then_some(now);
    let updated: Option<Message> = sqlx::query_as(
        "UPDATE messages SET status=?, read_at=COALESCE(?, read_at)
         WHERE id=? AND status<?
         RETURNING *",
    )
    .bind(to.rank())
    .bind(read_at)
    .bind(current.id.to_string())
    .bind(to.rank())
    .fetch_optional(db_pool)
    .await?;

    updated.ok_or_else(|| ChatError::conflict(format!("message {} already reached {:?}", current.id, to)))
}
