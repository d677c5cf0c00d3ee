use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::{
    db::{now_millis, Identity, Message, MessageId, MessageStatus, MessageType, RoomId},
    error::{ChatError, Result},
};

#[derive(Debug, Deserialize)]
pub(crate) struct SendMessageQuery {
    pub(crate) content: String,
    pub(crate) client_ref: Option<Uuid>,
}

/// Outcome of [`append`]. A retried send carrying an already stored `client_ref`
/// yields the stored row instead of a second message.
#[derive(Debug)]
pub struct Appended {
    pub message: Message,
    pub inserted: bool,
}

/// Inserts a message and bumps the room's `last_message_at` in one transaction.
///
/// The room update runs first so the write lock is held for the whole operation, and
/// the message is stamped with the bumped value, which never moves backwards. A later
/// append therefore never sorts before an earlier one in the same room.
pub async fn append(
    db_pool: &SqlitePool,
    room_id: RoomId,
    sender: Identity,
    content: &str,
    client_ref: Option<Uuid>,
) -> Result<Appended> {
    if content.trim().is_empty() {
        return Err(ChatError::invalid("message content must not be empty"));
    }

    let mut tx = db_pool.begin().await?;

    let (created_at,): (i64,) = sqlx::query_as(
        "UPDATE rooms SET last_message_at = MAX(last_message_at, ?) WHERE id=? RETURNING last_message_at",
    )
    .bind(now_millis())
    .bind(room_id.to_string())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ChatError::NotFound("room"))?;

    if let Some(client_ref) = client_ref {
        let existing: Option<Message> =
            sqlx::query_as("SELECT * FROM messages WHERE room_id=? AND user_id=? AND client_ref=?")
                .bind(room_id.to_string())
                .bind(sender.to_string())
                .bind(client_ref.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(message) = existing {
            // dropping the transaction rolls the timestamp bump back
            debug!("duplicate send {client_ref} in room {room_id}");
            return Ok(Appended { message, inserted: false });
        }
    }

    let message: Message = sqlx::query_as(
        "INSERT INTO messages (id,room_id,user_id,client_ref,content,message_type,status,created_at)
         VALUES (?,?,?,?,?,?,?,?)
         RETURNING *",
    )
    .bind(Uuid::now_v7().to_string())
    .bind(room_id.to_string())
    .bind(sender.to_string())
    .bind(client_ref.as_ref().map(Uuid::to_string))
    .bind(content)
    .bind(MessageType::Text.as_str())
    .bind(MessageStatus::Sent.rank())
    .bind(created_at)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    debug!("appended message {} to room {room_id}", message.id);
    Ok(Appended { message, inserted: true })
}

pub async fn get(db_pool: &SqlitePool, id: MessageId) -> Result<Message> {
    sqlx::query_as("SELECT * FROM messages WHERE id=?")
        .bind(id.to_string())
        .fetch_optional(db_pool)
        .await?
        .ok_or(ChatError::NotFound("message"))
}

/// The whole room log, oldest first.
pub async fn list(db_pool: &SqlitePool, room_id: RoomId) -> Result<Vec<Message>> {
    Ok(
        sqlx::query_as("SELECT * FROM messages WHERE room_id=? ORDER BY created_at, seq")
            .bind(room_id.to_string())
            .fetch_all(db_pool)
            .await?,
    )
}

/// Messages stored after the `after` cursor (a `seq`), oldest first.
pub async fn list_after(
    db_pool: &SqlitePool,
    room_id: RoomId,
    after: i64,
    limit: u32,
) -> Result<Vec<Message>> {
    Ok(sqlx::query_as(
        "SELECT * FROM messages WHERE room_id=? AND seq>? ORDER BY created_at, seq LIMIT ?",
    )
    .bind(room_id.to_string())
    .bind(after)
    .bind(limit as i64)
    .fetch_all(db_pool)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::{testing, Room}, profiles, rooms::directory};

    async fn room(pool: &SqlitePool) -> (Room, Identity, Identity) {
        let [a, b] = [Uuid::now_v7(), Uuid::now_v7()];
        for id in [a, b] {
            profiles::provision(pool, id, "neighbour", None, None).await.unwrap();
        }
        (directory::get_or_create_room(pool, a, b).await.unwrap(), a, b)
    }

    #[tokio::test]
    async fn append_bumps_room_timestamp() {
        let (pool, _dir) = testing::pool().await;
        let (room, a, _) = room(&pool).await;

        let appended = append(&pool, room.id, a, "Hi", None).await.unwrap();
        assert!(appended.inserted);
        assert_eq!(appended.message.status, MessageStatus::Sent);
        assert_eq!(appended.message.read_at, None);

        let bumped = directory::get_room(&pool, room.id).await.unwrap();
        assert_eq!(bumped.last_message_at, appended.message.created_at);
        assert!(bumped.last_message_at >= room.last_message_at);
    }

    #[tokio::test]
    async fn blank_content_is_rejected() {
        let (pool, _dir) = testing::pool().await;
        let (room, a, _) = room(&pool).await;
        assert!(matches!(append(&pool, room.id, a, " \n", None).await, Err(ChatError::InvalidArgument(_))));
        assert!(list(&pool, room.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn later_appends_never_sort_earlier() {
        let (pool, _dir) = testing::pool().await;
        let (room, a, b) = room(&pool).await;

        // a room clock from the future stands in for a wall clock stepping backwards
        let future = now_millis() + 60_000;
        sqlx::query("UPDATE rooms SET last_message_at=? WHERE id=?")
            .bind(future)
            .bind(room.id.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let mut sent = Vec::new();
        for i in 0..10 {
            let sender = if i % 2 == 0 { a } else { b };
            sent.push(append(&pool, room.id, sender, &format!("m{i}"), None).await.unwrap().message.id);
        }

        let listed = list(&pool, room.id).await.unwrap();
        assert_eq!(listed.iter().map(|m| m.id).collect::<Vec<_>>(), sent);
        assert!(listed.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert!(listed.iter().all(|m| m.created_at >= future));
    }

    #[tokio::test]
    async fn retried_client_ref_is_not_duplicated() {
        let (pool, _dir) = testing::pool().await;
        let (room, a, _) = room(&pool).await;
        let client_ref = Uuid::now_v7();

        let first = append(&pool, room.id, a, "Hi", Some(client_ref)).await.unwrap();
        let retry = append(&pool, room.id, a, "Hi", Some(client_ref)).await.unwrap();

        assert!(!retry.inserted);
        assert_eq!(retry.message, first.message);
        assert_eq!(list(&pool, room.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cursor_resumes_after_seq() {
        let (pool, _dir) = testing::pool().await;
        let (room, a, _) = room(&pool).await;
        for i in 0..5 {
            append(&pool, room.id, a, &format!("m{i}"), None).await.unwrap();
        }

        let first_page = list_after(&pool, room.id, 0, 2).await.unwrap();
        assert_eq!(first_page.len(), 2);
        let rest = list_after(&pool, room.id, first_page[1].seq, 100).await.unwrap();
        let contents: Vec<_> = rest.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn append_to_missing_room_is_not_found() {
        let (pool, _dir) = testing::pool().await;
        let (_, a, _) = room(&pool).await;
        assert!(matches!(
            append(&pool, Uuid::now_v7(), a, "Hi", None).await,
            Err(ChatError::NotFound("room"))
        ));
    }
}
