use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::{
    db::{now_millis, Identity, Room, RoomId},
    error::{ChatError, Result},
    profiles,
};

/// Canonical key of an unordered participant pair.
pub(crate) fn pair_key(a: Identity, b: Identity) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

/// Returns the one 1:1 room shared by `a` and `b`, creating it (with `a` as creator)
/// when none exists yet.
///
/// The room insert is an insert-if-absent on the unique pair key, and it runs as the
/// first statement of the transaction so the write lock is taken before anything is
/// read. Concurrent callers for the same pair, in either order, all read back the row
/// that won the insert.
pub async fn get_or_create_room(db_pool: &SqlitePool, a: Identity, b: Identity) -> Result<Room> {
    if a == b {
        return Err(ChatError::invalid("a private room needs two distinct participants"));
    }
    if !profiles::exist(db_pool, a, b).await? {
        return Err(ChatError::NotFound("identity"));
    }

    let key = pair_key(a, b);
    let now = now_millis();

    let mut tx = db_pool.begin().await?;

    let created = sqlx::query(
        "INSERT INTO rooms (id,name,is_group,pair_key,created_by,last_message_at,created_at)
         VALUES (?,NULL,0,?,?,?,?)
         ON CONFLICT(pair_key) DO NOTHING",
    )
    .bind(Uuid::now_v7().to_string())
    .bind(&key)
    .bind(a.to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;

    let room: Room = sqlx::query_as("SELECT * FROM rooms WHERE pair_key=?")
        .bind(&key)
        .fetch_one(&mut *tx)
        .await?;

    if created {
        for user_id in [a, b] {
            sqlx::query("INSERT INTO memberships (room_id,user_id,joined_at,is_typing) VALUES (?,?,?,0)")
                .bind(room.id.to_string())
                .bind(user_id.to_string())
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;

    if created {
        info!("created room {} for {a} and {b}", room.id);
    }
    Ok(room)
}

pub async fn get_room(db_pool: &SqlitePool, room_id: RoomId) -> Result<Room> {
    sqlx::query_as("SELECT * FROM rooms WHERE id=?")
        .bind(room_id.to_string())
        .fetch_optional(db_pool)
        .await?
        .ok_or(ChatError::NotFound("room"))
}

/// Rooms the user belongs to, most recently active first.
pub async fn list_rooms(db_pool: &SqlitePool, user_id: Identity) -> Result<Vec<Room>> {
    Ok(sqlx::query_as(
        "SELECT rooms.* FROM rooms
         JOIN memberships ON memberships.room_id = rooms.id
         WHERE memberships.user_id=?
         ORDER BY rooms.last_message_at DESC, rooms.created_at DESC",
    )
    .bind(user_id.to_string())
    .fetch_all(db_pool)
    .await?)
}
