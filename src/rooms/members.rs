use std::collections::BTreeSet;

use sqlx::{Executor, Sqlite, SqlitePool};

use crate::{
    db::{Identity, Membership, RoomId},
    error::{ChatError, Result},
};

/// The authorization primitive: a single existence check against the membership table.
pub async fn is_member<'e, E>(executor: E, room_id: RoomId, user_id: Identity) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM memberships WHERE room_id=? AND user_id=?")
            .bind(room_id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(executor)
            .await?;
    Ok(row.is_some())
}

pub async fn list(db_pool: &SqlitePool, room_id: RoomId) -> Result<Vec<Membership>> {
    Ok(
        sqlx::query_as("SELECT * FROM memberships WHERE room_id=? ORDER BY joined_at, user_id")
            .bind(room_id.to_string())
            .fetch_all(db_pool)
            .await?,
    )
}

pub async fn identities(db_pool: &SqlitePool, room_id: RoomId) -> Result<BTreeSet<Identity>> {
    Ok(list(db_pool, room_id)
        .await?
        .into_iter()
        .map(|membership| membership.user_id)
        .collect())
}

/// Last write wins. Callers are expected to debounce.
pub async fn set_typing(
    db_pool: &SqlitePool,
    room_id: RoomId,
    user_id: Identity,
    is_typing: bool,
) -> Result<Membership> {
    sqlx::query_as("UPDATE memberships SET is_typing=? WHERE room_id=? AND user_id=? RETURNING *")
        .bind(is_typing)
        .bind(room_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(db_pool)
        .await?
        .ok_or(ChatError::NotFound("membership"))
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{db::testing, profiles, rooms::directory};

    #[tokio::test]
    async fn typing_flag_is_last_write_wins() {
        let (pool, _dir) = testing::pool().await;
        let [a, b] = [Uuid::now_v7(), Uuid::now_v7()];
        for id in [a, b] {
            profiles::provision(&pool, id, "neighbour", None, None).await.unwrap();
        }
        let room = directory::get_or_create_room(&pool, a, b).await.unwrap();

        assert!(set_typing(&pool, room.id, a, true).await.unwrap().is_typing);
        set_typing(&pool, room.id, a, false).await.unwrap();
        let flipped = set_typing(&pool, room.id, a, true).await.unwrap();
        assert!(flipped.is_typing);

        let members = list(&pool, room.id).await.unwrap();
        let a_row = members.iter().find(|m| m.user_id == a).unwrap();
        let b_row = members.iter().find(|m| m.user_id == b).unwrap();
        assert!(a_row.is_typing);
        assert!(!b_row.is_typing);

        assert_eq!(identities(&pool, room.id).await.unwrap(), BTreeSet::from([a, b]));
        assert!(is_member(&pool, room.id, b).await.unwrap());
        assert!(!is_member(&pool, room.id, Uuid::now_v7()).await.unwrap());
    }

    #[tokio::test]
    async fn typing_outside_room_is_not_found() {
        let (pool, _dir) = testing::pool().await;
        let err = set_typing(&pool, Uuid::now_v7(), Uuid::now_v7(), true).await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound("membership")));
    }
}
