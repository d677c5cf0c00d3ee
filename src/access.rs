//! Authorization predicates evaluated on every read, write and fan-out.
//!
//! Every predicate bottoms out in [`members::is_member`], a direct existence check on the
//! membership table. Nothing here consults another policy to decide membership.

use sqlx::{Executor, Sqlite};

use crate::{
    db::{Identity, RoomId},
    error::{ChatError, Result},
    rooms::members,
};

/// Room read/write: the caller belongs to the room. A room that does not exist is
/// indistinguishable from one the caller is not in.
pub async fn require_member<'e, E>(executor: E, room_id: RoomId, caller: Identity) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    if members::is_member(executor, room_id, caller).await? {
        Ok(())
    } else {
        Err(ChatError::Unauthorized)
    }
}

/// The caller acts as itself: message sender, typing flag owner, room lister.
pub fn require_self(caller: Identity, declared: Identity) -> Result<()> {
    if caller == declared {
        Ok(())
    } else {
        Err(ChatError::Unauthorized)
    }
}

/// Message write: the caller is the declared sender and a member of the room.
pub async fn require_sender<'e, E>(
    executor: E,
    room_id: RoomId,
    caller: Identity,
    sender: Identity,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    require_self(caller, sender)?;
    require_member(executor, room_id, caller).await
}

/// Room creation: the caller is the declared creator.
pub fn require_creator(caller: Identity, created_by: Identity) -> Result<()> {
    require_self(caller, created_by)
}
