use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    FromRow, Row, SqlitePool,
};
use uuid::Uuid;

use crate::error::Result;

pub type Identity = Uuid;
pub type RoomId = Uuid;
pub type MessageId = Uuid;

/// Milliseconds since the UNIX epoch, UTC.
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as Timestamp
}

pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Identity,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: Option<String>,
    pub is_group: bool,
    pub created_by: Identity,
    pub last_message_at: Timestamp,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub room_id: RoomId,
    pub user_id: Identity,
    pub joined_at: Timestamp,
    pub is_typing: bool,
}

/// Lifecycle of a message. Variants are declared in lifecycle order, so the derived
/// `Ord` is the only direction a status may move in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn rank(self) -> i64 {
        self as i64
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        use MessageStatus::*;
        match rank {
            0 => Some(Sending),
            1 => Some(Sent),
            2 => Some(Delivered),
            3 => Some(Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Storage order; breaks `created_at` ties and serves as the catch-up cursor.
    pub seq: i64,
    pub room_id: RoomId,
    pub user_id: Identity,
    pub client_ref: Option<Uuid>,
    pub content: String,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub read_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

fn decode_err(col: &str, source: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: col.to_owned(),
        source: Box::new(source),
    }
}

fn uuid_col(row: &SqliteRow, col: &str) -> std::result::Result<Uuid, sqlx::Error> {
    let raw: String = row.try_get(col)?;
    Uuid::parse_str(&raw).map_err(|e| decode_err(col, e))
}

fn opt_uuid_col(row: &SqliteRow, col: &str) -> std::result::Result<Option<Uuid>, sqlx::Error> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|raw| Uuid::parse_str(&raw).map_err(|e| decode_err(col, e)))
        .transpose()
}

#[derive(Debug, thiserror::Error)]
#[error("unknown {0}: {1}")]
struct UnknownValue(&'static str, String);

impl<'r> FromRow<'r, SqliteRow> for Profile {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: uuid_col(row, "id")?,
            display_name: row.try_get("display_name")?,
            avatar_url: row.try_get("avatar_url")?,
            phone: row.try_get("phone")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for Room {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: uuid_col(row, "id")?,
            name: row.try_get("name")?,
            is_group: row.try_get("is_group")?,
            created_by: uuid_col(row, "created_by")?,
            last_message_at: row.try_get("last_message_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for Membership {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            room_id: uuid_col(row, "room_id")?,
            user_id: uuid_col(row, "user_id")?,
            joined_at: row.try_get("joined_at")?,
            is_typing: row.try_get("is_typing")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for Message {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        let rank: i64 = row.try_get("status")?;
        let status = MessageStatus::from_rank(rank)
            .ok_or_else(|| decode_err("status", UnknownValue("status", rank.to_string())))?;

        let kind: String = row.try_get("message_type")?;
        let message_type = match kind.as_str() {
            "text" => MessageType::Text,
            _ => return Err(decode_err("message_type", UnknownValue("message type", kind))),
        };

        Ok(Self {
            id: uuid_col(row, "id")?,
            seq: row.try_get("seq")?,
            room_id: uuid_col(row, "room_id")?,
            user_id: uuid_col(row, "user_id")?,
            client_ref: opt_uuid_col(row, "client_ref")?,
            content: row.try_get("content")?,
            message_type,
            status,
            read_at: row.try_get("read_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
