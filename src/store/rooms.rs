//! Rooms and room memberships

use rand::Rng;
use serde::Serialize;

use super::{is_unique_violation, new_id, now, Store, StoreResult};
use crate::auth::generate_token;

const ROOM_CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_ATTEMPTS: usize = 8;

/// Default name of the membership created with a room
pub const GM_NAME: &str = "Game Master";

/// A shared game room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Room {
    pub id: String,
    pub code: String,
    pub is_active: bool,
    pub session_started: bool,
    pub created_at: String,
}

/// A room membership, identified by an opaque token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Player {
    pub id: String,
    pub room_id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub is_gm: bool,
    pub is_ready: bool,
    pub can_move: bool,
    pub left_at: Option<String>,
}

const PLAYER_COLUMNS: &str = "id, room_id, name, token, is_gm, is_ready, can_move, left_at";

fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_CHARS[rng.random_range(0..ROOM_CODE_CHARS.len())] as char)
        .collect()
}

impl Store {
    /// Create a room with its game-master membership
    pub async fn create_room(&self, gm_name: &str) -> StoreResult<(Room, Player)> {
        let mut attempt = 0;
        let room = loop {
            let room = Room {
                id: new_id(),
                code: generate_room_code(),
                is_active: true,
                session_started: false,
                created_at: now(),
            };

            let inserted = sqlx::query(
                "INSERT INTO rooms (id, code, is_active, session_started, created_at) VALUES (?, ?, 1, 0, ?)",
            )
            .bind(&room.id)
            .bind(&room.code)
            .bind(&room.created_at)
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(_) => break room,
                Err(e) if is_unique_violation(&e) && attempt + 1 < ROOM_CODE_ATTEMPTS => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let gm = self.insert_player(&room.id, gm_name, true).await?;
        Ok((room, gm))
    }

    /// Join an active room by code (case-insensitive).
    ///
    /// Names are unique within a room; a taken name is reported as
    /// [`JoinOutcome::NameTaken`] rather than an error.
    pub async fn join_room(&self, code: &str, name: &str) -> StoreResult<JoinOutcome> {
        let room: Option<Room> = sqlx::query_as(
            "SELECT id, code, is_active, session_started, created_at FROM rooms WHERE code = ? AND is_active = 1",
        )
        .bind(code.trim().to_uppercase())
        .fetch_optional(&self.pool)
        .await?;

        let Some(room) = room else {
            return Ok(JoinOutcome::RoomNotFound);
        };

        let taken: Option<(String,)> =
            sqlx::query_as("SELECT id FROM players WHERE room_id = ? AND name = ?")
                .bind(&room.id)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        if taken.is_some() {
            return Ok(JoinOutcome::NameTaken);
        }

        let player = self.insert_player(&room.id, name, false).await?;
        Ok(JoinOutcome::Joined(room, player))
    }

    async fn insert_player(&self, room_id: &str, name: &str, is_gm: bool) -> StoreResult<Player> {
        let player = Player {
            id: new_id(),
            room_id: room_id.to_string(),
            name: name.to_string(),
            token: generate_token(),
            is_gm,
            is_ready: false,
            can_move: false,
            left_at: None,
        };

        sqlx::query(
            "INSERT INTO players (id, room_id, name, token, is_gm, is_ready, can_move) VALUES (?, ?, ?, ?, ?, 0, 0)",
        )
        .bind(&player.id)
        .bind(&player.room_id)
        .bind(&player.name)
        .bind(&player.token)
        .bind(player.is_gm)
        .execute(&self.pool)
        .await?;

        Ok(player)
    }

    /// Get a room by ID
    pub async fn room(&self, room_id: &str) -> StoreResult<Option<Room>> {
        sqlx::query_as(
            "SELECT id, code, is_active, session_started, created_at FROM rooms WHERE id = ?",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Resolve an identity token to its membership
    pub async fn player_by_token(&self, token: &str) -> StoreResult<Option<Player>> {
        sqlx::query_as(&format!("SELECT {PLAYER_COLUMNS} FROM players WHERE token = ?"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await
    }

    /// Get a membership by ID
    pub async fn player(&self, player_id: &str) -> StoreResult<Option<Player>> {
        sqlx::query_as(&format!("SELECT {PLAYER_COLUMNS} FROM players WHERE id = ?"))
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// All memberships of a room in join order
    pub async fn room_players(&self, room_id: &str) -> StoreResult<Vec<Player>> {
        sqlx::query_as(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players WHERE room_id = ? ORDER BY rowid"
        ))
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
    }

    /// The game master of a room
    pub async fn room_gm(&self, room_id: &str) -> StoreResult<Option<Player>> {
        sqlx::query_as(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players WHERE room_id = ? AND is_gm = 1 LIMIT 1"
        ))
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Mark a membership as left. Returns false if already left or unknown.
    pub async fn mark_left(&self, token: &str) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE players SET left_at = ? WHERE token = ? AND left_at IS NULL")
            .bind(now())
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear the left marker. Returns true if the membership had left.
    pub async fn reactivate(&self, token: &str) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE players SET left_at = NULL WHERE token = ? AND left_at IS NOT NULL")
                .bind(token)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set a player's ready flag
    pub async fn set_ready(&self, player_id: &str, ready: bool) -> StoreResult<()> {
        sqlx::query("UPDATE players SET is_ready = ? WHERE id = ?")
            .bind(ready)
            .bind(player_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set a player's token-movement permission
    pub async fn set_can_move(&self, player_id: &str, allowed: bool) -> StoreResult<()> {
        sqlx::query("UPDATE players SET can_move = ? WHERE id = ?")
            .bind(allowed)
            .bind(player_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Flag a room's session as started
    pub async fn start_session(&self, room_id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE rooms SET session_started = 1 WHERE id = ?")
            .bind(room_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Result of a join attempt
#[derive(Debug)]
pub enum JoinOutcome {
    Joined(Room, Player),
    RoomNotFound,
    NameTaken,
}
