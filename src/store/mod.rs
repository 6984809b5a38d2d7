//! Record store for rooms, memberships, characters, combats and maps
//!
//! A thin CRUD layer over SQLite. Each method is a single statement or a
//! single transaction; callers needing more than per-record atomicity
//! serialize access themselves.

mod characters;
mod combat;
mod maps;
mod rooms;

pub use characters::{Character, CharacterPatch, NewCharacter};
pub use maps::{GameMap, MapToken, NewMap, NewToken, TokenMove};
pub use rooms::{JoinOutcome, Player, Room, GM_NAME};

use sqlx::SqlitePool;

/// Store result type
pub type StoreResult<T> = Result<T, sqlx::Error>;

/// Database-backed record store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new store with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
