//! Battle maps and the tokens placed on them

use serde::{Deserialize, Serialize};

use super::{new_id, Store, StoreResult};

/// A battle map belonging to a room
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct GameMap {
    pub id: String,
    pub room_id: String,
    pub name: String,
    pub background_url: Option<String>,
    pub width: i32,
    pub height: i32,
    pub grid_scale: i32,
    pub is_active: bool,
}

/// A token placed on a map, optionally linked to a character
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct MapToken {
    pub id: String,
    pub map_id: String,
    pub character_id: Option<String>,
    pub kind: String,
    pub x: f64,
    pub y: f64,
    pub label: Option<String>,
    pub color: Option<String>,
}

fn default_width() -> i32 {
    1920
}

fn default_height() -> i32 {
    1080
}

fn default_grid_scale() -> i32 {
    50
}

fn default_kind() -> String {
    "character".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMap {
    pub name: String,
    #[serde(default)]
    pub background_url: Option<String>,
    #[serde(default = "default_width")]
    pub width: i32,
    #[serde(default = "default_height")]
    pub height: i32,
    #[serde(default = "default_grid_scale")]
    pub grid_scale: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewToken {
    #[serde(default)]
    pub character_id: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// New position for a token
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenMove {
    pub x: f64,
    pub y: f64,
}

const MAP_COLUMNS: &str =
    "id, room_id, name, background_url, width, height, grid_scale, is_active";
const TOKEN_COLUMNS: &str = "id, map_id, character_id, kind, x, y, label, color";

impl Store {
    pub async fn create_map(&self, room_id: &str, fields: &NewMap) -> StoreResult<GameMap> {
        let map = GameMap {
            id: new_id(),
            room_id: room_id.to_string(),
            name: fields.name.clone(),
            background_url: fields.background_url.clone(),
            width: fields.width,
            height: fields.height,
            grid_scale: fields.grid_scale,
            is_active: false,
        };

        sqlx::query(
            "INSERT INTO maps (id, room_id, name, background_url, width, height, grid_scale, is_active) VALUES (?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&map.id)
        .bind(&map.room_id)
        .bind(&map.name)
        .bind(&map.background_url)
        .bind(map.width)
        .bind(map.height)
        .bind(map.grid_scale)
        .execute(&self.pool)
        .await?;

        Ok(map)
    }

    pub async fn map(&self, map_id: &str) -> StoreResult<Option<GameMap>> {
        sqlx::query_as(&format!("SELECT {MAP_COLUMNS} FROM maps WHERE id = ?"))
            .bind(map_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Make one map the room's active map; all others are deactivated
    pub async fn set_active_map(&self, room_id: &str, map_id: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE maps SET is_active = 0 WHERE room_id = ?")
            .bind(room_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE maps SET is_active = 1 WHERE id = ? AND room_id = ?")
            .bind(map_id)
            .bind(room_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    pub async fn add_token(&self, map_id: &str, fields: &NewToken) -> StoreResult<MapToken> {
        let token = MapToken {
            id: new_id(),
            map_id: map_id.to_string(),
            character_id: fields.character_id.clone(),
            kind: fields.kind.clone(),
            x: fields.x,
            y: fields.y,
            label: fields.label.clone(),
            color: fields.color.clone(),
        };

        sqlx::query(
            "INSERT INTO map_tokens (id, map_id, character_id, kind, x, y, label, color) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&token.id)
        .bind(&token.map_id)
        .bind(&token.character_id)
        .bind(&token.kind)
        .bind(token.x)
        .bind(token.y)
        .bind(&token.label)
        .bind(&token.color)
        .execute(&self.pool)
        .await?;

        Ok(token)
    }

    pub async fn token(&self, token_id: &str) -> StoreResult<Option<MapToken>> {
        sqlx::query_as(&format!("SELECT {TOKEN_COLUMNS} FROM map_tokens WHERE id = ?"))
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn move_token(&self, token_id: &str, to: TokenMove) -> StoreResult<()> {
        sqlx::query("UPDATE map_tokens SET x = ?, y = ? WHERE id = ?")
            .bind(to.x)
            .bind(to.y)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a token. Returns false if it did not exist.
    pub async fn delete_token(&self, token_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM map_tokens WHERE id = ?")
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
