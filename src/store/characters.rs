//! Character records

use serde::{Deserialize, Serialize};

use super::{new_id, now, Store, StoreResult};

/// A character sheet owned by one room membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Character {
    pub id: String,
    pub player_id: String,
    pub name: String,
    pub class_name: Option<String>,
    pub level: i32,
    pub strength: i32,
    pub dexterity: i32,
    pub constitution: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub charisma: i32,
    pub max_hp: i32,
    pub current_hp: i32,
}

const CHARACTER_COLUMNS: &str = "c.id, c.player_id, c.name, c.class_name, c.level, \
    c.strength, c.dexterity, c.constitution, c.intelligence, c.wisdom, c.charisma, \
    c.max_hp, c.current_hp";

fn default_level() -> i32 {
    1
}

fn default_ability() -> i32 {
    10
}

fn default_hp() -> i32 {
    10
}

/// Fields for a new character
#[derive(Debug, Clone, Deserialize)]
pub struct NewCharacter {
    pub name: String,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default = "default_level")]
    pub level: i32,
    #[serde(default = "default_ability")]
    pub strength: i32,
    #[serde(default = "default_ability")]
    pub dexterity: i32,
    #[serde(default = "default_ability")]
    pub constitution: i32,
    #[serde(default = "default_ability")]
    pub intelligence: i32,
    #[serde(default = "default_ability")]
    pub wisdom: i32,
    #[serde(default = "default_ability")]
    pub charisma: i32,
    #[serde(default = "default_hp")]
    pub max_hp: i32,
    /// Starts at `max_hp` when omitted
    #[serde(default)]
    pub current_hp: Option<i32>,
}

impl NewCharacter {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            class_name: None,
            level: default_level(),
            strength: default_ability(),
            dexterity: default_ability(),
            constitution: default_ability(),
            intelligence: default_ability(),
            wisdom: default_ability(),
            charisma: default_ability(),
            max_hp: default_hp(),
            current_hp: None,
        }
    }
}

/// Partial update of a character. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CharacterPatch {
    pub name: Option<String>,
    pub class_name: Option<String>,
    pub level: Option<i32>,
    pub strength: Option<i32>,
    pub dexterity: Option<i32>,
    pub constitution: Option<i32>,
    pub intelligence: Option<i32>,
    pub wisdom: Option<i32>,
    pub charisma: Option<i32>,
    pub max_hp: Option<i32>,
    pub current_hp: Option<i32>,
}

impl CharacterPatch {
    /// Apply the patch in place and return the resulting HP change.
    ///
    /// Current HP always ends up within `[0, max_hp]`, including when only
    /// `max_hp` was lowered.
    pub fn apply(&self, character: &mut Character) -> i32 {
        let before = character.current_hp;

        if let Some(name) = &self.name {
            character.name = name.clone();
        }
        if let Some(class_name) = &self.class_name {
            character.class_name = Some(class_name.clone());
        }

        let scalars = [
            (self.level, &mut character.level),
            (self.strength, &mut character.strength),
            (self.dexterity, &mut character.dexterity),
            (self.constitution, &mut character.constitution),
            (self.intelligence, &mut character.intelligence),
            (self.wisdom, &mut character.wisdom),
            (self.charisma, &mut character.charisma),
            (self.max_hp, &mut character.max_hp),
            (self.current_hp, &mut character.current_hp),
        ];
        for (value, field) in scalars {
            if let Some(value) = value {
                *field = value;
            }
        }

        character.max_hp = character.max_hp.max(0);
        character.current_hp = character.current_hp.clamp(0, character.max_hp);
        character.current_hp - before
    }
}

impl Store {
    /// Create a character owned by `player_id`
    pub async fn create_character(
        &self,
        player_id: &str,
        fields: &NewCharacter,
    ) -> StoreResult<Character> {
        let max_hp = fields.max_hp.max(0);
        let character = Character {
            id: new_id(),
            player_id: player_id.to_string(),
            name: fields.name.clone(),
            class_name: fields.class_name.clone(),
            level: fields.level,
            strength: fields.strength,
            dexterity: fields.dexterity,
            constitution: fields.constitution,
            intelligence: fields.intelligence,
            wisdom: fields.wisdom,
            charisma: fields.charisma,
            max_hp,
            current_hp: fields.current_hp.unwrap_or(max_hp).clamp(0, max_hp),
        };

        sqlx::query(
            r#"
            INSERT INTO characters (id, player_id, name, class_name, level, strength, dexterity,
                constitution, intelligence, wisdom, charisma, max_hp, current_hp, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&character.id)
        .bind(&character.player_id)
        .bind(&character.name)
        .bind(&character.class_name)
        .bind(character.level)
        .bind(character.strength)
        .bind(character.dexterity)
        .bind(character.constitution)
        .bind(character.intelligence)
        .bind(character.wisdom)
        .bind(character.charisma)
        .bind(character.max_hp)
        .bind(character.current_hp)
        .bind(now())
        .execute(&self.pool)
        .await?;

        Ok(character)
    }

    /// Get a character by ID
    pub async fn character(&self, character_id: &str) -> StoreResult<Option<Character>> {
        sqlx::query_as(&format!(
            "SELECT {CHARACTER_COLUMNS} FROM characters c WHERE c.id = ?"
        ))
        .bind(character_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Get a character only if its owner belongs to `room_id`
    pub async fn character_in_room(
        &self,
        character_id: &str,
        room_id: &str,
    ) -> StoreResult<Option<Character>> {
        sqlx::query_as(&format!(
            "SELECT {CHARACTER_COLUMNS} FROM characters c \
             JOIN players p ON p.id = c.player_id \
             WHERE c.id = ? AND p.room_id = ?"
        ))
        .bind(character_id)
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Characters owned by one membership, oldest first
    pub async fn characters_for_player(&self, player_id: &str) -> StoreResult<Vec<Character>> {
        sqlx::query_as(&format!(
            "SELECT {CHARACTER_COLUMNS} FROM characters c WHERE c.player_id = ? ORDER BY c.rowid"
        ))
        .bind(player_id)
        .fetch_all(&self.pool)
        .await
    }

    /// All characters in a room, oldest first
    pub async fn room_characters(&self, room_id: &str) -> StoreResult<Vec<Character>> {
        sqlx::query_as(&format!(
            "SELECT {CHARACTER_COLUMNS} FROM characters c \
             JOIN players p ON p.id = c.player_id \
             WHERE p.room_id = ? ORDER BY c.rowid"
        ))
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Characters owned by the room's game master
    pub async fn npc_characters(&self, room_id: &str) -> StoreResult<Vec<Character>> {
        sqlx::query_as(&format!(
            "SELECT {CHARACTER_COLUMNS} FROM characters c \
             JOIN players p ON p.id = c.player_id \
             WHERE p.room_id = ? AND p.is_gm = 1 ORDER BY c.rowid"
        ))
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Persist every field of a character
    pub async fn update_character(&self, character: &Character) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE characters SET name = ?, class_name = ?, level = ?, strength = ?,
                dexterity = ?, constitution = ?, intelligence = ?, wisdom = ?, charisma = ?,
                max_hp = ?, current_hp = ?
            WHERE id = ?
            "#,
        )
        .bind(&character.name)
        .bind(&character.class_name)
        .bind(character.level)
        .bind(character.strength)
        .bind(character.dexterity)
        .bind(character.constitution)
        .bind(character.intelligence)
        .bind(character.wisdom)
        .bind(character.charisma)
        .bind(character.max_hp)
        .bind(character.current_hp)
        .bind(&character.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a character. Returns false if it did not exist.
    pub async fn delete_character(&self, character_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM characters WHERE id = ?")
            .bind(character_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_utils::test_store;
    use crate::store::{JoinOutcome, GM_NAME};

    use super::*;

    #[test]
    fn test_patch_clamps_hp() {
        let mut hero = Character {
            id: "c1".into(),
            player_id: "p1".into(),
            name: "Hero".into(),
            class_name: None,
            level: 1,
            strength: 10,
            dexterity: 10,
            constitution: 10,
            intelligence: 10,
            wisdom: 10,
            charisma: 10,
            max_hp: 20,
            current_hp: 15,
        };

        let delta = CharacterPatch {
            current_hp: Some(50),
            ..Default::default()
        }
        .apply(&mut hero);
        assert_eq!(hero.current_hp, 20);
        assert_eq!(delta, 5);

        let delta = CharacterPatch {
            current_hp: Some(-4),
            ..Default::default()
        }
        .apply(&mut hero);
        assert_eq!(hero.current_hp, 0);
        assert_eq!(delta, -20);

        let delta = CharacterPatch {
            name: Some("Renamed".into()),
            level: Some(3),
            ..Default::default()
        }
        .apply(&mut hero);
        assert_eq!(delta, 0);
        assert_eq!(hero.name, "Renamed");
        assert_eq!(hero.level, 3);
    }

    #[test]
    fn test_lowering_max_hp_clamps_current() {
        let mut hero = Character {
            id: "c1".into(),
            player_id: "p1".into(),
            name: "Hero".into(),
            class_name: None,
            level: 1,
            strength: 10,
            dexterity: 10,
            constitution: 10,
            intelligence: 10,
            wisdom: 10,
            charisma: 10,
            max_hp: 20,
            current_hp: 20,
        };
        let delta = CharacterPatch {
            max_hp: Some(8),
            ..Default::default()
        }
        .apply(&mut hero);
        assert_eq!(hero.current_hp, 8);
        assert_eq!(delta, -12);
    }

    #[test]
    fn test_new_character_defaults() {
        let fields: NewCharacter = serde_json::from_str(r#"{"name": "Pip"}"#).unwrap();
        assert_eq!(fields.level, 1);
        assert_eq!(fields.dexterity, 10);
        assert_eq!(fields.max_hp, 10);
        assert!(fields.current_hp.is_none());
    }

    #[tokio::test]
    async fn test_character_crud_and_room_scoping() {
        let store = test_store().await;
        let (room, gm) = store.create_room(GM_NAME).await.unwrap();
        let JoinOutcome::Joined(_, player) = store.join_room(&room.code, "alice").await.unwrap()
        else {
            panic!("join failed");
        };
        let (other_room, _) = store.create_room(GM_NAME).await.unwrap();

        let mut fields = NewCharacter::named("Aria");
        fields.max_hp = 12;
        let aria = store.create_character(&player.id, &fields).await.unwrap();
        assert_eq!(aria.current_hp, 12);

        let goblin = store
            .create_character(&gm.id, &NewCharacter::named("Goblin"))
            .await
            .unwrap();

        assert!(store
            .character_in_room(&aria.id, &room.id)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .character_in_room(&aria.id, &other_room.id)
            .await
            .unwrap()
            .is_none());

        let npcs = store.npc_characters(&room.id).await.unwrap();
        assert_eq!(npcs.len(), 1);
        assert_eq!(npcs[0].id, goblin.id);
        assert_eq!(store.room_characters(&room.id).await.unwrap().len(), 2);

        let mut updated = aria.clone();
        updated.current_hp = 3;
        store.update_character(&updated).await.unwrap();
        assert_eq!(
            store.character(&aria.id).await.unwrap().unwrap().current_hp,
            3
        );

        assert!(store.delete_character(&aria.id).await.unwrap());
        assert!(!store.delete_character(&aria.id).await.unwrap());
        assert!(store
            .characters_for_player(&player.id)
            .await
            .unwrap()
            .is_empty());
    }
}
