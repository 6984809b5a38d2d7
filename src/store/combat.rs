//! Combat persistence
//!
//! The in-memory [`Combat`] is the source of truth for turn order; these
//! methods load and save it whole so a mutation is never half-written.

use sqlx::{Sqlite, Transaction};

use super::{is_unique_violation, now, Store, StoreResult};
use crate::combat::{Combat, CombatParticipant, InitiativeRoll, InitiativeTag};

type ParticipantRow = (String, String, String, i32, i32, bool);
type RollRow = (String, String, Option<String>, Option<String>, i32, Option<i32>);

impl Store {
    /// Persist a new combat and its participants, deactivating any combat
    /// already active in the room.
    pub async fn create_combat(&self, combat: &Combat) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE combats SET is_active = 0 WHERE room_id = ? AND is_active = 1")
            .bind(&combat.room_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO combats (id, room_id, is_active, round_number, current_turn_id, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&combat.id)
        .bind(&combat.room_id)
        .bind(combat.is_active)
        .bind(combat.round_number)
        .bind(&combat.current_turn_id)
        .bind(now())
        .execute(&mut *tx)
        .await?;

        upsert_participants(&mut tx, combat).await?;
        tx.commit().await
    }

    /// Load the room's active combat, if any
    pub async fn active_combat(&self, room_id: &str) -> StoreResult<Option<Combat>> {
        let row: Option<(String, String, bool, i32, Option<String>)> = sqlx::query_as(
            "SELECT id, room_id, is_active, round_number, current_turn_id FROM combats WHERE room_id = ? AND is_active = 1 ORDER BY rowid DESC LIMIT 1",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, room_id, is_active, round_number, current_turn_id)) = row else {
            return Ok(None);
        };

        let rows: Vec<ParticipantRow> = sqlx::query_as(
            r#"
            SELECT cp.id, cp.character_id, ch.name, cp.initiative, cp.current_hp, cp.is_active
            FROM combat_participants cp
            JOIN characters ch ON ch.id = cp.character_id
            WHERE cp.combat_id = ?
            ORDER BY cp.position
            "#,
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;

        let participants = rows
            .into_iter()
            .map(
                |(id, character_id, character_name, initiative, current_hp, is_active)| {
                    CombatParticipant {
                        id,
                        character_id,
                        character_name,
                        initiative,
                        current_hp,
                        is_active,
                    }
                },
            )
            .collect();

        Ok(Some(Combat {
            id,
            room_id,
            is_active,
            round_number,
            current_turn_id,
            participants,
        }))
    }

    /// Write back the combat row and every participant in one transaction
    pub async fn save_combat(&self, combat: &Combat) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE combats SET is_active = ?, round_number = ?, current_turn_id = ? WHERE id = ?",
        )
        .bind(combat.is_active)
        .bind(combat.round_number)
        .bind(&combat.current_turn_id)
        .bind(&combat.id)
        .execute(&mut *tx)
        .await?;

        upsert_participants(&mut tx, combat).await?;
        tx.commit().await
    }

    /// All initiative rolls recorded for a combat, in roll order
    pub async fn initiative_rolls(&self, combat_id: &str) -> StoreResult<Vec<InitiativeRoll>> {
        let rows: Vec<RollRow> = sqlx::query_as(
            "SELECT id, combat_id, player_id, character_id, roll, natural_roll FROM initiative_rolls WHERE combat_id = ? ORDER BY rowid",
        )
        .bind(combat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, combat_id, player_id, character_id, roll, natural_roll)| {
                let tag = match (player_id, character_id) {
                    (Some(player_id), None) => InitiativeTag::Player(player_id),
                    (None, Some(character_id)) => InitiativeTag::Npc(character_id),
                    _ => return None,
                };
                Some(InitiativeRoll {
                    id,
                    combat_id,
                    tag,
                    roll,
                    natural_roll,
                })
            })
            .collect())
    }

    /// Record an initiative roll. Returns false if that player or NPC has
    /// already rolled in this combat.
    pub async fn record_initiative(&self, roll: &InitiativeRoll) -> StoreResult<bool> {
        let (player_id, character_id) = match &roll.tag {
            InitiativeTag::Player(id) => (Some(id.as_str()), None),
            InitiativeTag::Npc(id) => (None, Some(id.as_str())),
        };

        let inserted = sqlx::query(
            "INSERT INTO initiative_rolls (id, combat_id, player_id, character_id, roll, natural_roll, rolled_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&roll.id)
        .bind(&roll.combat_id)
        .bind(player_id)
        .bind(character_id)
        .bind(roll.roll)
        .bind(roll.natural_roll)
        .bind(now())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

async fn upsert_participants(
    tx: &mut Transaction<'_, Sqlite>,
    combat: &Combat,
) -> StoreResult<()> {
    for (position, p) in combat.participants.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO combat_participants (id, combat_id, character_id, position, initiative, current_hp, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                initiative = excluded.initiative,
                current_hp = excluded.current_hp,
                is_active = excluded.is_active
            "#,
        )
        .bind(&p.id)
        .bind(&combat.id)
        .bind(&p.character_id)
        .bind(position as i64)
        .bind(p.initiative)
        .bind(p.current_hp)
        .bind(p.is_active)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::db::test_utils::test_store;
    use crate::store::{NewCharacter, GM_NAME};

    use super::*;

    #[tokio::test]
    async fn test_combat_round_trip_preserves_insertion_order() {
        let store = test_store().await;
        let (room, gm) = store.create_room(GM_NAME).await.unwrap();

        let mut combat = Combat::new(&room.id);
        for (name, init) in [("a", 5), ("b", 12), ("c", 5)] {
            let c = store
                .create_character(&gm.id, &NewCharacter::named(name))
                .await
                .unwrap();
            combat.add_participant(&c, Some(init)).unwrap();
        }
        store.create_combat(&combat).await.unwrap();

        let mut loaded = store.active_combat(&room.id).await.unwrap().unwrap();
        assert_eq!(loaded, combat);

        let first = loaded.next_turn().unwrap().id.clone();
        let target = loaded.participants[0].id.clone();
        loaded.apply_damage(&target, 4).unwrap();
        store.save_combat(&loaded).await.unwrap();

        let reloaded = store.active_combat(&room.id).await.unwrap().unwrap();
        assert_eq!(reloaded.current_turn_id.as_deref(), Some(first.as_str()));
        assert_eq!(reloaded.participants[0].current_hp, 6);
        assert_eq!(reloaded.participants[1].character_name, "b");
    }

    #[tokio::test]
    async fn test_new_combat_deactivates_previous() {
        let store = test_store().await;
        let (room, _) = store.create_room(GM_NAME).await.unwrap();

        let first = Combat::new(&room.id);
        store.create_combat(&first).await.unwrap();
        let second = Combat::new(&room.id);
        store.create_combat(&second).await.unwrap();

        let active = store.active_combat(&room.id).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM combats WHERE room_id = ? AND is_active = 1")
                .bind(&room.id)
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(count, 1);

        let mut ended = active;
        ended.end();
        store.save_combat(&ended).await.unwrap();
        assert!(store.active_combat(&room.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initiative_recorded_once_per_tag() {
        let store = test_store().await;
        let (room, gm) = store.create_room(GM_NAME).await.unwrap();
        let goblin = store
            .create_character(&gm.id, &NewCharacter::named("Goblin"))
            .await
            .unwrap();
        let combat = Combat::new(&room.id);
        store.create_combat(&combat).await.unwrap();

        let player_roll =
            InitiativeRoll::new(&combat.id, InitiativeTag::Player(gm.id.clone()), 11, None);
        assert!(store.record_initiative(&player_roll).await.unwrap());
        let again =
            InitiativeRoll::new(&combat.id, InitiativeTag::Player(gm.id.clone()), 3, None);
        assert!(!store.record_initiative(&again).await.unwrap());

        let npc_roll =
            InitiativeRoll::new(&combat.id, InitiativeTag::Npc(goblin.id.clone()), 14, Some(14));
        assert!(store.record_initiative(&npc_roll).await.unwrap());
        let npc_again =
            InitiativeRoll::new(&combat.id, InitiativeTag::Npc(goblin.id.clone()), 2, Some(2));
        assert!(!store.record_initiative(&npc_again).await.unwrap());

        let rolls = store.initiative_rolls(&combat.id).await.unwrap();
        assert_eq!(rolls, vec![player_roll, npc_roll]);
    }
}
