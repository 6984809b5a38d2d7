//! Initiative rolls and the pre-combat initiative list

use std::cmp::Reverse;

use serde::Serialize;

use crate::store::{Character, Player};

/// Who an initiative roll belongs to. Exactly one tag per roll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiativeTag {
    /// Rolled by a player (membership id)
    Player(String),
    /// Rolled by the GM for an NPC character
    Npc(String),
}

/// A stored initiative roll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiativeRoll {
    pub id: String,
    pub combat_id: String,
    pub tag: InitiativeTag,
    /// Value used for ordering (NPCs include their dexterity modifier)
    pub roll: i32,
    /// Unmodified d20, when known
    pub natural_roll: Option<i32>,
}

impl InitiativeRoll {
    pub fn new(combat_id: &str, tag: InitiativeTag, roll: i32, natural_roll: Option<i32>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            combat_id: combat_id.to_string(),
            tag,
            roll,
            natural_roll,
        }
    }
}

/// One row of the initiative list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitiativeEntry {
    pub player_id: Option<String>,
    pub player_name: String,
    pub character_id: Option<String>,
    pub character_name: Option<String>,
    pub roll: Option<i32>,
    pub is_npc: bool,
}

/// Assemble the initiative list for a combat.
///
/// One entry per non-GM member (with their first character, if any) and one
/// per NPC roll. Rolled entries come first, highest roll first; unrolled
/// entries trail in the order given.
pub fn build_initiative_list(
    members: &[(Player, Option<Character>)],
    rolls: &[InitiativeRoll],
    npcs: &[Character],
) -> Vec<InitiativeEntry> {
    let mut entries = Vec::with_capacity(members.len() + rolls.len());

    for (player, character) in members.iter().filter(|(p, _)| !p.is_gm) {
        let roll = rolls.iter().find_map(|r| match &r.tag {
            InitiativeTag::Player(id) if *id == player.id => Some(r.roll),
            _ => None,
        });

        entries.push(InitiativeEntry {
            player_id: Some(player.id.clone()),
            player_name: player.name.clone(),
            character_id: character.as_ref().map(|c| c.id.clone()),
            character_name: character.as_ref().map(|c| c.name.clone()),
            roll,
            is_npc: false,
        });
    }

    for roll in rolls {
        let InitiativeTag::Npc(character_id) = &roll.tag else {
            continue;
        };
        let Some(npc) = npcs.iter().find(|c| c.id == *character_id) else {
            continue;
        };

        entries.push(InitiativeEntry {
            player_id: None,
            player_name: "NPC".to_string(),
            character_id: Some(npc.id.clone()),
            character_name: Some(npc.name.clone()),
            roll: Some(roll.roll),
            is_npc: true,
        });
    }

    entries.sort_by_key(|e| (e.roll.is_none(), Reverse(e.roll.unwrap_or(0))));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str, is_gm: bool) -> Player {
        Player {
            id: id.to_string(),
            room_id: "room1".to_string(),
            name: format!("name-{}", id),
            token: format!("token-{}", id),
            is_gm,
            is_ready: false,
            can_move: false,
            left_at: None,
        }
    }

    fn npc(id: &str) -> Character {
        Character {
            id: id.to_string(),
            player_id: "gm".to_string(),
            name: format!("npc-{}", id),
            class_name: None,
            level: 1,
            strength: 10,
            dexterity: 10,
            constitution: 10,
            intelligence: 10,
            wisdom: 10,
            charisma: 10,
            max_hp: 7,
            current_hp: 7,
        }
    }

    #[test]
    fn test_gm_excluded_and_unrolled_trail() {
        let members = vec![
            (player("gm", true), None),
            (player("a", false), None),
            (player("b", false), None),
            (player("c", false), None),
        ];
        let rolls = vec![
            InitiativeRoll::new("c1", InitiativeTag::Player("b".into()), 7, Some(7)),
            InitiativeRoll::new("c1", InitiativeTag::Npc("goblin".into()), 15, Some(15)),
        ];

        let list = build_initiative_list(&members, &rolls, &[npc("goblin")]);

        assert_eq!(list.len(), 4);
        assert_eq!(list[0].character_name.as_deref(), Some("npc-goblin"));
        assert!(list[0].is_npc);
        assert_eq!(list[1].player_id.as_deref(), Some("b"));
        assert_eq!(list[1].roll, Some(7));
        assert_eq!(list[2].player_id.as_deref(), Some("a"));
        assert_eq!(list[2].roll, None);
        assert_eq!(list[3].player_id.as_deref(), Some("c"));
    }

    #[test]
    fn test_npc_roll_without_character_is_skipped() {
        let rolls = vec![InitiativeRoll::new(
            "c1",
            InitiativeTag::Npc("gone".into()),
            12,
            None,
        )];
        let list = build_initiative_list(&[], &rolls, &[]);
        assert!(list.is_empty());
    }

    #[test]
    fn test_negative_rolls_sort_before_unrolled() {
        let members = vec![(player("a", false), None), (player("b", false), None)];
        let rolls = vec![InitiativeRoll::new(
            "c1",
            InitiativeTag::Player("b".into()),
            -1,
            None,
        )];
        let list = build_initiative_list(&members, &rolls, &[]);
        assert_eq!(list[0].player_id.as_deref(), Some("b"));
        assert_eq!(list[1].roll, None);
    }
}
