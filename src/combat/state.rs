//! Combat state machine
//!
//! A combat belongs to one room and moves linearly through
//! `Forming -> Active -> Ended`. Turn order is the active participants
//! sorted by initiative, highest first, with ties kept in insertion order.
//!
//! All mutation of the participant list goes through [`Combat`] so the
//! turn pointer and round counter stay consistent with the list.

use serde::Serialize;
use thiserror::Error;

use super::modifiers::initiative_modifier;
use crate::dice::roll_initiative;
use crate::store::Character;

/// Combat state machine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CombatError {
    #[error("No active participants")]
    NoActiveParticipants,

    #[error("Combat has ended")]
    Ended,

    #[error("Participant not found in this combat")]
    ParticipantNotFound,
}

/// Lifecycle phase of a combat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatPhase {
    /// Created, nobody has acted yet
    Forming,
    /// At least one turn has been taken
    Active,
    /// Ended by the GM; never re-entered
    Ended,
}

/// A character's entry in a combat
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombatParticipant {
    pub id: String,
    pub character_id: String,
    pub character_name: String,
    pub initiative: i32,
    /// HP snapshot for this combat, independent of the character record
    pub current_hp: i32,
    pub is_active: bool,
}

impl CombatParticipant {
    /// Apply damage. HP never drops below zero; reaching zero deactivates.
    pub fn take_damage(&mut self, amount: i32) {
        self.current_hp = self.current_hp.saturating_sub(amount).max(0);
        if self.current_hp == 0 {
            self.is_active = false;
        }
    }

    /// Apply healing up to `max_hp`. Any HP above zero reactivates.
    pub fn heal(&mut self, amount: i32, max_hp: i32) {
        self.current_hp = self.current_hp.saturating_add(amount).min(max_hp);
        if self.current_hp > 0 {
            self.is_active = true;
        }
    }
}

/// Turn-based combat for a single room
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Combat {
    pub id: String,
    pub room_id: String,
    pub is_active: bool,
    pub round_number: i32,
    pub current_turn_id: Option<String>,
    /// Participants in insertion order
    pub participants: Vec<CombatParticipant>,
}

impl Combat {
    /// Create a fresh combat in the forming phase
    pub fn new(room_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            is_active: true,
            round_number: 1,
            current_turn_id: None,
            participants: Vec::new(),
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> CombatPhase {
        if !self.is_active {
            CombatPhase::Ended
        } else if self.current_turn_id.is_none() {
            CombatPhase::Forming
        } else {
            CombatPhase::Active
        }
    }

    /// Add a character to the combat.
    ///
    /// Without an explicit initiative the character rolls d20 plus its
    /// dexterity modifier. The HP snapshot starts at the character's live HP.
    pub fn add_participant(
        &mut self,
        character: &Character,
        initiative: Option<i32>,
    ) -> Result<&CombatParticipant, CombatError> {
        if !self.is_active {
            return Err(CombatError::Ended);
        }

        let initiative =
            initiative.unwrap_or_else(|| roll_initiative() + initiative_modifier(character));

        self.participants.push(CombatParticipant {
            id: uuid::Uuid::new_v4().to_string(),
            character_id: character.id.clone(),
            character_name: character.name.clone(),
            initiative,
            current_hp: character.current_hp.clamp(0, character.max_hp.max(0)),
            is_active: true,
        });

        Ok(&self.participants[self.participants.len() - 1])
    }

    /// Active participants sorted by initiative descending.
    ///
    /// `sort_by` is stable, so equal initiatives keep insertion order.
    pub fn turn_order(&self) -> Vec<&CombatParticipant> {
        let mut order: Vec<&CombatParticipant> =
            self.participants.iter().filter(|p| p.is_active).collect();
        order.sort_by(|a, b| b.initiative.cmp(&a.initiative));
        order
    }

    /// All participants sorted by initiative descending (for snapshots)
    pub fn participants_by_initiative(&self) -> Vec<&CombatParticipant> {
        let mut all: Vec<&CombatParticipant> = self.participants.iter().collect();
        all.sort_by(|a, b| b.initiative.cmp(&a.initiative));
        all
    }

    /// Advance to the next turn.
    ///
    /// The current position is located by participant id, not index, so a
    /// participant dropping out mid-round does not skip anyone. When the
    /// current participant is last (or no longer in the order) the round
    /// counter increments and the order wraps.
    pub fn next_turn(&mut self) -> Result<&CombatParticipant, CombatError> {
        if !self.is_active {
            return Err(CombatError::Ended);
        }

        let order = self.turn_order();
        let first = order.first().ok_or(CombatError::NoActiveParticipants)?;

        let (next_id, wrapped) = match self.current_turn_id.as_deref() {
            None => (first.id.clone(), false),
            Some(current) => match order.iter().position(|p| p.id == current) {
                Some(idx) if idx + 1 < order.len() => (order[idx + 1].id.clone(), false),
                _ => (first.id.clone(), true),
            },
        };

        if wrapped {
            self.round_number += 1;
        }
        self.current_turn_id = Some(next_id.clone());

        self.participant(&next_id)
            .ok_or(CombatError::ParticipantNotFound)
    }

    /// Look up a participant by id
    pub fn participant(&self, participant_id: &str) -> Option<&CombatParticipant> {
        self.participants.iter().find(|p| p.id == participant_id)
    }

    /// Apply damage to a participant
    pub fn apply_damage(
        &mut self,
        participant_id: &str,
        amount: i32,
    ) -> Result<&CombatParticipant, CombatError> {
        let entry = self.participant_mut(participant_id)?;
        entry.take_damage(amount);
        Ok(entry)
    }

    /// Apply healing to a participant, capped at the character's max HP
    pub fn apply_healing(
        &mut self,
        participant_id: &str,
        amount: i32,
        max_hp: i32,
    ) -> Result<&CombatParticipant, CombatError> {
        let entry = self.participant_mut(participant_id)?;
        entry.heal(amount, max_hp);
        Ok(entry)
    }

    /// End the combat. History is kept; the combat never becomes active again.
    pub fn end(&mut self) {
        self.is_active = false;
    }

    fn participant_mut(&mut self, participant_id: &str) -> Result<&mut CombatParticipant, CombatError> {
        self.participants
            .iter_mut()
            .find(|p| p.id == participant_id)
            .ok_or(CombatError::ParticipantNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn character(name: &str, dexterity: i32, hp: i32) -> Character {
        Character {
            id: format!("char-{}", name),
            player_id: "p1".to_string(),
            name: name.to_string(),
            class_name: None,
            level: 1,
            strength: 10,
            dexterity,
            constitution: 10,
            intelligence: 10,
            wisdom: 10,
            charisma: 10,
            max_hp: hp,
            current_hp: hp,
        }
    }

    fn combat_with(initiatives: &[i32]) -> Combat {
        let mut combat = Combat::new("room1");
        for (i, init) in initiatives.iter().enumerate() {
            combat
                .add_participant(&character(&format!("c{}", i), 10, 20), Some(*init))
                .unwrap();
        }
        combat
    }

    #[test]
    fn test_new_combat() {
        let combat = Combat::new("room1");
        assert!(combat.is_active);
        assert_eq!(combat.round_number, 1);
        assert!(combat.current_turn_id.is_none());
        assert!(combat.participants.is_empty());
        assert_eq!(combat.phase(), CombatPhase::Forming);
    }

    #[test]
    fn test_add_participant_rolls_with_dex() {
        let mut combat = Combat::new("room1");
        let hero = character("hero", 16, 12);
        for _ in 0..50 {
            let entry = combat.add_participant(&hero, None).unwrap();
            // d20 + 3
            assert!((4..=23).contains(&entry.initiative));
            assert_eq!(entry.current_hp, 12);
            assert!(entry.is_active);
        }
    }

    #[test]
    fn test_stable_turn_order_and_wrap() {
        let mut combat = combat_with(&[20, 15, 15, 10]);
        let ids: Vec<String> = combat.participants.iter().map(|p| p.id.clone()).collect();

        for expected in &ids {
            let next = combat.next_turn().unwrap();
            assert_eq!(&next.id, expected);
            assert_eq!(combat.round_number, 1);
        }

        let next = combat.next_turn().unwrap().id.clone();
        assert_eq!(next, ids[0]);
        assert_eq!(combat.round_number, 2);
        assert_eq!(combat.phase(), CombatPhase::Active);
    }

    #[test]
    fn test_ties_keep_insertion_order_regardless_of_position() {
        let combat = combat_with(&[5, 12, 5, 12]);
        let order: Vec<&str> = combat
            .turn_order()
            .iter()
            .map(|p| p.character_name.as_str())
            .collect();
        assert_eq!(order, vec!["c1", "c3", "c0", "c2"]);
    }

    #[test]
    fn test_next_turn_empty() {
        let mut combat = Combat::new("room1");
        assert_eq!(combat.next_turn(), Err(CombatError::NoActiveParticipants));
        assert_eq!(combat.round_number, 1);
    }

    #[test]
    fn test_next_turn_skips_downed_and_wraps_when_current_removed() {
        let mut combat = combat_with(&[18, 12, 9]);
        let ids: Vec<String> = combat.participants.iter().map(|p| p.id.clone()).collect();

        assert_eq!(combat.next_turn().unwrap().id, ids[0]);
        assert_eq!(combat.next_turn().unwrap().id, ids[1]);

        // Middle participant drops while acting: lookup fails, round wraps
        combat.apply_damage(&ids[1], 100).unwrap();
        assert_eq!(combat.next_turn().unwrap().id, ids[0]);
        assert_eq!(combat.round_number, 2);

        // Downed participant is skipped
        assert_eq!(combat.next_turn().unwrap().id, ids[2]);
        assert_eq!(combat.round_number, 2);
    }

    #[test]
    fn test_damage_clamps_and_deactivates() {
        let mut combat = combat_with(&[10]);
        let id = combat.participants[0].id.clone();

        let entry = combat.apply_damage(&id, 5).unwrap();
        assert_eq!(entry.current_hp, 15);
        assert!(entry.is_active);

        let entry = combat.apply_damage(&id, 50).unwrap();
        assert_eq!(entry.current_hp, 0);
        assert!(!entry.is_active);
    }

    #[test]
    fn test_healing_clamps_and_revives() {
        let mut combat = combat_with(&[10]);
        let id = combat.participants[0].id.clone();

        combat.apply_damage(&id, 20).unwrap();
        assert!(!combat.participants[0].is_active);

        let entry = combat.apply_healing(&id, 3, 20).unwrap();
        assert_eq!(entry.current_hp, 3);
        assert!(entry.is_active);

        let entry = combat.apply_healing(&id, 100, 20).unwrap();
        assert_eq!(entry.current_hp, 20);
    }

    #[test]
    fn test_extreme_amounts_saturate() {
        let mut combat = combat_with(&[10]);
        let id = combat.participants[0].id.clone();

        let entry = combat.apply_healing(&id, i32::MAX, 20).unwrap();
        assert_eq!(entry.current_hp, 20);

        let entry = combat.apply_damage(&id, i32::MAX).unwrap();
        assert_eq!(entry.current_hp, 0);
        assert!(!entry.is_active);

        let entry = combat.apply_healing(&id, i32::MAX, 20).unwrap();
        assert_eq!(entry.current_hp, 20);
        assert!(entry.is_active);
    }

    #[test]
    fn test_unknown_participant() {
        let mut combat = combat_with(&[10]);
        assert_eq!(
            combat.apply_damage("missing", 1),
            Err(CombatError::ParticipantNotFound)
        );
    }

    #[test]
    fn test_end_combat_is_final() {
        let mut combat = combat_with(&[10, 5]);
        combat.next_turn().unwrap();
        combat.end();

        assert_eq!(combat.phase(), CombatPhase::Ended);
        assert_eq!(combat.next_turn(), Err(CombatError::Ended));
        assert_eq!(combat.participants.len(), 2);
        assert!(combat
            .add_participant(&character("late", 10, 5), Some(1))
            .is_err());
    }
}
