//! Combat operations
//!
//! Every mutation takes the room lock, loads the active combat, applies
//! the change through [`Combat`], saves it, and only then broadcasts.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::Coordinator;
use crate::combat::{
    build_initiative_list, initiative_modifier, Combat, CombatParticipant, InitiativeEntry,
    InitiativeRoll, InitiativeTag,
};
use crate::dice::roll_initiative;
use crate::error::{CoreError, CoreResult};
use crate::permissions::{Action, TargetContext};
use crate::protocol::{InitiativeRolled, ServerEvent};

/// Snapshot of the active combat
#[derive(Debug, Clone, Serialize)]
pub struct CombatSnapshot {
    pub id: String,
    pub is_active: bool,
    pub round_number: i32,
    pub current_turn_id: Option<String>,
    /// Sorted by initiative, highest first
    pub participants: Vec<CombatParticipant>,
    pub initiative_list: Vec<InitiativeEntry>,
}

/// Combat state of a room
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CombatState {
    Active(CombatSnapshot),
    Inactive { active: bool },
}

fn default_action_type() -> String {
    "attack".to_string()
}

/// Damage and/or healing against one participant
#[derive(Debug, Clone, Deserialize)]
pub struct CombatActionRequest {
    #[serde(default = "default_action_type")]
    pub action_type: String,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub damage: Option<i32>,
    #[serde(default)]
    pub healing: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombatActionOutcome {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_hp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_active: Option<bool>,
}

/// Result of advancing the turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnChange {
    pub participant_id: String,
    pub character_id: String,
    pub character_name: String,
    pub round_number: i32,
}

fn no_active_combat() -> CoreError {
    CoreError::NotFound("No active combat".to_string())
}

fn positive(amount: Option<i32>, what: &str) -> CoreResult<Option<i32>> {
    match amount {
        Some(n) if n <= 0 => Err(CoreError::InvalidInput(format!("{what} must be positive"))),
        other => Ok(other),
    }
}

impl Coordinator {
    async fn load_active_combat(&self, room_id: &str) -> CoreResult<Combat> {
        self.store
            .active_combat(room_id)
            .await?
            .ok_or_else(no_active_combat)
    }

    async fn snapshot(&self, combat: &Combat) -> CoreResult<CombatSnapshot> {
        Ok(CombatSnapshot {
            id: combat.id.clone(),
            is_active: combat.is_active,
            round_number: combat.round_number,
            current_turn_id: combat.current_turn_id.clone(),
            participants: combat
                .participants_by_initiative()
                .into_iter()
                .cloned()
                .collect(),
            initiative_list: self.initiative_entries(combat).await?,
        })
    }

    async fn initiative_entries(&self, combat: &Combat) -> CoreResult<Vec<InitiativeEntry>> {
        let players = self.store.room_players(&combat.room_id).await?;
        let mut members = Vec::with_capacity(players.len());
        for player in players {
            let first = if player.is_gm {
                None
            } else {
                self.store
                    .characters_for_player(&player.id)
                    .await?
                    .into_iter()
                    .next()
            };
            members.push((player, first));
        }

        let rolls = self.store.initiative_rolls(&combat.id).await?;
        let npcs = self.store.npc_characters(&combat.room_id).await?;
        Ok(build_initiative_list(&members, &rolls, &npcs))
    }

    /// Start a new combat, replacing any active one.
    ///
    /// Listed characters that are not in the room are skipped.
    pub async fn start_combat(
        &self,
        identity: &str,
        character_ids: &[String],
    ) -> CoreResult<CombatSnapshot> {
        let gm = self
            .authorize(identity, Action::StartCombat, &TargetContext::none())
            .await?;
        let _guard = self.room_locks.lock(&gm.room_id).await;

        let mut combat = Combat::new(&gm.room_id);
        for character_id in character_ids {
            match self.store.character_in_room(character_id, &gm.room_id).await? {
                Some(character) => {
                    combat.add_participant(&character, None)?;
                }
                None => debug!(character_id = %character_id, "skipping character outside room"),
            }
        }
        self.store.create_combat(&combat).await?;

        info!(
            room_id = %gm.room_id,
            combat_id = %combat.id,
            participants = combat.participants.len(),
            "combat started"
        );
        self.registry.broadcast(
            &gm.room_id,
            ServerEvent::CombatStarted {
                combat_id: combat.id.clone(),
            },
            None,
        );

        self.snapshot(&combat).await
    }

    /// End the active combat
    pub async fn end_combat(&self, identity: &str) -> CoreResult<()> {
        let gm = self
            .authorize(identity, Action::EndCombat, &TargetContext::none())
            .await?;
        let _guard = self.room_locks.lock(&gm.room_id).await;

        let mut combat = self.load_active_combat(&gm.room_id).await?;
        combat.end();
        self.store.save_combat(&combat).await?;

        info!(room_id = %gm.room_id, combat_id = %combat.id, "combat ended");
        self.registry
            .broadcast(&gm.room_id, ServerEvent::CombatEnded {}, None);
        Ok(())
    }

    /// A player rolls their own initiative. Only the GM is told the result.
    pub async fn roll_initiative(&self, identity: &str) -> CoreResult<InitiativeRolled> {
        let player = self
            .authorize(identity, Action::RollInitiative, &TargetContext::none())
            .await?;
        let combat = self.load_active_combat(&player.room_id).await?;

        let roll = roll_initiative();
        let record = InitiativeRoll::new(
            &combat.id,
            InitiativeTag::Player(player.id.clone()),
            roll,
            Some(roll),
        );
        if !self.store.record_initiative(&record).await? {
            return Err(CoreError::Rejected("Already rolled initiative".to_string()));
        }

        let event = InitiativeRolled {
            player_id: Some(player.id.clone()),
            player_name: Some(player.name.clone()),
            character_id: None,
            character_name: None,
            roll,
            natural_roll: None,
            is_npc: false,
        };

        debug!(combat_id = %combat.id, player_id = %player.id, roll, "initiative rolled");
        match self.store.room_gm(&player.room_id).await? {
            Some(gm) => {
                self.registry
                    .send_personal(&gm.token, ServerEvent::InitiativeRolled(event.clone()));
            }
            None => warn!(room_id = %player.room_id, "room has no game master"),
        }
        Ok(event)
    }

    /// The GM rolls initiative for one of their NPCs (d20 + dexterity)
    pub async fn roll_npc_initiative(
        &self,
        identity: &str,
        character_id: &str,
    ) -> CoreResult<InitiativeRolled> {
        let gm = self
            .authorize(identity, Action::RollNpcInitiative, &TargetContext::none())
            .await?;
        let combat = self.load_active_combat(&gm.room_id).await?;

        let npc = self
            .store
            .npc_characters(&gm.room_id)
            .await?
            .into_iter()
            .find(|c| c.id == character_id)
            .ok_or_else(|| CoreError::NotFound("NPC not found in this session".to_string()))?;

        let natural = roll_initiative();
        let total = natural + initiative_modifier(&npc);
        let record = InitiativeRoll::new(
            &combat.id,
            InitiativeTag::Npc(npc.id.clone()),
            total,
            Some(natural),
        );
        if !self.store.record_initiative(&record).await? {
            return Err(CoreError::Rejected("NPC already rolled initiative".to_string()));
        }

        let event = InitiativeRolled {
            player_id: None,
            player_name: None,
            character_id: Some(npc.id.clone()),
            character_name: Some(npc.name.clone()),
            roll: total,
            natural_roll: Some(natural),
            is_npc: true,
        };
        self.registry.broadcast(
            &gm.room_id,
            ServerEvent::InitiativeRolled(event.clone()),
            None,
        );
        Ok(event)
    }

    /// Advance to the next turn
    pub async fn next_turn(&self, identity: &str) -> CoreResult<TurnChange> {
        let gm = self
            .authorize(identity, Action::NextTurn, &TargetContext::none())
            .await?;
        let _guard = self.room_locks.lock(&gm.room_id).await;

        let mut combat = self.load_active_combat(&gm.room_id).await?;
        let next = combat.next_turn()?.clone();
        let change = TurnChange {
            participant_id: next.id,
            character_id: next.character_id,
            character_name: next.character_name,
            round_number: combat.round_number,
        };
        self.store.save_combat(&combat).await?;

        debug!(
            combat_id = %combat.id,
            round = change.round_number,
            participant_id = %change.participant_id,
            "turn advanced"
        );
        self.registry.broadcast(
            &gm.room_id,
            ServerEvent::TurnChanged {
                participant_id: change.participant_id.clone(),
                character_id: change.character_id.clone(),
                character_name: change.character_name.clone(),
                round_number: change.round_number,
            },
            None,
        );
        Ok(change)
    }

    /// Apply damage and/or healing to a combat participant.
    ///
    /// Amounts must be strictly positive. Damage is applied before healing,
    /// and one `hp_changed` is broadcast per applied part.
    pub async fn combat_action(
        &self,
        identity: &str,
        request: &CombatActionRequest,
    ) -> CoreResult<CombatActionOutcome> {
        let player = self
            .authorize(identity, Action::CombatAction, &TargetContext::none())
            .await?;
        let damage = positive(request.damage, "Damage")?;
        let healing = positive(request.healing, "Healing")?;

        let mut outcome = CombatActionOutcome {
            action: request.action_type.clone(),
            target_hp: None,
            target_active: None,
        };

        let _guard = self.room_locks.lock(&player.room_id).await;
        let mut combat = self.load_active_combat(&player.room_id).await?;

        let Some(target_id) = request.target_id.as_deref() else {
            return Ok(outcome);
        };

        let mut events = Vec::new();
        if let Some(amount) = damage {
            let entry = combat.apply_damage(target_id, amount)?;
            outcome.target_hp = Some(entry.current_hp);
            outcome.target_active = Some(entry.is_active);
            events.push(ServerEvent::HpChanged {
                character_id: entry.character_id.clone(),
                hp: entry.current_hp,
                damage: Some(amount),
                heal: None,
            });
        }
        if let Some(amount) = healing {
            let character_id = combat
                .participant(target_id)
                .map(|p| p.character_id.clone())
                .ok_or_else(|| CoreError::NotFound("Participant not found".to_string()))?;
            let max_hp = self
                .store
                .character(&character_id)
                .await?
                .map(|c| c.max_hp)
                .ok_or_else(|| CoreError::NotFound("Character not found".to_string()))?;

            let entry = combat.apply_healing(target_id, amount, max_hp)?;
            outcome.target_hp = Some(entry.current_hp);
            outcome.target_active = Some(entry.is_active);
            events.push(ServerEvent::HpChanged {
                character_id: entry.character_id.clone(),
                hp: entry.current_hp,
                damage: None,
                heal: Some(amount),
            });
        }

        if events.is_empty() {
            return Ok(outcome);
        }
        self.store.save_combat(&combat).await?;

        for event in events {
            self.registry.broadcast(&player.room_id, event, None);
        }
        Ok(outcome)
    }

    /// Current combat state of the actor's room
    pub async fn combat_state(&self, identity: &str) -> CoreResult<CombatState> {
        let player = self.resolve(identity).await?;
        match self.store.active_combat(&player.room_id).await? {
            Some(combat) => Ok(CombatState::Active(self.snapshot(&combat).await?)),
            None => Ok(CombatState::Inactive { active: false }),
        }
    }

    /// Initiative list of the active combat
    pub async fn initiative_list(&self, identity: &str) -> CoreResult<Vec<InitiativeEntry>> {
        let player = self.resolve(identity).await?;
        let combat = self.load_active_combat(&player.room_id).await?;
        self.initiative_entries(&combat).await
    }
}
