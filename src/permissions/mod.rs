//! Permission checks for room mutations
//!
//! Two roles exist per room: the game master and players.
//!
//! Permission check order (first match wins):
//! 1. Role-restricted actions: GM-only or player-only actions are decided by role alone
//! 2. GM bypass: the game master may act on any record in the room
//! 3. Owner check: a player may act on records they own
//! 4. Default: Denied
//!
//! Token movement is the one named exception: a player additionally needs
//! the movement flag the GM grants.

use serde::{Deserialize, Serialize};

use crate::store::Player;

/// Role of a membership within its room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    GameMaster,
    Player,
}

/// Actions that can be permission-checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    SetReady,
    StartSession,
    SetMovement,
    CreateCharacter,
    ModifyCharacter,
    DeleteCharacter,
    AuthorMap,
    MoveToken,
    StartCombat,
    EndCombat,
    NextTurn,
    RollInitiative,
    RollNpcInitiative,
    CombatAction,
}

impl Action {
    fn label(self) -> &'static str {
        match self {
            Action::SetReady => "set ready status",
            Action::StartSession => "start the session",
            Action::SetMovement => "change movement permissions",
            Action::CreateCharacter => "create characters",
            Action::ModifyCharacter => "update this character",
            Action::DeleteCharacter => "delete this character",
            Action::AuthorMap => "edit maps",
            Action::MoveToken => "move this token",
            Action::StartCombat => "start combat",
            Action::EndCombat => "end combat",
            Action::NextTurn => "advance turns",
            Action::RollInitiative => "roll initiative",
            Action::RollNpcInitiative => "roll NPC initiative",
            Action::CombatAction => "act in combat",
        }
    }
}

/// Result of a permission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionResult {
    /// Action is allowed
    Allowed,
    /// Action denied with reason
    Denied(String),
}

impl PermissionResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PermissionResult::Allowed)
    }
}

/// The acting membership
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub player_id: String,
    pub role: Role,
    /// Movement flag granted by the GM
    pub can_move: bool,
}

impl ActorContext {
    pub fn game_master(player_id: &str) -> Self {
        Self {
            player_id: player_id.to_string(),
            role: Role::GameMaster,
            can_move: true,
        }
    }

    pub fn player(player_id: &str, can_move: bool) -> Self {
        Self {
            player_id: player_id.to_string(),
            role: Role::Player,
            can_move,
        }
    }

    pub fn is_gm(&self) -> bool {
        self.role == Role::GameMaster
    }
}

impl From<&Player> for ActorContext {
    fn from(player: &Player) -> Self {
        if player.is_gm {
            Self::game_master(&player.id)
        } else {
            Self::player(&player.id, player.can_move)
        }
    }
}

/// The record being acted on
#[derive(Debug, Clone, Default)]
pub struct TargetContext {
    /// Membership that owns the record, if the record is owned at all
    pub owner_id: Option<String>,
}

impl TargetContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn owned_by(owner_id: &str) -> Self {
        Self {
            owner_id: Some(owner_id.to_string()),
        }
    }
}

/// Decide whether `actor` may perform `action` on `target`
pub fn check_permission(
    actor: &ActorContext,
    action: Action,
    target: &TargetContext,
) -> PermissionResult {
    // 1. Role-restricted actions
    match action {
        Action::StartSession
        | Action::SetMovement
        | Action::AuthorMap
        | Action::StartCombat
        | Action::EndCombat
        | Action::NextTurn
        | Action::RollNpcInitiative => {
            if actor.is_gm() {
                return PermissionResult::Allowed;
            }
            return PermissionResult::Denied(format!("Only GM can {}", action.label()));
        }
        Action::SetReady | Action::RollInitiative => {
            if actor.is_gm() {
                return PermissionResult::Denied(format!("GM cannot {}", action.label()));
            }
            return PermissionResult::Allowed;
        }
        Action::CreateCharacter | Action::CombatAction => return PermissionResult::Allowed,
        Action::ModifyCharacter | Action::DeleteCharacter | Action::MoveToken => {}
    }

    // 2. GM bypass
    if actor.is_gm() {
        return PermissionResult::Allowed;
    }

    // 3. Owner check
    let owns = target.owner_id.as_deref() == Some(actor.player_id.as_str());
    match action {
        Action::MoveToken if !actor.can_move => {
            PermissionResult::Denied("Movement not allowed by GM".to_string())
        }
        Action::MoveToken if !owns => {
            PermissionResult::Denied("You can only move your own token".to_string())
        }
        _ if owns => PermissionResult::Allowed,
        _ => PermissionResult::Denied(format!("Not allowed to {}", action.label())),
    }
}
