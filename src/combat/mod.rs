//! Combat system module
//!
//! Implements turn-based encounter tracking:
//! - Combat lifecycle (forming, active, ended)
//! - Initiative-ordered turns with round counting
//! - Per-combat HP snapshots with damage and healing
//! - Initiative rolls for players and NPCs

mod initiative;
mod modifiers;
mod state;

pub use initiative::{build_initiative_list, InitiativeEntry, InitiativeRoll, InitiativeTag};
pub use modifiers::{ability_modifier, initiative_modifier};
pub use state::{Combat, CombatError, CombatParticipant, CombatPhase};
