//! Wire protocol for room connections
//!
//! Every frame in either direction is a JSON envelope
//! `{"type": <name>, "payload": <object>}`. Server events are a closed enum
//! serialized straight into that shape. Client frames are decoded in two
//! steps: first the envelope, then the payload for the known `type`, so an
//! unknown type is reported as such instead of as a parse failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::dice::RollMode;
use crate::store::{Character, GameMap, MapToken, TokenMove};

/// Events sent from the server to connected clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    PlayerJoined {
        player_id: String,
        player_name: String,
        is_gm: bool,
    },
    PlayerLeft {
        player_id: String,
    },
    PlayerReady {
        player_id: String,
        player_name: String,
        is_ready: bool,
    },
    SessionStarted {
        session_id: String,
        session_code: String,
    },
    MovementChanged {
        player_id: String,
        can_move: bool,
    },
    CombatStarted {
        combat_id: String,
    },
    CombatEnded {},
    TurnChanged {
        participant_id: String,
        character_id: String,
        character_name: String,
        round_number: i32,
    },
    HpChanged {
        character_id: String,
        hp: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        damage: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        heal: Option<i32>,
    },
    InitiativeRolled(InitiativeRolled),
    DiceResult(DiceResult),
    Chat {
        player_id: String,
        player_name: String,
        message: String,
    },
    CharacterCreated {
        character: Character,
    },
    CharacterUpdated {
        character: Character,
    },
    CharacterDeleted {
        character_id: String,
    },
    MapCreated {
        map: GameMap,
    },
    MapChanged {
        map_id: String,
    },
    TokenAdded {
        token: MapToken,
    },
    TokenUpdated {
        map_id: String,
        token_id: String,
        changes: TokenMove,
    },
    TokenRemoved {
        map_id: String,
        token_id: String,
    },
    Error {
        message: String,
    },
    /// Keep-alive; clients answer with `pong`
    Ping,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// HP change event with the absolute difference as damage or heal
    pub fn hp_delta(character_id: &str, hp: i32, delta: i32) -> Self {
        ServerEvent::HpChanged {
            character_id: character_id.to_string(),
            hp,
            damage: (delta < 0).then_some(-delta),
            heal: (delta > 0).then_some(delta),
        }
    }

    /// Wire name of the event
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::PlayerJoined { .. } => "player_joined",
            ServerEvent::PlayerLeft { .. } => "player_left",
            ServerEvent::PlayerReady { .. } => "player_ready",
            ServerEvent::SessionStarted { .. } => "session_started",
            ServerEvent::MovementChanged { .. } => "movement_changed",
            ServerEvent::CombatStarted { .. } => "combat_started",
            ServerEvent::CombatEnded {} => "combat_ended",
            ServerEvent::TurnChanged { .. } => "turn_changed",
            ServerEvent::HpChanged { .. } => "hp_changed",
            ServerEvent::InitiativeRolled(_) => "initiative_rolled",
            ServerEvent::DiceResult(_) => "dice_result",
            ServerEvent::Chat { .. } => "chat",
            ServerEvent::CharacterCreated { .. } => "character_created",
            ServerEvent::CharacterUpdated { .. } => "character_updated",
            ServerEvent::CharacterDeleted { .. } => "character_deleted",
            ServerEvent::MapCreated { .. } => "map_created",
            ServerEvent::MapChanged { .. } => "map_changed",
            ServerEvent::TokenAdded { .. } => "token_added",
            ServerEvent::TokenUpdated { .. } => "token_updated",
            ServerEvent::TokenRemoved { .. } => "token_removed",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Ping => "ping",
        }
    }
}

/// Payload of `initiative_rolled`.
///
/// Player rolls carry the player fields; NPC rolls carry the character
/// fields and the unmodified d20.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitiativeRolled {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_name: Option<String>,
    pub roll: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natural_roll: Option<i32>,
    pub is_npc: bool,
}

/// Payload of `dice_result`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiceResult {
    pub player_id: String,
    pub player_name: String,
    pub dice: String,
    pub rolls: Vec<u32>,
    pub modifier: i32,
    pub total: i32,
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<RollMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_rolls: Option<Vec<Vec<u32>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen_index: Option<usize>,
}

/// Raw inbound envelope
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

fn default_dice() -> String {
    "1d20".to_string()
}

#[derive(Debug, Deserialize)]
struct RollDicePayload {
    #[serde(default = "default_dice")]
    dice: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    mode: RollMode,
}

#[derive(Debug, Deserialize)]
struct ChatPayload {
    message: String,
}

/// Messages sent from clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    RollDice {
        dice: String,
        reason: Option<String>,
        mode: RollMode,
    },
    Chat {
        message: String,
    },
    /// Keep-alive reply
    Pong,
    /// Explicit leave; no grace period follows
    Leave,
    /// Well-formed envelope with a type we do not handle
    Unknown(String),
}

/// Inbound decoding failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("Message too large")]
    TooLarge,
}

impl ClientMessage {
    /// Decode one text frame
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        let Envelope { kind, payload } = envelope;
        // A missing or null payload is treated as an empty object
        let payload = match payload {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        let invalid = |kind: &str, e: serde_json::Error| ProtocolError::InvalidPayload {
            kind: kind.to_string(),
            reason: e.to_string(),
        };

        match kind.as_str() {
            "roll_dice" => {
                let p: RollDicePayload =
                    serde_json::from_value(payload).map_err(|e| invalid(&kind, e))?;
                Ok(ClientMessage::RollDice {
                    dice: p.dice,
                    reason: p.reason,
                    mode: p.mode,
                })
            }
            "chat" => {
                let p: ChatPayload =
                    serde_json::from_value(payload).map_err(|e| invalid(&kind, e))?;
                Ok(ClientMessage::Chat { message: p.message })
            }
            "pong" => Ok(ClientMessage::Pong),
            "leave" => Ok(ClientMessage::Leave),
            _ => Ok(ClientMessage::Unknown(kind)),
        }
    }
}
