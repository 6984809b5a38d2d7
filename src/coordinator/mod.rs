//! Session coordinator
//!
//! The only component that both mutates room state and notifies observers.
//! Every operation follows the same order: resolve the actor and check the
//! permission, apply the mutation through the store (or the combat state
//! machine), build the event describing exactly what changed, then hand it
//! to the connection registry. A rejected operation changes nothing and
//! broadcasts nothing.

mod board;
mod characters;
mod combat;
mod locks;

pub use combat::{
    CombatActionOutcome, CombatActionRequest, CombatSnapshot, CombatState, TurnChange,
};
pub use locks::KeyedLocks;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::auth::token_prefix;
use crate::connections::{ConnectionRegistry, Registration};
use crate::dice::{roll_with_advantage, RollMode};
use crate::error::{CoreError, CoreResult};
use crate::permissions::{check_permission, Action, ActorContext, TargetContext};
use crate::protocol::{DiceResult, ServerEvent};
use crate::store::{JoinOutcome, Player, Room, Store, GM_NAME};
use crate::timers::GraceTimers;

/// A freshly attached connection
#[derive(Debug)]
pub struct Session {
    pub player: Player,
    pub registration: Registration,
}

/// Glue between the store, the combat state machine and live connections
pub struct Coordinator {
    store: Store,
    registry: Arc<ConnectionRegistry>,
    timers: Arc<GraceTimers>,
    room_locks: KeyedLocks,
    identity_locks: KeyedLocks,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("connections", &self.registry.len())
            .field("grace_timers", &self.timers.len())
            .finish()
    }
}

impl Coordinator {
    pub fn new(store: Store, registry: Arc<ConnectionRegistry>, timers: Arc<GraceTimers>) -> Self {
        Self {
            store,
            registry,
            timers,
            room_locks: KeyedLocks::new(),
            identity_locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn timers(&self) -> &Arc<GraceTimers> {
        &self.timers
    }

    /// Resolve an identity token to its membership
    pub async fn resolve(&self, identity: &str) -> CoreResult<Player> {
        self.store
            .player_by_token(identity)
            .await?
            .ok_or(CoreError::Unauthorized)
    }

    async fn authorize(
        &self,
        identity: &str,
        action: Action,
        target: &TargetContext,
    ) -> CoreResult<Player> {
        let player = self.resolve(identity).await?;
        check_permission(&ActorContext::from(&player), action, target).into_result()?;
        Ok(player)
    }

    // Rooms and membership

    /// Create a room and its game-master membership
    pub async fn create_room(&self, gm_name: Option<&str>) -> CoreResult<(Room, Player)> {
        let name = gm_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(GM_NAME);
        let (room, gm) = self.store.create_room(name).await?;
        info!(room_id = %room.id, code = %room.code, "room created");
        Ok((room, gm))
    }

    /// Join a room by its code
    pub async fn join_room(&self, code: &str, name: &str) -> CoreResult<(Room, Player)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::InvalidInput("Player name is required".to_string()));
        }

        match self.store.join_room(code, name).await? {
            JoinOutcome::Joined(room, player) => {
                info!(room_id = %room.id, player_id = %player.id, "player joined room");
                Ok((room, player))
            }
            JoinOutcome::RoomNotFound => Err(CoreError::NotFound("Session not found".to_string())),
            JoinOutcome::NameTaken => {
                Err(CoreError::Rejected("Player name already taken".to_string()))
            }
        }
    }

    /// The actor's membership together with its room
    pub async fn whoami(&self, identity: &str) -> CoreResult<(Room, Player)> {
        let player = self.resolve(identity).await?;
        let room = self.room_of(&player).await?;
        Ok((room, player))
    }

    /// All memberships of the actor's room
    pub async fn room_players(&self, identity: &str) -> CoreResult<Vec<Player>> {
        let player = self.resolve(identity).await?;
        Ok(self.store.room_players(&player.room_id).await?)
    }

    async fn room_of(&self, player: &Player) -> CoreResult<Room> {
        self.store
            .room(&player.room_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("Session not found".to_string()))
    }

    /// Toggle a player's ready flag
    pub async fn set_ready(&self, identity: &str, ready: bool) -> CoreResult<Player> {
        let mut player = self
            .authorize(identity, Action::SetReady, &TargetContext::none())
            .await?;
        self.store.set_ready(&player.id, ready).await?;
        player.is_ready = ready;

        self.registry.broadcast(
            &player.room_id,
            ServerEvent::PlayerReady {
                player_id: player.id.clone(),
                player_name: player.name.clone(),
                is_ready: ready,
            },
            None,
        );
        Ok(player)
    }

    /// Mark the session as started
    pub async fn start_session(&self, identity: &str) -> CoreResult<Room> {
        let gm = self
            .authorize(identity, Action::StartSession, &TargetContext::none())
            .await?;
        self.store.start_session(&gm.room_id).await?;
        let room = self.room_of(&gm).await?;

        info!(room_id = %room.id, "session started");
        self.registry.broadcast(
            &room.id,
            ServerEvent::SessionStarted {
                session_id: room.id.clone(),
                session_code: room.code.clone(),
            },
            None,
        );
        Ok(room)
    }

    /// Grant or revoke a player's token-movement permission
    pub async fn set_movement(
        &self,
        identity: &str,
        player_id: &str,
        allowed: bool,
    ) -> CoreResult<Player> {
        let gm = self
            .authorize(identity, Action::SetMovement, &TargetContext::none())
            .await?;

        let mut target = self
            .store
            .player(player_id)
            .await?
            .filter(|p| p.room_id == gm.room_id)
            .ok_or_else(|| CoreError::NotFound("Player not found".to_string()))?;

        self.store.set_can_move(&target.id, allowed).await?;
        target.can_move = allowed;

        self.registry.broadcast(
            &gm.room_id,
            ServerEvent::MovementChanged {
                player_id: target.id.clone(),
                can_move: allowed,
            },
            None,
        );
        Ok(target)
    }

    // Connection lifecycle

    /// Attach a new live connection for `identity`.
    ///
    /// Any pending grace timer is cancelled (and joined) before anything
    /// else touches the membership, so an expiry can never land after the
    /// reconnect. Connect, disconnect and leave for one identity run one at
    /// a time, so a teardown can never arm a timer between the cancel and
    /// the registration.
    pub async fn connect(&self, identity: &str) -> CoreResult<Session> {
        let mut player = self.resolve(identity).await?;
        let _guard = self.identity_locks.lock(identity).await;

        if self.timers.cancel(identity).await {
            debug!(identity = token_prefix(identity), "reconnected within grace period");
        }
        if self.store.reactivate(identity).await? {
            player.left_at = None;
        }

        let registration = self.registry.connect(identity, &player.room_id);
        self.registry.broadcast(
            &player.room_id,
            ServerEvent::PlayerJoined {
                player_id: player.id.clone(),
                player_name: player.name.clone(),
                is_gm: player.is_gm,
            },
            Some(identity),
        );

        Ok(Session {
            player,
            registration,
        })
    }

    /// Handle a connection that closed without an explicit leave.
    ///
    /// If a newer connection already owns the identity this is a no-op;
    /// otherwise the grace period starts.
    pub async fn disconnect(&self, player: &Player, conn_id: uuid::Uuid) {
        let _guard = self.identity_locks.lock(&player.token).await;
        if !self.registry.release(&player.token, conn_id) {
            debug!(
                identity = token_prefix(&player.token),
                "stale connection closed, newer one active"
            );
            return;
        }

        let store = self.store.clone();
        let registry = self.registry.clone();
        let identity = player.token.clone();
        let player_id = player.id.clone();
        let room_id = player.room_id.clone();

        self.timers
            .start(&player.token, async move {
                if registry.is_connected(&identity) {
                    debug!(identity = token_prefix(&identity), "grace expired but reconnected");
                    return;
                }
                match store.mark_left(&identity).await {
                    Ok(true) => {
                        info!(identity = token_prefix(&identity), "player left after grace period");
                        registry.broadcast(&room_id, ServerEvent::PlayerLeft { player_id }, None);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(identity = token_prefix(&identity), "failed to mark player left: {}", e)
                    }
                }
            })
            .await;
    }

    /// Explicit leave: mark the membership left now, with no grace period
    pub async fn leave(&self, player: &Player, conn_id: uuid::Uuid) -> CoreResult<()> {
        let _guard = self.identity_locks.lock(&player.token).await;
        self.registry.release(&player.token, conn_id);
        self.timers.cancel(&player.token).await;

        if self.store.mark_left(&player.token).await? {
            info!(identity = token_prefix(&player.token), "player left");
            self.registry.broadcast(
                &player.room_id,
                ServerEvent::PlayerLeft {
                    player_id: player.id.clone(),
                },
                Some(&player.token),
            );
        }
        Ok(())
    }

    // Messaging

    /// Roll dice and broadcast the result to the whole room
    pub async fn roll_dice(
        &self,
        identity: &str,
        dice: &str,
        reason: Option<String>,
        mode: RollMode,
    ) -> CoreResult<DiceResult> {
        let player = self.resolve(identity).await?;
        let outcome = roll_with_advantage(dice, mode)?;
        let advantage = mode != RollMode::Normal;

        let result = DiceResult {
            player_id: player.id.clone(),
            player_name: player.name.clone(),
            dice: dice.to_string(),
            rolls: outcome.rolls,
            modifier: outcome.modifier,
            total: outcome.total,
            reason,
            mode: advantage.then_some(mode),
            all_rolls: advantage.then_some(outcome.all_rolls),
            chosen_index: advantage.then_some(outcome.chosen_index),
        };

        self.registry.broadcast(
            &player.room_id,
            ServerEvent::DiceResult(result.clone()),
            None,
        );
        Ok(result)
    }

    /// Broadcast a chat line. Blank messages are ignored; returns whether
    /// anything was sent.
    pub async fn chat(&self, identity: &str, message: &str) -> CoreResult<bool> {
        if message.trim().is_empty() {
            return Ok(false);
        }
        let player = self.resolve(identity).await?;

        self.registry.broadcast(
            &player.room_id,
            ServerEvent::Chat {
                player_id: player.id,
                player_name: player.name,
                message: message.to_string(),
            },
            None,
        );
        Ok(true)
    }

    /// Close every connection and drop pending timers
    pub fn shutdown(&self) {
        self.timers.shutdown();
        self.registry.close_all(1001, "Server shutting down");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::connections::Outbound;
    use crate::db::test_utils::test_store;

    pub async fn coordinator(grace: Duration) -> Coordinator {
        Coordinator::new(
            test_store().await,
            Arc::new(ConnectionRegistry::new(64)),
            Arc::new(GraceTimers::new(grace)),
        )
    }

    pub async fn join(c: &Coordinator, code: &str, name: &str) -> Player {
        c.join_room(code, name).await.unwrap().1
    }

    /// Pending events on a receiver, in order
    pub fn events(rx: &mut mpsc::Receiver<Outbound>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Event(event) = item {
                out.push(event);
            }
        }
        out
    }
}
