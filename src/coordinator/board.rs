//! Battle maps and token movement

use tracing::debug;

use super::Coordinator;
use crate::error::{CoreError, CoreResult};
use crate::permissions::{Action, TargetContext};
use crate::protocol::ServerEvent;
use crate::store::{GameMap, MapToken, NewMap, NewToken, Player, TokenMove};

fn map_not_found() -> CoreError {
    CoreError::NotFound("Map not found".to_string())
}

fn token_not_found() -> CoreError {
    CoreError::NotFound("Token not found".to_string())
}

impl Coordinator {
    /// Create a map in the GM's room
    pub async fn create_map(&self, identity: &str, fields: &NewMap) -> CoreResult<GameMap> {
        let gm = self
            .authorize(identity, Action::AuthorMap, &TargetContext::none())
            .await?;
        if fields.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("Map name is required".to_string()));
        }
        if fields.width <= 0 || fields.height <= 0 || fields.grid_scale <= 0 {
            return Err(CoreError::InvalidInput(
                "Map dimensions must be positive".to_string(),
            ));
        }

        let map = self.store.create_map(&gm.room_id, fields).await?;
        debug!(map_id = %map.id, room_id = %gm.room_id, "map created");

        self.registry.broadcast(
            &gm.room_id,
            ServerEvent::MapCreated { map: map.clone() },
            Some(identity),
        );
        Ok(map)
    }

    async fn map_in_room(&self, map_id: &str, player: &Player) -> CoreResult<GameMap> {
        self.store
            .map(map_id)
            .await?
            .filter(|m| m.room_id == player.room_id)
            .ok_or_else(map_not_found)
    }

    /// Make `map_id` the room's active map
    pub async fn set_active_map(&self, identity: &str, map_id: &str) -> CoreResult<GameMap> {
        let gm = self
            .authorize(identity, Action::AuthorMap, &TargetContext::none())
            .await?;
        let mut map = self.map_in_room(map_id, &gm).await?;

        self.store.set_active_map(&gm.room_id, &map.id).await?;
        map.is_active = true;

        self.registry.broadcast(
            &gm.room_id,
            ServerEvent::MapChanged {
                map_id: map.id.clone(),
            },
            None,
        );
        Ok(map)
    }

    /// Place a token. A linked character must belong to the same room.
    pub async fn add_token(
        &self,
        identity: &str,
        map_id: &str,
        fields: &NewToken,
    ) -> CoreResult<MapToken> {
        let gm = self
            .authorize(identity, Action::AuthorMap, &TargetContext::none())
            .await?;
        let map = self.map_in_room(map_id, &gm).await?;

        if let Some(character_id) = &fields.character_id {
            if self
                .store
                .character_in_room(character_id, &gm.room_id)
                .await?
                .is_none()
            {
                return Err(CoreError::InvalidInput(
                    "Character not found in this session".to_string(),
                ));
            }
        }

        let token = self.store.add_token(&map.id, fields).await?;
        self.registry.broadcast(
            &gm.room_id,
            ServerEvent::TokenAdded {
                token: token.clone(),
            },
            Some(identity),
        );
        Ok(token)
    }

    async fn token_in_room(&self, token_id: &str, player: &Player) -> CoreResult<MapToken> {
        let token = self
            .store
            .token(token_id)
            .await?
            .ok_or_else(token_not_found)?;
        match self.store.map(&token.map_id).await? {
            Some(map) if map.room_id == player.room_id => Ok(token),
            _ => Err(token_not_found()),
        }
    }

    /// Move a token.
    ///
    /// The GM may move anything; a player needs the movement flag and may
    /// only move tokens linked to their own characters.
    pub async fn move_token(
        &self,
        identity: &str,
        token_id: &str,
        to: TokenMove,
    ) -> CoreResult<MapToken> {
        let player = self.resolve(identity).await?;
        let mut token = self.token_in_room(token_id, &player).await?;

        let owner = match &token.character_id {
            Some(character_id) => self
                .store
                .character(character_id)
                .await?
                .map(|c| c.player_id),
            None => None,
        };
        let target = match &owner {
            Some(owner_id) => TargetContext::owned_by(owner_id),
            None => TargetContext::none(),
        };
        self.authorize(identity, Action::MoveToken, &target).await?;

        self.store.move_token(&token.id, to).await?;
        token.x = to.x;
        token.y = to.y;

        self.registry.broadcast(
            &player.room_id,
            ServerEvent::TokenUpdated {
                map_id: token.map_id.clone(),
                token_id: token.id.clone(),
                changes: to,
            },
            Some(identity),
        );
        Ok(token)
    }

    /// Remove a token from its map
    pub async fn delete_token(&self, identity: &str, token_id: &str) -> CoreResult<()> {
        let gm = self
            .authorize(identity, Action::AuthorMap, &TargetContext::none())
            .await?;
        let token = self.token_in_room(token_id, &gm).await?;
        if !self.store.delete_token(&token.id).await? {
            return Err(token_not_found());
        }

        self.registry.broadcast(
            &gm.room_id,
            ServerEvent::TokenRemoved {
                map_id: token.map_id,
                token_id: token.id,
            },
            None,
        );
        Ok(())
    }
}
