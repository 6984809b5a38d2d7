//! Character operations

use tracing::debug;

use super::Coordinator;
use crate::error::{CoreError, CoreResult};
use crate::permissions::{Action, TargetContext};
use crate::protocol::ServerEvent;
use crate::store::{Character, CharacterPatch, NewCharacter, Player};

fn character_not_found() -> CoreError {
    CoreError::NotFound("Character not found".to_string())
}

impl Coordinator {
    /// Create a character owned by the actor
    pub async fn create_character(
        &self,
        identity: &str,
        fields: &NewCharacter,
    ) -> CoreResult<Character> {
        let player = self
            .authorize(identity, Action::CreateCharacter, &TargetContext::none())
            .await?;
        if fields.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("Character name is required".to_string()));
        }

        let character = self.store.create_character(&player.id, fields).await?;
        debug!(character_id = %character.id, player_id = %player.id, "character created");

        self.registry.broadcast(
            &player.room_id,
            ServerEvent::CharacterCreated {
                character: character.clone(),
            },
            Some(identity),
        );
        Ok(character)
    }

    /// Characters in the actor's room
    pub async fn room_characters(&self, identity: &str) -> CoreResult<Vec<Character>> {
        let player = self.resolve(identity).await?;
        Ok(self.store.room_characters(&player.room_id).await?)
    }

    async fn owned_character(
        &self,
        identity: &str,
        character_id: &str,
        action: Action,
    ) -> CoreResult<(Player, Character)> {
        let player = self.resolve(identity).await?;
        let character = self
            .store
            .character_in_room(character_id, &player.room_id)
            .await?
            .ok_or_else(character_not_found)?;

        self.authorize(
            identity,
            action,
            &TargetContext::owned_by(&character.player_id),
        )
        .await?;
        Ok((player, character))
    }

    /// Update a character (owner or GM).
    ///
    /// A change to current HP is also announced as `hp_changed` with the
    /// absolute difference.
    pub async fn update_character(
        &self,
        identity: &str,
        character_id: &str,
        patch: &CharacterPatch,
    ) -> CoreResult<Character> {
        let (player, mut character) = self
            .owned_character(identity, character_id, Action::ModifyCharacter)
            .await?;
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(CoreError::InvalidInput("Character name is required".to_string()));
        }

        let hp_delta = patch.apply(&mut character);
        self.store.update_character(&character).await?;

        self.registry.broadcast(
            &player.room_id,
            ServerEvent::CharacterUpdated {
                character: character.clone(),
            },
            Some(identity),
        );
        if hp_delta != 0 {
            self.registry.broadcast(
                &player.room_id,
                ServerEvent::hp_delta(&character.id, character.current_hp, hp_delta),
                Some(identity),
            );
        }
        Ok(character)
    }

    /// Delete a character (owner or GM)
    pub async fn delete_character(&self, identity: &str, character_id: &str) -> CoreResult<()> {
        let (player, character) = self
            .owned_character(identity, character_id, Action::DeleteCharacter)
            .await?;
        if !self.store.delete_character(&character.id).await? {
            return Err(character_not_found());
        }

        self.registry.broadcast(
            &player.room_id,
            ServerEvent::CharacterDeleted {
                character_id: character.id,
            },
            Some(identity),
        );
        Ok(())
    }
}
