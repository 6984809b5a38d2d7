//! Errors surfaced by room operations

use thiserror::Error;

use crate::combat::CombatError;
use crate::dice::DiceError;
use crate::permissions::PermissionResult;

/// Errors returned by the session coordinator.
///
/// Everything except `Storage` is a client-visible rejection: no state was
/// changed and nothing was broadcast.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid token")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Dice(#[from] DiceError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl CoreError {
    /// True for failures the client caused; false for internal faults
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CoreError::Storage(_))
    }
}

impl From<CombatError> for CoreError {
    fn from(err: CombatError) -> Self {
        match err {
            CombatError::ParticipantNotFound => CoreError::NotFound(err.to_string()),
            CombatError::NoActiveParticipants | CombatError::Ended => {
                CoreError::Rejected(err.to_string())
            }
        }
    }
}

impl PermissionResult {
    /// Convert a denial into a `Forbidden` error
    pub fn into_result(self) -> Result<(), CoreError> {
        match self {
            PermissionResult::Allowed => Ok(()),
            PermissionResult::Denied(reason) => Err(CoreError::Forbidden(reason)),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
