//! Controller error types.

use thiserror::Error;

use seatgrid_state::StateError;
use seatgrid_switchover::{Rejection, SwitchoverConflict};

/// Errors surfaced by reconciliation and switchover requests.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Conflict(#[from] SwitchoverConflict),

    /// Directory unavailable after bounded retries; the pass was abandoned.
    #[error("directory unavailable: {0}")]
    Transient(String),

    #[error("state store error: {0}")]
    State(StateError),
}

impl From<StateError> for ControllerError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(key) => Self::NotFound(key),
            StateError::Invalid(msg) => Self::Validation(msg),
            e if e.is_transient() => Self::Transient(e.to_string()),
            e => Self::State(e),
        }
    }
}

impl From<Rejection> for ControllerError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Conflict(conflict) => Self::Conflict(conflict),
            other => Self::Validation(other.to_string()),
        }
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_errors_map_onto_taxonomy() {
        assert!(matches!(
            ControllerError::from(StateError::NotFound("ns/a".into())),
            ControllerError::NotFound(_)
        ));
        assert!(matches!(
            ControllerError::from(StateError::Invalid("bad".into())),
            ControllerError::Validation(_)
        ));
        assert!(matches!(
            ControllerError::from(StateError::Write("disk".into())),
            ControllerError::Transient(_)
        ));
        assert!(matches!(
            ControllerError::from(StateError::Deserialize("junk".into())),
            ControllerError::State(_)
        ));
    }

    #[test]
    fn rejections_map_onto_taxonomy() {
        let conflict = SwitchoverConflict {
            target: "b".into(),
            blocking_instance: "a".into(),
            connected_players: Some(2),
        };
        assert!(matches!(
            ControllerError::from(Rejection::Conflict(conflict)),
            ControllerError::Conflict(_)
        ));
        assert!(matches!(
            ControllerError::from(Rejection::ScheduledForDeletion("b".into())),
            ControllerError::Validation(_)
        ));
    }
}
