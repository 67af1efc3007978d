use thiserror::Error;

use crate::models::SessionStatus;

pub type DeskResult<T> = Result<T, DeskError>;

#[derive(Error, Debug)]
pub enum DeskError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Failed to save changes: {0}")]
    PersistenceFailure(String),

    #[error("Cannot {action} session {id}: it is {status}")]
    InvalidTransition {
        id: String,
        status: SessionStatus,
        action: &'static str,
    },

    #[error("Session {id} is being completed; try again")]
    Completing { id: String },

    #[error("Invalid request: {0}")]
    Validation(String),
}

impl DeskError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        DeskError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn persistence(err: anyhow::Error) -> Self {
        DeskError::PersistenceFailure(format!("{err:#}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DeskError::NotFound { .. })
    }
}
