use crate::job::JobStatus;
use crate::kind::JobKind;
use crate::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Unknown job kind: {0}")]
    UnknownKind(String),

    #[error("Kind '{kind}' requires input slot '{slot}'")]
    MissingInput { kind: JobKind, slot: String },

    #[error("Kind '{kind}' has no input slot '{slot}'")]
    UnexpectedInput { kind: JobKind, slot: String },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: JobId },

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
