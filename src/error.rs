// ============================================================================
// Error Types
// ============================================================================
//
// Error taxonomy for the synchronization protocol:
// - BadKey: missing or incorrect authentication key
// - NotFound: no such member or peer
// - RoleConflict: request direction inconsistent with this node's role
// - Disabled: this installation no longer participates in sync
// - InvalidAction: unregistered action name
// - MissingField: required request parameter absent
// - Remote: peer unreachable / malformed reply (outbound path only)
//
// Every variant maps to a stable wire status code carried in the JSON
// envelope, so remote peers can branch on it without parsing messages.
//
// ============================================================================

use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("missing or incorrect key")]
    BadKey,

    #[error("subject not found")]
    NotFound,

    #[error("role conflict: {0}")]
    RoleConflict(String),

    #[error("synchronization disabled on this installation")]
    Disabled,

    #[error("unknown action: {0}")]
    InvalidAction(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("remote peer unavailable: {0}")]
    Remote(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SyncError {
    /// Wire status code for the JSON envelope.
    pub fn status_code(&self) -> &'static str {
        match self {
            SyncError::BadKey => "BAD_KEY",
            SyncError::NotFound => "NOT_FOUND",
            SyncError::RoleConflict(_) => "ROLE_CONFLICT",
            SyncError::Disabled => "DISABLED",
            SyncError::InvalidAction(_) => "INVALID_ACTION",
            SyncError::MissingField(_) => "MISSING_FIELD",
            SyncError::Remote(_) => "REMOTE_UNAVAILABLE",
            SyncError::Internal(_) => "ERROR",
        }
    }
}
