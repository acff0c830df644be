// ============================================================================
// Wire Protocol
// ============================================================================
//
// Everything both ends of the protocol must agree on: the action names,
// the status codes, and the JSON envelope shape. Machine responses are
// always `{"status": <CODE>, ...fields}`; interactive hops answer with
// HTTP redirects instead and never reach this envelope.
//
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_BAD_KEY: &str = "BAD_KEY";
pub const STATUS_DISABLED: &str = "DISABLED";
pub const STATUS_INVALID_ACTION: &str = "INVALID_ACTION";
pub const STATUS_NOT_FOUND: &str = "NOT_FOUND";

/// Every action the endpoint dispatches. The original system probed for
/// handler methods by name at runtime; this enum is the explicit
/// registered map replacing that, with unregistered names rejected
/// identically (INVALID_ACTION).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    VerifySettings,
    Login,
    Logout,
    Register,
    Validate,
    Ban,
    Merge,
    ChangeEmail,
    ChangePassword,
    ChangeName,
    Delete,
}

impl Action {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "verifySettings" => Some(Action::VerifySettings),
            "login" => Some(Action::Login),
            "logout" => Some(Action::Logout),
            "register" => Some(Action::Register),
            "validate" => Some(Action::Validate),
            "ban" => Some(Action::Ban),
            "merge" => Some(Action::Merge),
            "changeEmail" => Some(Action::ChangeEmail),
            "changePassword" => Some(Action::ChangePassword),
            "changeName" => Some(Action::ChangeName),
            "delete" => Some(Action::Delete),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::VerifySettings => "verifySettings",
            Action::Login => "login",
            Action::Logout => "logout",
            Action::Register => "register",
            Action::Validate => "validate",
            Action::Ban => "ban",
            Action::Merge => "merge",
            Action::ChangeEmail => "changeEmail",
            Action::ChangePassword => "changePassword",
            Action::ChangeName => "changeName",
            Action::Delete => "delete",
        }
    }

    /// Session-affecting actions travel as browser redirect chains; the
    /// rest are plain server-to-server calls.
    pub fn is_session(self) -> bool {
        matches!(self, Action::Login | Action::Logout)
    }

    /// Actions whose key is subject-scoped rather than global.
    pub fn requires_subject(self) -> bool {
        !matches!(self, Action::VerifySettings)
    }

    /// Actions that are not naturally idempotent: on replay, "subject
    /// already absent" counts as applied.
    pub fn absent_subject_is_applied(self) -> bool {
        matches!(self, Action::Merge | Action::Delete)
    }
}

/// The JSON status envelope. Extra fields from a successful handler are
/// flattened next to the status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub status: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Envelope {
    pub fn success(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            fields,
        }
    }

    pub fn status_only(status: &str) -> Self {
        Self {
            status: status.to_string(),
            fields: serde_json::Map::new(),
        }
    }

    pub fn from_error(err: &SyncError) -> Self {
        Self::status_only(err.status_code())
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    pub fn is_disabled(&self) -> bool {
        self.status == STATUS_DISABLED
    }
}
