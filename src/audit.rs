// ============================================================================
// Audit Logging
// ============================================================================
//
// Append-only record of security-relevant and state-changing events.
// Events are structured (JSON fields via tracing) and identifiers are
// hashed before they reach any log sink.
//
// Channel policy: authentication failures and durable state changes go
// to the standard channel so operators can monitor cross-site activity.
// Traffic that is itself a relayed slave call is demoted to debug, to
// avoid the same event being logged once per installation in the mesh.
//
// ============================================================================

use chrono::Utc;
use serde::Serialize;

use crate::utils::log_safe_id;

pub const AUDIT_TARGET: &str = "crosslink::audit";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    /// Inbound call presented a missing or wrong key
    AuthenticationFailure,
    /// Request direction inconsistent with this node's role
    RoleConflict,
    /// Session established through a chain hop
    SessionLogin,
    /// Session destroyed through a chain hop
    SessionLogout,
    /// Slave registered or re-registered
    SlaveRegistered,
    /// Slave disabled (explicit or self-reported)
    SlaveDisabled,
    /// Account mutation applied locally on behalf of a peer
    MutationApplied,
    /// Mutation queued for retry after a failed delivery
    DeliveryQueued,
    /// Queued delivery confirmed and removed
    DeliveryConfirmed,
    /// Unknown action name received
    InvalidAction,
}

/// One audit record. Serialized field-by-field into the tracing event
/// rather than as a blob, so downstream filters can match on any field.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event_type: AuditEventType,
    /// Salted hash of the subject identifier, if the event has one.
    pub subject_hash: Option<String>,
    /// Peer endpoint involved, if any.
    pub peer_url: Option<String>,
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type,
            subject_hash: None,
            peer_url: None,
            detail: None,
        }
    }

    pub fn subject(mut self, id: &str, salt: &str) -> Self {
        self.subject_hash = Some(log_safe_id(id, salt));
        self
    }

    pub fn peer(mut self, url: &str) -> Self {
        self.peer_url = Some(url.to_string());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Emit the event. `relayed` is true when the triggering request
    /// was itself a slave call; those go to the debug channel only.
    pub fn emit(self, relayed: bool) {
        let event_type = format!("{:?}", self.event_type);
        let subject = self.subject_hash.as_deref().unwrap_or("-");
        let peer = self.peer_url.as_deref().unwrap_or("-");
        let detail = self.detail.as_deref().unwrap_or("");

        if relayed {
            tracing::debug!(
                target: AUDIT_TARGET,
                event_type = %event_type,
                subject = %subject,
                peer = %peer,
                detail = %detail,
                "audit"
            );
        } else {
            tracing::info!(
                target: AUDIT_TARGET,
                event_type = %event_type,
                subject = %subject,
                peer = %peer,
                detail = %detail,
                "audit"
            );
        }
    }
}
