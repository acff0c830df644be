// ============================================================================
// Mutation Propagator
// ============================================================================
//
// Server-to-server fan-out of non-session account mutations. Fired by
// the host application once a local mutation has committed, and only
// when the triggering call was not itself a slave call (otherwise every
// delivery would re-trigger a propagation, ping-ponging through the
// mesh forever).
//
// Delivery is at-least-once: a failed peer gets a PendingDelivery row
// and the retry worker takes over. The user's own local action already
// succeeded by the time we run, so no failure here is ever surfaced to
// them.
//
// ============================================================================

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditEvent, AuditEventType};
use crate::config::Config;
use crate::error::SyncError;
use crate::keys::subject_key;
use crate::member::IdType;
use crate::store::{SyncStore, KEY_PLACEHOLDER};
use crate::utils::log_safe_id;
use crate::wire::{Action, Envelope};

/// Outbound transport seam. The production implementation is reqwest
/// with a bounded timeout; tests substitute a scripted one.
#[async_trait::async_trait]
pub trait SyncTransport: Send + Sync {
    async fn call(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Envelope, SyncError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl SyncTransport for HttpTransport {
    async fn call(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Envelope, SyncError> {
        let response = self
            .client
            .post(endpoint)
            .query(params)
            .send()
            .await
            .map_err(|e| SyncError::Remote(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::Remote(format!(
                "peer answered HTTP {}",
                response.status()
            )));
        }

        response
            .json::<Envelope>()
            .await
            .map_err(|e| SyncError::Remote(format!("malformed envelope: {}", e)))
    }
}

/// One completed local mutation, ready to fan out. `subject_id` is this
/// (master) installation's identity id for the account; slaves resolve
/// it through their external identity link.
#[derive(Debug, Clone)]
pub enum MutationEvent {
    Register {
        subject_id: String,
        username: String,
        email: String,
        password_hash: String,
    },
    Validate {
        subject_id: String,
    },
    Ban {
        subject_id: String,
        /// True lifts the ban instead of imposing it.
        remove: bool,
    },
    Merge {
        subject_id: String,
        dest_id: String,
    },
    ChangeEmail {
        subject_id: String,
        email: String,
    },
    ChangePassword {
        subject_id: String,
        password_hash: String,
    },
    ChangeName {
        subject_id: String,
        name: String,
    },
    Delete {
        subject_id: String,
    },
}

impl MutationEvent {
    pub fn action(&self) -> Action {
        match self {
            MutationEvent::Register { .. } => Action::Register,
            MutationEvent::Validate { .. } => Action::Validate,
            MutationEvent::Ban { .. } => Action::Ban,
            MutationEvent::Merge { .. } => Action::Merge,
            MutationEvent::ChangeEmail { .. } => Action::ChangeEmail,
            MutationEvent::ChangePassword { .. } => Action::ChangePassword,
            MutationEvent::ChangeName { .. } => Action::ChangeName,
            MutationEvent::Delete { .. } => Action::Delete,
        }
    }

    pub fn subject_id(&self) -> &str {
        match self {
            MutationEvent::Register { subject_id, .. }
            | MutationEvent::Validate { subject_id }
            | MutationEvent::Ban { subject_id, .. }
            | MutationEvent::Merge { subject_id, .. }
            | MutationEvent::ChangeEmail { subject_id, .. }
            | MutationEvent::ChangePassword { subject_id, .. }
            | MutationEvent::ChangeName { subject_id, .. }
            | MutationEvent::Delete { subject_id } => subject_id,
        }
    }

    /// Render the parameter map with the key placeholder. This exact
    /// map is what a PendingDelivery row stores; the real key is
    /// substituted per peer at send time.
    pub fn to_params(&self, site_url: &str) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("action".to_string(), self.action().name().to_string());
        params.insert("slaveCall".to_string(), "1".to_string());
        params.insert("key".to_string(), KEY_PLACEHOLDER.to_string());
        params.insert("id".to_string(), self.subject_id().to_string());
        params.insert("idType".to_string(), IdType::Username.to_wire().to_string());
        params.insert("url".to_string(), site_url.to_string());

        match self {
            MutationEvent::Register {
                username,
                email,
                password_hash,
                ..
            } => {
                params.insert("username".to_string(), username.clone());
                params.insert("email".to_string(), email.clone());
                params.insert("password".to_string(), password_hash.clone());
            }
            MutationEvent::Ban { remove, .. } => {
                params.insert(
                    "remove".to_string(),
                    if *remove { "1" } else { "0" }.to_string(),
                );
            }
            MutationEvent::Merge { dest_id, .. } => {
                params.insert("destId".to_string(), dest_id.clone());
            }
            MutationEvent::ChangeEmail { email, .. } => {
                params.insert("email".to_string(), email.clone());
            }
            MutationEvent::ChangePassword { password_hash, .. } => {
                params.insert("password".to_string(), password_hash.clone());
            }
            MutationEvent::ChangeName { name, .. } => {
                params.insert("name".to_string(), name.clone());
            }
            MutationEvent::Validate { .. } | MutationEvent::Delete { .. } => {}
        }

        params
    }
}

/// Where a mutation came from, for the ping-pong guard and the
/// "don't call the originator back" filter.
#[derive(Debug, Clone, Default)]
pub struct MutationOrigin {
    pub slave_call: bool,
    pub caller_url: Option<String>,
}

/// Substitute the per-peer key into a rendered parameter map.
pub fn render_key(
    params: &BTreeMap<String, String>,
    peer_secret: &str,
    action: Action,
    subject_id: &str,
) -> BTreeMap<String, String> {
    let mut out = params.clone();
    let key = if action.requires_subject() {
        subject_key(peer_secret, subject_id)
    } else {
        peer_secret.to_string()
    };
    out.insert("key".to_string(), key);
    out
}

pub struct MutationPropagator {
    config: Arc<Config>,
    store: Arc<dyn SyncStore>,
    transport: Arc<dyn SyncTransport>,
}

impl MutationPropagator {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn SyncStore>,
        transport: Arc<dyn SyncTransport>,
    ) -> Self {
        Self {
            config,
            store,
            transport,
        }
    }

    /// Fan a completed mutation out to every enabled peer except the
    /// origin. Never fails the caller: unreachable peers land in the
    /// retry queue.
    pub async fn propagate(&self, event: &MutationEvent, origin: &MutationOrigin) -> Result<()> {
        if origin.slave_call {
            tracing::debug!(
                action = event.action().name(),
                "Mutation arrived as a slave call; not re-propagating"
            );
            return Ok(());
        }

        let salt = &self.config.log_hash_salt;
        let params = event.to_params(&self.config.site_url);

        for slave in self.store.list_enabled().await? {
            if slave.url == self.config.site_url {
                continue;
            }
            if origin.caller_url.as_deref() == Some(slave.url.as_str()) {
                continue;
            }

            let send = render_key(&params, &slave.secret, event.action(), event.subject_id());

            match self.transport.call(&slave.url, &send).await {
                Ok(env) if env.is_success() => {
                    tracing::debug!(
                        action = event.action().name(),
                        peer = %slave.url,
                        subject = %log_safe_id(event.subject_id(), salt),
                        "Mutation delivered"
                    );
                }
                Ok(env) if env.is_disabled() => {
                    // The peer told us it no longer participates; honor
                    // the self-report and drop its queue.
                    self.store.set_enabled(&slave.url, false).await?;
                    self.store.recount_enabled().await?;
                    self.store.delete_pending_for_slave(slave.id).await?;
                    AuditEvent::new(AuditEventType::SlaveDisabled)
                        .peer(&slave.url)
                        .detail("peer self-reported DISABLED")
                        .emit(false);
                }
                Ok(env) => {
                    self.queue_for_retry(&slave.id, &params, &slave.url, &env.status)
                        .await?;
                }
                Err(err) => {
                    self.queue_for_retry(&slave.id, &params, &slave.url, &err.to_string())
                        .await?;
                }
            }
        }

        Ok(())
    }

    async fn queue_for_retry(
        &self,
        slave_id: &uuid::Uuid,
        params: &BTreeMap<String, String>,
        peer_url: &str,
        reason: &str,
    ) -> Result<()> {
        self.store
            .enqueue_pending(*slave_id, serde_json::to_value(params)?)
            .await?;
        self.store.set_retry_enabled(true).await?;
        AuditEvent::new(AuditEventType::DeliveryQueued)
            .peer(peer_url)
            .detail(reason.to_string())
            .emit(false);
        Ok(())
    }
}
