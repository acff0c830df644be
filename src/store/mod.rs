// ============================================================================
// Sync Store
// ============================================================================
//
// Durable state owned by the protocol itself:
// - slave_sites: the registry of subscribed peers (never hard-deleted,
//   only disabled)
// - pending_deliveries: the retry queue of failed propagations
// - sync_state: one denormalized row holding the enabled-peer count
//   (the sole input to the role-confusion gate) and the retry flag
//
// The trait allows multiple implementations:
// - PostgreSQL (standalone binary)
// - in-memory (tests, single-process embeddings)
//
// ============================================================================

mod memory;
mod postgres;

pub use memory::{MemoryMemberStore, MemorySyncStore};
pub use postgres::PostgresSyncStore;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One subscribed peer installation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SlaveSite {
    pub id: Uuid,
    /// Unique canonical sync endpoint of the peer.
    pub url: String,
    /// Per-peer shared secret, set at registration and overwritten on
    /// re-registration.
    pub secret: String,
    pub enabled: bool,
    pub last_access: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// One failed propagation awaiting retry. The payload is the fully
/// rendered parameter map with `KEY_PLACEHOLDER` in the key slot; the
/// actual key is recomputed from the peer's current secret at send
/// time, so a re-registered peer does not invalidate its queue.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingDelivery {
    pub id: Uuid,
    pub slave_id: Uuid,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Literal stored in the queued payload where the per-peer key belongs.
pub const KEY_PLACEHOLDER: &str = "__KEY__";

#[async_trait::async_trait]
pub trait SyncStore: Send + Sync {
    /// Upsert a peer by url: replace the secret and re-enable.
    async fn upsert_slave(&self, url: &str, secret: &str) -> Result<SlaveSite>;

    async fn slave_by_url(&self, url: &str) -> Result<Option<SlaveSite>>;

    async fn slave_by_id(&self, id: Uuid) -> Result<Option<SlaveSite>>;

    /// Enabled peers in registry (creation) order. The chain cursor
    /// indexes into this ordering.
    async fn list_enabled(&self) -> Result<Vec<SlaveSite>>;

    /// Flip the enabled flag. Returns false when no such peer exists.
    /// Callers recount afterwards; concurrent flips are last-write-wins.
    async fn set_enabled(&self, url: &str, enabled: bool) -> Result<bool>;

    /// Recompute and cache the enabled-peer count.
    async fn recount_enabled(&self) -> Result<i64>;

    /// Cached enabled-peer count (denormalized, O(1)).
    async fn enabled_count(&self) -> Result<i64>;

    /// Record peer liveness on any inbound call from a known peer.
    async fn touch_last_access(&self, url: &str) -> Result<()>;

    async fn enqueue_pending(&self, slave_id: Uuid, payload: serde_json::Value) -> Result<()>;

    /// Oldest-first slice of the retry queue.
    async fn pending_oldest(&self, limit: i64) -> Result<Vec<PendingDelivery>>;

    async fn delete_pending(&self, id: Uuid) -> Result<()>;

    /// Drop the whole queue for one peer (used when the peer reports
    /// itself disabled). Returns the number of rows removed.
    async fn delete_pending_for_slave(&self, slave_id: Uuid) -> Result<u64>;

    async fn set_retry_enabled(&self, enabled: bool) -> Result<()>;
    async fn retry_enabled(&self) -> Result<bool>;
}
