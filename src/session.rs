// ============================================================================
// Session Capability
// ============================================================================
//
// Session cookies are origin-scoped and owned by the host application,
// so the protocol never touches ambient session state. Handlers receive
// this capability object and call it for the two effects the chain
// needs: establish a session for a subject, or destroy whatever session
// exists.
//
// Both operations are idempotent by contract: setting the same subject
// twice is harmless, destroying an absent session is a no-op.
//
// ============================================================================

use anyhow::Result;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait SessionHandle: Send + Sync {
    /// Bind the current browser session to the given local member.
    async fn set_subject(&self, member_id: Uuid) -> Result<()>;

    /// Destroy the current browser session unconditionally.
    async fn destroy(&self) -> Result<()>;
}

/// Headless handle for relay-only deployments: the standalone binary
/// has no cookie store of its own, so session effects are logged and
/// dropped. Embedding applications supply a real implementation.
pub struct HeadlessSession;

#[async_trait::async_trait]
impl SessionHandle for HeadlessSession {
    async fn set_subject(&self, member_id: Uuid) -> Result<()> {
        tracing::debug!(member_id = %member_id, "Headless deployment: session effect dropped");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        tracing::debug!("Headless deployment: session destroy dropped");
        Ok(())
    }
}
