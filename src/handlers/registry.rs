// ============================================================================
// Slave Registry Handlers
// ============================================================================

use serde_json::{json, Map, Value};

use crate::audit::{AuditEvent, AuditEventType};
use crate::context::AppContext;
use crate::error::{SyncError, SyncResult};
use crate::keys;
use crate::request::RequestContext;
use crate::store::SyncStore;

/// `verifySettings`: a peer announces itself as our slave.
///
/// Global-tier key: registration is gated by this installation's own
/// secret, shared with the peer's admin out of band. The payload
/// carries the per-peer secret we will use for every future call
/// toward that slave; re-registration overwrites it.
pub async fn verify_settings(
    ctx: &AppContext,
    rc: &RequestContext,
) -> SyncResult<Map<String, Value>> {
    if !keys::verify_global(&rc.key, &ctx.config.secret) {
        AuditEvent::new(AuditEventType::AuthenticationFailure)
            .peer(rc.caller_url.as_deref().unwrap_or("-"))
            .detail("verifySettings with bad global key")
            .emit(false);
        return Err(SyncError::BadKey);
    }

    // A node must not accept new slaves while being one itself; letting
    // it would invert the mesh's roles one registration at a time.
    if ctx.config.is_slave() {
        AuditEvent::new(AuditEventType::RoleConflict)
            .peer(rc.caller_url.as_deref().unwrap_or("-"))
            .detail("registration attempted on a slave installation")
            .emit(false);
        return Err(SyncError::RoleConflict(
            "this installation is itself a slave".to_string(),
        ));
    }

    let url = rc
        .caller_url
        .as_deref()
        .ok_or(SyncError::MissingField("url"))?;
    let secret = rc
        .extras
        .secret
        .as_deref()
        .ok_or(SyncError::MissingField("secret"))?;

    let site = ctx.store.upsert_slave(url, secret).await?;
    ctx.store.recount_enabled().await?;

    AuditEvent::new(AuditEventType::SlaveRegistered)
        .peer(&site.url)
        .emit(false);

    let mut fields = Map::new();
    fields.insert("url".to_string(), json!(ctx.config.site_url));
    Ok(fields)
}

/// Disable a peer without deleting it. Used by the admin surface and by
/// the propagation path when a peer self-reports DISABLED. Its queued
/// deliveries go with it; a disabled peer will re-register before it
/// expects new state.
pub async fn disable_slave(ctx: &AppContext, url: &str) -> SyncResult<()> {
    let Some(site) = ctx.store.slave_by_url(url).await? else {
        return Err(SyncError::NotFound);
    };

    ctx.store.set_enabled(url, false).await?;
    ctx.store.recount_enabled().await?;
    ctx.store.delete_pending_for_slave(site.id).await?;

    AuditEvent::new(AuditEventType::SlaveDisabled)
        .peer(url)
        .detail("explicitly disabled")
        .emit(false);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_context, test_context_with_master};

    fn register_request(key: &str, url: &str, secret: &str) -> RequestContext {
        let mut rc = RequestContext::from_params(Default::default());
        rc.action = "verifySettings".to_string();
        rc.key = key.to_string();
        rc.caller_url = Some(url.to_string());
        rc.extras.secret = Some(secret.to_string());
        rc
    }

    #[tokio::test]
    async fn registration_upserts_and_recounts() {
        let ctx = test_context("master-secret");
        let rc = register_request("master-secret", "https://b.example/sync", "b-secret");

        let fields = verify_settings(&ctx, &rc).await.unwrap();
        assert_eq!(fields["url"], ctx.config.site_url.as_str());
        assert_eq!(ctx.store.enabled_count().await.unwrap(), 1);

        // Re-registration replaces the secret.
        let rc = register_request("master-secret", "https://b.example/sync", "b-secret-2");
        verify_settings(&ctx, &rc).await.unwrap();
        let site = ctx
            .store
            .slave_by_url("https://b.example/sync")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(site.secret, "b-secret-2");
        assert_eq!(ctx.store.enabled_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn registration_requires_the_global_key() {
        let ctx = test_context("master-secret");
        let rc = register_request("wrong", "https://b.example/sync", "b-secret");
        assert!(matches!(
            verify_settings(&ctx, &rc).await,
            Err(SyncError::BadKey)
        ));
    }

    #[tokio::test]
    async fn a_slave_refuses_to_collect_slaves_of_its_own() {
        let ctx = test_context_with_master("own-secret", "https://master.example/sync");
        let rc = register_request("own-secret", "https://c.example/sync", "c-secret");
        assert!(matches!(
            verify_settings(&ctx, &rc).await,
            Err(SyncError::RoleConflict(_))
        ));
    }

    #[tokio::test]
    async fn disable_keeps_the_row_but_drops_its_queue() {
        let ctx = test_context("master-secret");
        let site = ctx
            .store
            .upsert_slave("https://b.example/sync", "s")
            .await
            .unwrap();
        ctx.store.recount_enabled().await.unwrap();
        ctx.store
            .enqueue_pending(site.id, serde_json::json!({"action": "ban"}))
            .await
            .unwrap();

        disable_slave(&ctx, "https://b.example/sync").await.unwrap();

        let site = ctx
            .store
            .slave_by_url("https://b.example/sync")
            .await
            .unwrap()
            .unwrap();
        assert!(!site.enabled);
        assert_eq!(ctx.store.enabled_count().await.unwrap(), 0);
        assert!(ctx.store.pending_oldest(10).await.unwrap().is_empty());
    }
}
