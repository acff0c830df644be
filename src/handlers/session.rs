// ============================================================================
// Session Chain Handlers (login / logout)
// ============================================================================
//
// The interactive side of the protocol. Three kinds of hit land here:
//
// - chain entry: the host application bounced the browser to us after a
//   local login/logout; we apply the local effect and start the walk
// - slave hop (`slaveCall=1`): a master is walking us; apply the local
//   effect and bounce straight back to the provided `returnTo`
// - continuation (`slaveReturn=1`): the browser is back from a slave;
//   advance the cursor or finish the chain
//
// Role gate before anything touches a session: a node with enabled
// slaves can never legitimately be walked as a leaf, and a node with
// none has no business starting a walk.
//
// ============================================================================

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};

use crate::audit::{AuditEvent, AuditEventType};
use crate::chain::{self, ChainState};
use crate::context::AppContext;
use crate::keys;
use crate::member::resolve_subject;
use crate::request::RequestContext;
use crate::session::SessionHandle;
use crate::store::SyncStore;
use crate::utils::log_safe_id;
use crate::wire::Action;

const ERROR_PAGE: &str = "<!DOCTYPE html>\n<html><head><title>Synchronization error</title></head>\
<body><h1>Synchronization error</h1>\
<p>This sign-on request could not be completed. Please return to the site you came from and try again.</p>\
</body></html>";

const DONE_PAGE: &str = "<!DOCTYPE html>\n<html><head><title>Signed on</title></head>\
<body><p>Synchronization complete. You can close this window.</p></body></html>";

fn error_page() -> Response {
    (StatusCode::FORBIDDEN, Html(ERROR_PAGE)).into_response()
}

fn internal_error_page(err: anyhow::Error) -> Response {
    tracing::error!(error = %err, "Session chain failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Html(ERROR_PAGE)).into_response()
}

pub async fn handle_session(
    ctx: &AppContext,
    action: Action,
    rc: &RequestContext,
    headers: &HeaderMap,
) -> Response {
    let enabled_count = match ctx.store.enabled_count().await {
        Ok(count) => count,
        Err(err) => return internal_error_page(err),
    };

    if rc.slave_call {
        slave_hop(ctx, action, rc, headers, enabled_count).await
    } else if rc.slave_return {
        continuation(ctx, action, rc, headers).await
    } else {
        chain_entry(ctx, action, rc, headers, enabled_count).await
    }
}

/// A master is walking this node as one of its slaves.
async fn slave_hop(
    ctx: &AppContext,
    action: Action,
    rc: &RequestContext,
    headers: &HeaderMap,
    enabled_count: i64,
) -> Response {
    // A node with enabled slaves of its own is a master, and a master
    // being walked as a leaf means someone is confusing the roles.
    if enabled_count > 0 {
        AuditEvent::new(AuditEventType::RoleConflict)
            .peer(rc.caller_url.as_deref().unwrap_or("-"))
            .detail("slaveCall received while this node has enabled slaves")
            .emit(false);
        return error_page();
    }

    let Some(subject_id) = rc.subject_id.as_deref() else {
        return error_page();
    };

    if !keys::verify_subject(&rc.key, &ctx.config.secret, subject_id) {
        return auth_failure_bounce(ctx, rc, headers);
    }

    if let Err(err) = apply_local_effect(ctx, action, rc, subject_id).await {
        return internal_error_page(err);
    }

    // The cursor is the master's alone; this node just bounces back.
    match rc.return_to.as_deref() {
        Some(return_to) => Redirect::to(return_to).into_response(),
        None => error_page(),
    }
}

/// The browser came back from a slave; continue the walk.
async fn continuation(
    ctx: &AppContext,
    action: Action,
    rc: &RequestContext,
    headers: &HeaderMap,
) -> Response {
    let Some(subject_id) = rc.subject_id.as_deref() else {
        return error_page();
    };
    if !keys::verify_subject(&rc.key, &ctx.config.secret, subject_id) {
        return auth_failure_bounce(ctx, rc, headers);
    }
    // The local effect already happened on entry; no session mutation
    // on a continuation hit.
    advance_chain(ctx, action, rc, subject_id).await
}

/// The host application started a login/logout walk.
async fn chain_entry(
    ctx: &AppContext,
    action: Action,
    rc: &RequestContext,
    headers: &HeaderMap,
    enabled_count: i64,
) -> Response {
    // A leaf has no peers to walk; an entry hit on one is a protocol
    // error, not a no-op.
    if enabled_count == 0 {
        AuditEvent::new(AuditEventType::RoleConflict)
            .peer(rc.caller_url.as_deref().unwrap_or("-"))
            .detail("chain entry on a node with no enabled slaves")
            .emit(false);
        return error_page();
    }

    let Some(subject_id) = rc.subject_id.as_deref() else {
        return error_page();
    };

    if !keys::verify_subject(&rc.key, &ctx.config.secret, subject_id) {
        return auth_failure_bounce(ctx, rc, headers);
    }

    if let Err(err) = apply_local_effect(ctx, action, rc, subject_id).await {
        return internal_error_page(err);
    }

    advance_chain(ctx, action, rc, subject_id).await
}

/// Set or destroy the local session. An unknown subject skips the
/// effect without aborting the chain; logout destroys unconditionally.
async fn apply_local_effect(
    ctx: &AppContext,
    action: Action,
    rc: &RequestContext,
    subject_id: &str,
) -> anyhow::Result<()> {
    let salt = &ctx.config.log_hash_salt;
    match action {
        Action::Login => {
            match resolve_subject(ctx.members.as_ref(), subject_id, rc.id_type).await? {
                Some(member) if !member.banned => {
                    ctx.sessions.set_subject(member.id).await?;
                    AuditEvent::new(AuditEventType::SessionLogin)
                        .subject(subject_id, salt)
                        .emit(rc.slave_call);
                }
                Some(_) => {
                    tracing::debug!(
                        subject = %log_safe_id(subject_id, salt),
                        "Login hop for a banned member; session not set"
                    );
                }
                None => {
                    tracing::debug!(
                        subject = %log_safe_id(subject_id, salt),
                        "Login hop for an unknown member; continuing the chain"
                    );
                }
            }
        }
        Action::Logout => {
            ctx.sessions.destroy().await?;
            AuditEvent::new(AuditEventType::SessionLogout)
                .subject(subject_id, salt)
                .emit(rc.slave_call);
        }
        _ => unreachable!("only session actions reach the chain"),
    }
    Ok(())
}

/// Pick the first enabled slave at or after the cursor and redirect the
/// browser there; with the list exhausted, run the completion hook and
/// send the browser home.
async fn advance_chain(
    ctx: &AppContext,
    action: Action,
    rc: &RequestContext,
    subject_id: &str,
) -> Response {
    let slaves = match ctx.store.list_enabled().await {
        Ok(slaves) => slaves,
        Err(err) => return internal_error_page(err),
    };
    let slaves: Vec<_> = slaves
        .into_iter()
        .filter(|s| s.url != ctx.config.site_url)
        .filter(|s| Some(s.url.as_str()) != rc.caller_url.as_deref())
        .collect();

    let state = ChainState {
        action,
        subject_id,
        id_type: rc.id_type,
        master_url: &ctx.config.site_url,
        master_secret: &ctx.config.secret,
        caller_url: rc.caller_url.as_deref(),
        // An entry that only supplied returnTo still names a final
        // destination; thread it so it survives every hop.
        orig_return: rc.orig_return.as_deref().or(rc.return_to.as_deref()),
    };

    if let Some(slave) = slaves.get(rc.start) {
        match chain::build_hop(&state, slave, rc.start + 1) {
            Ok(url) => Redirect::to(&url).into_response(),
            Err(err) => internal_error_page(err),
        }
    } else {
        if let Some(hook) = &ctx.chain_complete {
            hook(action, subject_id);
        }
        match rc.orig_return.as_deref().or(rc.return_to.as_deref()) {
            Some(dest) => Redirect::to(dest).into_response(),
            None => (StatusCode::OK, Html(DONE_PAGE)).into_response(),
        }
    }
}

/// Failed key on an interactive hit. Never render details; bounce the
/// browser back only when the referrer's host matches the destination,
/// otherwise show the generic page.
fn auth_failure_bounce(ctx: &AppContext, rc: &RequestContext, headers: &HeaderMap) -> Response {
    AuditEvent::new(AuditEventType::AuthenticationFailure)
        .subject(
            rc.subject_id.as_deref().unwrap_or("-"),
            &ctx.config.log_hash_salt,
        )
        .peer(rc.caller_url.as_deref().unwrap_or("-"))
        .detail(format!("interactive {} with bad key", rc.action))
        .emit(false);

    let referrer = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok());
    let destination = rc.return_to.as_deref().or(rc.orig_return.as_deref());

    match destination {
        Some(dest) if chain::referrer_matches(referrer, dest) => {
            Redirect::to(dest).into_response()
        }
        _ => error_page(),
    }
}
