// ============================================================================
// Endpoint Dispatcher
// ============================================================================
//
// The protocol's single HTTP address. The `action` query parameter
// selects a handler through the explicit [`Action`] map; there is no
// reflection over handler names. Order of business per request:
//
// 1. parse the parameters into an immutable RequestContext
// 2. if the call is a relay (`slaveCall=1`) and this installation has
//    sync switched off, answer DISABLED so the master deregisters us
// 3. dispatch; unknown actions answer INVALID_ACTION
// 4. whatever happened, touch the calling peer's last_access
//
// ============================================================================

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::audit::{AuditEvent, AuditEventType};
use crate::context::AppContext;
use crate::error::SyncError;
use crate::handlers;
use crate::request::{RequestContext, SyncParams};
use crate::store::SyncStore;
use crate::wire::{Action, Envelope, STATUS_DISABLED};

pub fn create_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/sync", get(sync_endpoint).post(sync_endpoint))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

fn envelope_response(envelope: Envelope) -> Response {
    (StatusCode::OK, Json(envelope)).into_response()
}

async fn sync_endpoint(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<SyncParams>,
    headers: HeaderMap,
) -> Response {
    let rc = RequestContext::from_params(params);

    tracing::debug!(
        action = %rc.action,
        slave_call = rc.slave_call,
        slave_return = rc.slave_return,
        caller = rc.caller_url.as_deref().unwrap_or("-"),
        "Inbound sync call"
    );

    let response = dispatch(&ctx, &rc, &headers).await;

    // Peer liveness: every outcome counts as contact, including the
    // failed ones.
    if let Some(caller) = rc.caller_url.as_deref() {
        if let Err(err) = ctx.store.touch_last_access(caller).await {
            tracing::warn!(peer = %caller, error = %err, "Failed to update peer last_access");
        }
    }

    response
}

async fn dispatch(ctx: &AppContext, rc: &RequestContext, headers: &HeaderMap) -> Response {
    // Re-check our own participation from local configuration before
    // looking at anything else a relay sent us.
    if rc.slave_call && !ctx.config.sync_enabled {
        return envelope_response(Envelope::status_only(STATUS_DISABLED));
    }

    let Some(action) = Action::from_name(&rc.action) else {
        AuditEvent::new(AuditEventType::InvalidAction)
            .peer(rc.caller_url.as_deref().unwrap_or("-"))
            .detail(rc.action.clone())
            .emit(rc.slave_call);
        return envelope_response(Envelope::status_only(
            SyncError::InvalidAction(rc.action.clone()).status_code(),
        ));
    };

    if action.is_session() {
        return handlers::session::handle_session(ctx, action, rc, headers).await;
    }

    let result = match action {
        Action::VerifySettings => handlers::registry::verify_settings(ctx, rc).await,
        _ => handlers::account::handle_mutation(ctx, action, rc).await,
    };

    match result {
        Ok(fields) => envelope_response(Envelope::success(fields)),
        Err(err) => {
            if matches!(err, SyncError::Internal(_)) {
                tracing::error!(action = action.name(), error = %err, "Handler failed");
            } else {
                tracing::debug!(action = action.name(), error = %err, "Handler rejected call");
            }
            envelope_response(Envelope::from_error(&err))
        }
    }
}
