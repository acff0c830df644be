// ============================================================================
// Action Handlers
// ============================================================================
//
// - registry: slave registration and deregistration
// - account: inbound account-lifecycle mutations (machine calls)
// - session: the interactive login/logout redirect chain
//
// Machine handlers return `SyncResult<Map>`; the dispatcher folds the
// map into the SUCCESS envelope or converts the error into its status
// code. Session handlers build full HTTP responses (redirects and
// rendered pages) themselves.
//
// ============================================================================

pub mod account;
pub mod registry;
pub mod session;
