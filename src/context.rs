use std::sync::Arc;

use crate::config::Config;
use crate::member::MemberStore;
use crate::propagate::{MutationPropagator, SyncTransport};
use crate::session::SessionHandle;
use crate::store::SyncStore;
use crate::wire::Action;

/// Hook run by the master when a chain walk has visited every peer,
/// right before the final redirect to the caller's destination.
pub type ChainCompleteHook = Arc<dyn Fn(Action, &str) + Send + Sync>;

/// Application context containing shared dependencies.
/// Everything here is immutable per request; request state lives in
/// [`crate::request::RequestContext`].
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn SyncStore>,
    pub members: Arc<dyn MemberStore>,
    pub sessions: Arc<dyn SessionHandle>,
    pub transport: Arc<dyn SyncTransport>,
    pub chain_complete: Option<ChainCompleteHook>,
}

impl AppContext {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn SyncStore>,
        members: Arc<dyn MemberStore>,
        sessions: Arc<dyn SessionHandle>,
        transport: Arc<dyn SyncTransport>,
    ) -> Self {
        Self {
            config,
            store,
            members,
            sessions,
            transport,
            chain_complete: None,
        }
    }

    pub fn with_chain_complete(mut self, hook: ChainCompleteHook) -> Self {
        self.chain_complete = Some(hook);
        self
    }

    /// Fan-out entry point for the host application: call this after a
    /// local account mutation has committed.
    pub fn propagator(&self) -> MutationPropagator {
        MutationPropagator::new(
            self.config.clone(),
            self.store.clone(),
            self.transport.clone(),
        )
    }
}
