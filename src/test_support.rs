// Shared fixtures for the unit tests. Compiled only for `cargo test`;
// the integration suite under tests/ carries its own copy of these
// helpers because it cannot see crate-private modules.

use anyhow::Result;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::{Config, MasterLink};
use crate::context::AppContext;
use crate::error::SyncError;
use crate::propagate::SyncTransport;
use crate::session::SessionHandle;
use crate::store::{MemoryMemberStore, MemorySyncStore};
use crate::wire::Envelope;

pub fn test_config(secret: &str) -> Config {
    Config {
        port: 0,
        site_url: "https://self.example/api/v1/sync".to_string(),
        sync_enabled: true,
        secret: secret.to_string(),
        master: None,
        database_url: "postgres://unused".to_string(),
        http_timeout_secs: 1,
        retry_poll_interval_secs: 1,
        log_hash_salt: "test-salt".to_string(),
        rust_log: "info".to_string(),
    }
}

/// Session capability that records every effect instead of touching a
/// real cookie store.
#[derive(Default)]
pub struct RecordingSession {
    pub logins: Mutex<Vec<Uuid>>,
    pub destroys: AtomicUsize,
}

#[async_trait::async_trait]
impl SessionHandle for RecordingSession {
    async fn set_subject(&self, member_id: Uuid) -> Result<()> {
        self.logins.lock().await.push(member_id);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted transport: pops pre-loaded replies, records every call.
/// With no scripted reply it answers SUCCESS.
#[derive(Default)]
pub struct StubTransport {
    pub replies: Mutex<VecDeque<Result<Envelope, SyncError>>>,
    pub calls: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl StubTransport {
    pub async fn push_reply(&self, reply: Result<Envelope, SyncError>) {
        self.replies.lock().await.push_back(reply);
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait::async_trait]
impl SyncTransport for StubTransport {
    async fn call(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Envelope, SyncError> {
        self.calls
            .lock()
            .await
            .push((endpoint.to_string(), params.clone()));
        match self.replies.lock().await.pop_front() {
            Some(reply) => reply,
            None => Ok(Envelope::status_only(crate::wire::STATUS_SUCCESS)),
        }
    }
}

pub struct TestHarness {
    pub ctx: AppContext,
    pub members: Arc<MemoryMemberStore>,
    pub sessions: Arc<RecordingSession>,
    pub transport: Arc<StubTransport>,
}

pub fn harness(secret: &str) -> TestHarness {
    harness_with_config(test_config(secret))
}

pub fn harness_with_config(config: Config) -> TestHarness {
    let members = Arc::new(MemoryMemberStore::new());
    let sessions = Arc::new(RecordingSession::default());
    let transport = Arc::new(StubTransport::default());
    let ctx = AppContext::new(
        Arc::new(config),
        Arc::new(MemorySyncStore::new()),
        members.clone(),
        sessions.clone(),
        transport.clone(),
    );
    TestHarness {
        ctx,
        members,
        sessions,
        transport,
    }
}

pub fn test_context(secret: &str) -> AppContext {
    harness(secret).ctx
}

pub fn test_context_with_master(secret: &str, master_url: &str) -> AppContext {
    let mut config = test_config(secret);
    config.master = Some(MasterLink {
        url: master_url.to_string(),
    });
    harness_with_config(config).ctx
}
