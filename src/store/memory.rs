use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{PendingDelivery, SlaveSite, SyncStore};
use crate::member::{Member, MemberStore};

/// In-memory implementation of [`SyncStore`]. Backs the test suite and
/// single-process embeddings that keep their registry elsewhere.
#[derive(Default)]
pub struct MemorySyncStore {
    slaves: RwLock<Vec<SlaveSite>>,
    pending: RwLock<Vec<PendingDelivery>>,
    enabled_count: AtomicI64,
    retry_enabled: AtomicBool,
}

impl MemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SyncStore for MemorySyncStore {
    async fn upsert_slave(&self, url: &str, secret: &str) -> Result<SlaveSite> {
        let mut slaves = self.slaves.write().await;
        let now = Utc::now();
        if let Some(existing) = slaves.iter_mut().find(|s| s.url == url) {
            existing.secret = secret.to_string();
            existing.enabled = true;
            existing.last_access = now;
            return Ok(existing.clone());
        }
        let site = SlaveSite {
            id: Uuid::new_v4(),
            url: url.to_string(),
            secret: secret.to_string(),
            enabled: true,
            last_access: now,
            created_at: now,
        };
        slaves.push(site.clone());
        Ok(site)
    }

    async fn slave_by_url(&self, url: &str) -> Result<Option<SlaveSite>> {
        Ok(self
            .slaves
            .read()
            .await
            .iter()
            .find(|s| s.url == url)
            .cloned())
    }

    async fn slave_by_id(&self, id: Uuid) -> Result<Option<SlaveSite>> {
        Ok(self
            .slaves
            .read()
            .await
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn list_enabled(&self) -> Result<Vec<SlaveSite>> {
        let mut enabled: Vec<SlaveSite> = self
            .slaves
            .read()
            .await
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect();
        enabled.sort_by_key(|s| (s.created_at, s.id));
        Ok(enabled)
    }

    async fn set_enabled(&self, url: &str, enabled: bool) -> Result<bool> {
        let mut slaves = self.slaves.write().await;
        match slaves.iter_mut().find(|s| s.url == url) {
            Some(site) => {
                site.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn recount_enabled(&self) -> Result<i64> {
        let count = self.slaves.read().await.iter().filter(|s| s.enabled).count() as i64;
        self.enabled_count.store(count, Ordering::SeqCst);
        Ok(count)
    }

    async fn enabled_count(&self) -> Result<i64> {
        Ok(self.enabled_count.load(Ordering::SeqCst))
    }

    async fn touch_last_access(&self, url: &str) -> Result<()> {
        let mut slaves = self.slaves.write().await;
        if let Some(site) = slaves.iter_mut().find(|s| s.url == url) {
            site.last_access = Utc::now();
        }
        Ok(())
    }

    async fn enqueue_pending(&self, slave_id: Uuid, payload: serde_json::Value) -> Result<()> {
        self.pending.write().await.push(PendingDelivery {
            id: Uuid::new_v4(),
            slave_id,
            payload,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn pending_oldest(&self, limit: i64) -> Result<Vec<PendingDelivery>> {
        let mut pending = self.pending.read().await.clone();
        pending.sort_by_key(|p| (p.created_at, p.id));
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn delete_pending(&self, id: Uuid) -> Result<()> {
        self.pending.write().await.retain(|p| p.id != id);
        Ok(())
    }

    async fn delete_pending_for_slave(&self, slave_id: Uuid) -> Result<u64> {
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|p| p.slave_id != slave_id);
        Ok((before - pending.len()) as u64)
    }

    async fn set_retry_enabled(&self, enabled: bool) -> Result<()> {
        self.retry_enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    async fn retry_enabled(&self) -> Result<bool> {
        Ok(self.retry_enabled.load(Ordering::SeqCst))
    }
}

/// In-memory member store for tests and demos.
#[derive(Default)]
pub struct MemoryMemberStore {
    members: RwLock<Vec<Member>>,
}

impl MemoryMemberStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, member: Member) {
        self.members.write().await.push(member);
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl MemberStore for MemoryMemberStore {
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Member>> {
        Ok(self
            .members
            .read()
            .await
            .iter()
            .find(|m| m.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Member>> {
        Ok(self
            .members
            .read()
            .await
            .iter()
            .find(|m| m.username == username)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Member>> {
        Ok(self
            .members
            .read()
            .await
            .iter()
            .find(|m| m.email == email)
            .cloned())
    }

    async fn create(&self, member: &Member) -> Result<()> {
        self.members.write().await.push(member.clone());
        Ok(())
    }

    async fn save(&self, member: &Member) -> Result<()> {
        let mut members = self.members.write().await;
        if let Some(existing) = members.iter_mut().find(|m| m.id == member.id) {
            *existing = member.clone();
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.members.write().await.retain(|m| m.id != id);
        Ok(())
    }

    async fn merge(&self, source: Uuid, dest: Uuid) -> Result<()> {
        let _ = dest;
        self.delete(source).await
    }
}
