// ============================================================================
// Retry Worker
// ============================================================================
//
// Drains the pending_deliveries queue. A row is deleted only once its
// delivery is confirmed:
//
// - SUCCESS from the peer                         -> confirmed
// - NOT_FOUND for a replayed merge/delete         -> confirmed (the
//   subject being gone is what a completed merge/delete looks like)
// - DISABLED from the peer                        -> peer disabled and
//   its whole queue dropped
// - anything else (timeout, bad envelope, error)  -> row stays for the
//   next cycle
//
// Keys are recomputed from the peer's *current* secret at send time;
// the stored payload only ever holds the placeholder. Once the queue is
// empty the retry flag is cleared and the loop goes back to idling.
//
// ============================================================================

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditEvent, AuditEventType};
use crate::config::Config;
use crate::propagate::{render_key, SyncTransport};
use crate::store::{PendingDelivery, SyncStore};
use crate::wire::{Action, STATUS_NOT_FOUND};

const BATCH_SIZE: i64 = 100;

/// What happened to one queued delivery. Controls whether the row is
/// removed, mirroring "commit only on confirmed delivery".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryOutcome {
    Confirmed,
    PeerDisabled,
    Left,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryStats {
    pub confirmed: u64,
    pub left: u64,
    pub peers_disabled: u64,
}

pub struct RetryWorker {
    config: Arc<Config>,
    store: Arc<dyn SyncStore>,
    transport: Arc<dyn SyncTransport>,
}

impl RetryWorker {
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

    /// Run forever. Each tick is independent; a failed pass is logged
    /// and retried on the next interval.
    pub async fn run(self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.retry_poll_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.config.retry_poll_interval_secs,
            "Retry worker started"
        );

        loop {
            interval.tick().await;
            match self.store.retry_enabled().await {
                Ok(false) => continue,
                Ok(true) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "Retry worker could not read its flag");
                    continue;
                }
            }
            if let Err(err) = self.process_queue().await {
                tracing::warn!(error = %err, "Retry pass failed");
            }
        }
    }

    /// One pass over the queue, oldest first.
    pub async fn process_queue(&self) -> Result<RetryStats> {
        let mut stats = RetryStats::default();

        for pending in self.store.pending_oldest(BATCH_SIZE).await? {
            match self.deliver(&pending).await? {
                RetryOutcome::Confirmed => {
                    self.store.delete_pending(pending.id).await?;
                    stats.confirmed += 1;
                }
                RetryOutcome::PeerDisabled => {
                    stats.peers_disabled += 1;
                }
                RetryOutcome::Left => {
                    stats.left += 1;
                }
            }
        }

        // Nothing left: stop waking up for an empty table.
        if self.store.pending_oldest(1).await?.is_empty() {
            self.store.set_retry_enabled(false).await?;
        }

        if stats != RetryStats::default() {
            tracing::info!(
                confirmed = stats.confirmed,
                left = stats.left,
                peers_disabled = stats.peers_disabled,
                "Retry pass finished"
            );
        }

        Ok(stats)
    }

    async fn deliver(&self, pending: &PendingDelivery) -> Result<RetryOutcome> {
        let Some(slave) = self.store.slave_by_id(pending.slave_id).await? else {
            // Registry row gone entirely; nothing to deliver to.
            return Ok(RetryOutcome::Confirmed);
        };
        if !slave.enabled {
            // Disabled peers re-register before they expect new state;
            // their backlog is void.
            self.store.delete_pending_for_slave(slave.id).await?;
            return Ok(RetryOutcome::PeerDisabled);
        }

        let params: std::collections::BTreeMap<String, String> =
            serde_json::from_value(pending.payload.clone())?;
        let action = params
            .get("action")
            .and_then(|name| Action::from_name(name));
        let Some(action) = action else {
            tracing::warn!(delivery = %pending.id, "Dropping queued payload with unknown action");
            return Ok(RetryOutcome::Confirmed);
        };
        let subject_id = params.get("id").cloned().unwrap_or_default();

        let send = render_key(&params, &slave.secret, action, &subject_id);

        let reply = self.transport.call(&slave.url, &send).await;
        match reply {
            Ok(env) if env.is_success() => {
                AuditEvent::new(AuditEventType::DeliveryConfirmed)
                    .peer(&slave.url)
                    .detail(action.name())
                    .emit(false);
                Ok(RetryOutcome::Confirmed)
            }
            Ok(env)
                if env.status == STATUS_NOT_FOUND && action.absent_subject_is_applied() =>
            {
                // The destructive operation already happened on an
                // earlier delivery; the missing subject is the proof.
                AuditEvent::new(AuditEventType::DeliveryConfirmed)
                    .peer(&slave.url)
                    .detail(format!("{} (subject already absent)", action.name()))
                    .emit(false);
                Ok(RetryOutcome::Confirmed)
            }
            Ok(env) if env.is_disabled() => {
                self.store.set_enabled(&slave.url, false).await?;
                self.store.recount_enabled().await?;
                self.store.delete_pending_for_slave(slave.id).await?;
                AuditEvent::new(AuditEventType::SlaveDisabled)
                    .peer(&slave.url)
                    .detail("peer self-reported DISABLED during retry")
                    .emit(false);
                Ok(RetryOutcome::PeerDisabled)
            }
            Ok(env) => {
                tracing::debug!(
                    peer = %slave.url,
                    status = %env.status,
                    "Queued delivery still refused"
                );
                Ok(RetryOutcome::Left)
            }
            Err(err) => {
                tracing::debug!(peer = %slave.url, error = %err, "Peer still unreachable");
                Ok(RetryOutcome::Left)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::propagate::{MutationEvent, MutationOrigin, MutationPropagator};
    use crate::test_support::harness;
    use crate::wire::{Envelope, STATUS_DISABLED, STATUS_SUCCESS};

    async fn queue_one_failure(h: &crate::test_support::TestHarness) {
        h.ctx
            .store
            .upsert_slave("https://a.example/sync", "a-secret")
            .await
            .unwrap();
        h.ctx.store.recount_enabled().await.unwrap();

        let propagator = MutationPropagator::new(
            h.ctx.config.clone(),
            h.ctx.store.clone(),
            h.transport.clone(),
        );
        h.transport
            .push_reply(Err(SyncError::Remote("timeout".into())))
            .await;
        propagator
            .propagate(
                &MutationEvent::Delete {
                    subject_id: "7".into(),
                },
                &MutationOrigin::default(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn success_confirms_and_clears_the_flag() {
        let h = harness("secret");
        queue_one_failure(&h).await;
        assert!(h.ctx.store.retry_enabled().await.unwrap());

        let worker =
            RetryWorker::new(h.ctx.config.clone(), h.ctx.store.clone(), h.transport.clone());
        h.transport
            .push_reply(Ok(Envelope::status_only(STATUS_SUCCESS)))
            .await;
        let stats = worker.process_queue().await.unwrap();

        assert_eq!(stats.confirmed, 1);
        assert!(h.ctx.store.pending_oldest(10).await.unwrap().is_empty());
        assert!(!h.ctx.store.retry_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn not_found_on_replayed_delete_counts_as_confirmed() {
        let h = harness("secret");
        queue_one_failure(&h).await;

        let worker =
            RetryWorker::new(h.ctx.config.clone(), h.ctx.store.clone(), h.transport.clone());
        h.transport
            .push_reply(Ok(Envelope::status_only(STATUS_NOT_FOUND)))
            .await;
        let stats = worker.process_queue().await.unwrap();
        assert_eq!(stats.confirmed, 1);
    }

    #[tokio::test]
    async fn transient_failure_leaves_the_row_queued() {
        let h = harness("secret");
        queue_one_failure(&h).await;

        let worker =
            RetryWorker::new(h.ctx.config.clone(), h.ctx.store.clone(), h.transport.clone());
        h.transport
            .push_reply(Err(SyncError::Remote("still down".into())))
            .await;
        let stats = worker.process_queue().await.unwrap();

        assert_eq!(stats.left, 1);
        assert_eq!(h.ctx.store.pending_oldest(10).await.unwrap().len(), 1);
        // Queue not empty: the flag stays up.
        assert!(h.ctx.store.retry_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn disabled_self_report_drops_the_peer_and_its_queue() {
        let h = harness("secret");
        queue_one_failure(&h).await;

        let worker =
            RetryWorker::new(h.ctx.config.clone(), h.ctx.store.clone(), h.transport.clone());
        h.transport
            .push_reply(Ok(Envelope::status_only(STATUS_DISABLED)))
            .await;
        worker.process_queue().await.unwrap();

        let slave = h
            .ctx
            .store
            .slave_by_url("https://a.example/sync")
            .await
            .unwrap()
            .unwrap();
        assert!(!slave.enabled);
        assert_eq!(h.ctx.store.enabled_count().await.unwrap(), 0);
        assert!(h.ctx.store.pending_oldest(10).await.unwrap().is_empty());
    }
}
