//! Write-behind from the hot store to the cold tier.
//!
//! Writes happen on background tasks tracked by the cache so that `purge`,
//! `dump` and `flush` can wait for them.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::clock::duration_millis;
use super::cold::ColdRecord;
use super::entry::{Entry, EntryState};
use super::lock::mutex_lock;
use super::metrics::{record_cold_write, record_eviction};
use super::orchestrator::CacheInner;
use super::store::Eviction;

const SOURCE: &str = "cache::tiering";

impl CacheInner {
    /// Hot-store eviction listener.
    pub(crate) fn on_evicted(self: &Arc<Self>, key: &str, entry: Arc<Entry>, cause: Eviction) {
        record_eviction(cause);
        if matches!(cause, Eviction::Capacity | Eviction::Cleared) {
            self.schedule_write_behind(key, &entry);
        }
    }

    /// Offer `entry` to the cold tier. Returns `true` if a write was started.
    pub(crate) fn schedule_write_behind(self: &Arc<Self>, key: &str, entry: &Arc<Entry>) -> bool {
        let Some(cold) = self.cold.clone() else {
            return false;
        };
        let EntryState::Ready(response) = entry.state() else {
            return false;
        };
        let Some(policy) = entry.policy() else {
            return false;
        };

        let ttl = self.policy.time_to_live(&policy);
        if ttl < self.config.cold_min_ttl {
            debug!(key, ttl_ms = duration_millis(ttl), "Not worth persisting to cold tier");
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(key, "No async runtime; skipping cold write");
            return false;
        };
        if !entry.claim_cold_write() {
            return false;
        }

        let record = ColdRecord {
            key: key.to_string(),
            response: response.as_ref().clone(),
            policy: policy.as_ref().clone(),
            expires_at_ms: self
                .clock
                .now_millis()
                .saturating_add(duration_millis(ttl)),
        };
        let entry = Arc::clone(entry);
        let task = runtime.spawn(async move {
            match cold.set(&record.key, &record, ttl).await {
                Ok(()) => {
                    record_cold_write(true);
                    debug!(key = %record.key, cache = "cold", outcome = "stored", "Cold write complete");
                }
                Err(err) => {
                    entry.release_cold_write();
                    record_cold_write(false);
                    warn!(
                        key = %record.key,
                        cache = "cold",
                        error = %err,
                        "Cold write failed"
                    );
                }
            }
        });
        self.track(task);
        true
    }

    /// Best-effort removal of a cold record that is no longer usable.
    pub(crate) fn schedule_cold_delete(&self, key: &str) {
        let Some(cold) = self.cold.clone() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let key = key.to_string();
        let task = runtime.spawn(async move {
            if let Err(err) = cold.delete(&key).await {
                warn!(key = %key, cache = "cold", error = %err, "Cold delete failed");
            }
        });
        self.track(task);
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut pending = mutex_lock(&self.pending, SOURCE, "track");
        pending.retain(|task| !task.is_finished());
        pending.push(task);
    }

    /// Wait for every cold-tier task, including ones started while waiting.
    pub(crate) async fn flush(&self) {
        loop {
            let tasks = std::mem::take(&mut *mutex_lock(&self.pending, SOURCE, "flush"));
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(err) = task.await {
                    warn!(error = %err, "Cold tier task did not complete");
                }
            }
        }
    }
}
