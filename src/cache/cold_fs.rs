//! Directory-backed cold store: one JSON file per key.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use super::clock::{Clock, SystemClock, duration_millis};
use super::cold::{ColdRecord, ColdStore};
use crate::error::ColdStoreError;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    /// Unix milliseconds after which the file may be discarded.
    kept_until_ms: u64,
    record: ColdRecord,
}

#[derive(Debug, Clone)]
pub struct FsColdStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FsColdStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ColdStoreError> {
        Self::open_with_clock(root, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        root: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ColdStoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root, clock })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", hash_key(key)))
    }

    async fn discard(&self, path: &Path) -> Result<(), ColdStoreError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl ColdStore for FsColdStore {
    async fn get(&self, key: &str) -> Result<Option<ColdRecord>, ColdStoreError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let envelope: Envelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Discarding unreadable cold record");
                self.discard(&path).await?;
                return Ok(None);
            }
        };

        if envelope.version != FORMAT_VERSION
            || envelope.kept_until_ms <= self.clock.now_millis()
        {
            self.discard(&path).await?;
            return Ok(None);
        }
        if envelope.record.key != key {
            return Ok(None);
        }
        Ok(Some(envelope.record))
    }

    async fn set(
        &self,
        key: &str,
        record: &ColdRecord,
        ttl: Duration,
    ) -> Result<(), ColdStoreError> {
        let envelope = Envelope {
            version: FORMAT_VERSION,
            kept_until_ms: self
                .clock
                .now_millis()
                .saturating_add(duration_millis(ttl)),
            record: record.clone(),
        };
        let bytes = serde_json::to_vec(&envelope)?;

        let path = self.path_for(key);
        let tmp = path.with_extension(format!("{:016x}.tmp", fastrand::u64(..)));
        fs::write(&tmp, &bytes).await?;
        if let Err(err) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ColdStoreError> {
        self.discard(&self.path_for(key)).await
    }
}

fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::cold::tests::sample_record;

    async fn open(clock: &ManualClock) -> (TempDir, FsColdStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = FsColdStore::open_with_clock(dir.path().join("cold"), Arc::new(clock.clone()))
            .await
            .expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let clock = ManualClock::new(50_000);
        let (dir, store) = open(&clock).await;
        let record = sample_record("https://example.com/a?x=1", &clock);

        store
            .set(&record.key, &record, Duration::from_secs(3600))
            .await
            .expect("set");

        let reopened = FsColdStore::open_with_clock(store.root().to_path_buf(), Arc::new(clock))
            .await
            .expect("reopen");
        let loaded = reopened.get(&record.key).await.expect("get");
        assert_eq!(loaded, Some(record));
        drop(dir);
    }

    #[tokio::test]
    async fn expired_files_are_removed_on_read() {
        let clock = ManualClock::new(50_000);
        let (_dir, store) = open(&clock).await;
        let record = sample_record("k", &clock);
        store
            .set("k", &record, Duration::from_secs(10))
            .await
            .expect("set");
        let path = store.path_for("k");
        assert!(path.exists());

        clock.advance(Duration::from_secs(11));
        assert!(store.get("k").await.expect("get").is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn corrupt_files_read_as_missing() {
        let clock = ManualClock::new(50_000);
        let (_dir, store) = open(&clock).await;
        std::fs::write(store.path_for("k"), b"{not json").expect("write garbage");

        assert!(store.get("k").await.expect("get").is_none());
        assert!(!store.path_for("k").exists());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let clock = ManualClock::new(50_000);
        let (_dir, store) = open(&clock).await;
        let record = sample_record("k", &clock);
        store
            .set("k", &record, Duration::from_secs(10))
            .await
            .expect("set");

        store.delete("k").await.expect("first delete");
        store.delete("k").await.expect("second delete");
        assert!(store.get("k").await.expect("get").is_none());
    }

    #[test]
    fn keys_hash_to_stable_file_names() {
        assert_eq!(hash_key("a"), hash_key("a"));
        assert_ne!(hash_key("a"), hash_key("b"));
        assert_eq!(hash_key("a").len(), 64);
    }
}
