//! Persistence and retrieval of rendered configs and run artifacts.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{FabricError, Result, StoreError};
use crate::planner::{ConfigDiff, DiffEngine};
use crate::render::RenderedConfig;

use super::lock::{LOCK_KEY, LockInfo, generate_holder_id};
use super::store::ContentStore;

/// Prefix of per-device baselines.
const CONFIGS_PREFIX: &str = "configs";

/// Prefix of run reports.
const RUNS_PREFIX: &str = "runs";

/// Key of the most recent run report.
const LATEST_RUN_KEY: &str = "runs/latest.json";

/// Reads and writes baselines, the run lock and run reports.
#[derive(Clone)]
pub struct ConfigMaterializer {
    store: Arc<dyn ContentStore>,
    diff: Arc<DiffEngine>,
}

impl std::fmt::Debug for ConfigMaterializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigMaterializer")
            .field("backend", &self.store.backend_type())
            .finish_non_exhaustive()
    }
}

/// Store key of a device baseline.
#[must_use]
pub fn config_key(device: &str) -> String {
    format!("{CONFIGS_PREFIX}/{device}.json")
}

impl ConfigMaterializer {
    /// Creates a materializer over a content store.
    #[must_use]
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            diff: Arc::new(DiffEngine::new()),
        }
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    /// Durably records a config as the device baseline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PersistenceFailure`] if the write fails; the
    /// previous baseline, if any, is left intact.
    pub async fn persist(&self, config: &RenderedConfig) -> Result<()> {
        let key = config_key(config.device());
        let content = serde_json::to_vec_pretty(config)
            .map_err(|e| StoreError::serialization(format!("Failed to serialize config: {e}")))?;

        self.store
            .write_atomic(&key, &content)
            .await
            .map_err(|e| match e {
                FabricError::Store(store_error) => FabricError::Store(store_error),
                other => StoreError::persistence(&key, other.to_string()).into(),
            })?;

        info!(
            "Persisted baseline for {} ({})",
            config.device(),
            &config.content_hash()[..8]
        );
        Ok(())
    }

    /// Loads the last persisted config for a device.
    ///
    /// Returns `None` on a first run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the object cannot be decoded and
    /// [`StoreError::PersistenceFailure`] if its stored hash does not match
    /// its content.
    pub async fn load_last(&self, device: &str) -> Result<Option<RenderedConfig>> {
        let key = config_key(device);
        let Some(content) = self.store.read(&key).await? else {
            debug!("No baseline for {device}");
            return Ok(None);
        };

        let config: RenderedConfig = serde_json::from_slice(&content).map_err(|e| {
            FabricError::Store(StoreError::Corrupted {
                key: key.clone(),
                message: format!("Failed to parse baseline: {e}"),
            })
        })?;

        if !config.hash_is_valid() {
            return Err(StoreError::persistence(key, "stored hash does not match content").into());
        }
        Ok(Some(config))
    }

    /// Loads a baseline, treating any unreadable one as absent so the
    /// device gets a full push.
    pub async fn load_baseline(&self, device: &str) -> (Option<RenderedConfig>, Option<String>) {
        match self.load_last(device).await {
            Ok(config) => (config, None),
            Err(e) => {
                warn!("Ignoring baseline for {device}: {e}");
                (None, Some(e.to_string()))
            }
        }
    }

    /// Drops a device baseline so the next run pushes in full.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot delete the object.
    pub async fn invalidate(&self, device: &str) -> Result<()> {
        self.store.delete(&config_key(device)).await
    }

    /// Structural diff between two configs.
    #[must_use]
    pub fn diff(&self, old: Option<&RenderedConfig>, new: &RenderedConfig) -> ConfigDiff {
        self.diff.diff(old, new)
    }

    /// Names of devices with a stored baseline.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub async fn baselines(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list(CONFIGS_PREFIX)
            .await?
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix("configs/")
                    .and_then(|name| name.strip_suffix(".json"))
                    .map(String::from)
            })
            .collect())
    }

    /// Writes the plain-text form of a config to `<dir>/<device>.cfg`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn export_text(&self, config: &RenderedConfig, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.cfg", config.device()));
        tokio::fs::write(&path, config.to_text()).await?;
        debug!("Exported {}", path.display());
        Ok(path)
    }

    /// Saves a run report as `runs/<run_id>.json` and `runs/latest.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or either write fails.
    pub async fn save_report<T: Serialize + Sync>(&self, run_id: &str, report: &T) -> Result<()> {
        let content = serde_json::to_vec_pretty(report)
            .map_err(|e| StoreError::serialization(format!("Failed to serialize report: {e}")))?;
        self.store
            .write_atomic(&format!("{RUNS_PREFIX}/{run_id}.json"), &content)
            .await?;
        self.store.write_atomic(LATEST_RUN_KEY, &content).await
    }

    /// Loads the most recent run report.
    ///
    /// # Errors
    ///
    /// Returns an error if the report exists but cannot be decoded.
    pub async fn latest_report<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let Some(content) = self.store.read(LATEST_RUN_KEY).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&content).map(Some).map_err(|e| {
            StoreError::Corrupted {
                key: String::from(LATEST_RUN_KEY),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Acquires the run lock; an expired lock is taken over.
    ///
    /// The lock object is created with create-new semantics, so of two
    /// runs racing for a free lock exactly one wins. Taking over an expired
    /// lock is confirmed by reading it back.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockedByOther`] if a live lock exists.
    pub async fn acquire_lock(&self, holder: Option<&str>) -> Result<LockInfo> {
        let holder = holder.map_or_else(generate_holder_id, String::from);
        let lock = LockInfo::new(&holder);
        let content = serde_json::to_vec_pretty(&lock)
            .map_err(|e| StoreError::serialization(format!("Failed to serialize lock: {e}")))?;

        if self.create_lock(&content).await? {
            info!("Acquired run lock: {}", lock.lock_id);
            return Ok(lock);
        }

        match self.lock_info().await? {
            Some(existing) if !existing.is_expired() => return Err(locked_by(existing)),
            Some(_) => {
                debug!("Expired lock found, taking over");
                self.store.delete(LOCK_KEY).await?;
            }
            None => {}
        }

        if self.create_lock(&content).await? {
            match self.lock_info().await? {
                Some(current) if current.is_held_by(&lock.lock_id) => {
                    info!("Acquired run lock: {}", lock.lock_id);
                    return Ok(lock);
                }
                Some(current) => return Err(locked_by(current)),
                None => {}
            }
        }

        match self.lock_info().await? {
            Some(current) => Err(locked_by(current)),
            None => Err(StoreError::LockFailed {
                message: String::from("lock changed hands while acquiring"),
            }
            .into()),
        }
    }

    async fn create_lock(&self, content: &[u8]) -> Result<bool> {
        self.store
            .create_new(LOCK_KEY, content)
            .await
            .map_err(|e| {
                StoreError::LockFailed {
                    message: e.to_string(),
                }
                .into()
            })
    }

    /// Releases the run lock if `lock_id` still owns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be read or deleted.
    pub async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.lock_info().await? {
            Some(existing) if existing.is_held_by(lock_id) => {
                self.store.delete(LOCK_KEY).await?;
                info!("Released run lock: {lock_id}");
            }
            Some(existing) => {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
            None => {}
        }
        Ok(())
    }

    /// Removes the run lock regardless of owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be deleted.
    pub async fn force_unlock(&self) -> Result<()> {
        warn!("Force-removing run lock");
        self.store.delete(LOCK_KEY).await
    }

    /// Current lock, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock object cannot be decoded.
    pub async fn lock_info(&self) -> Result<Option<LockInfo>> {
        let Some(content) = self.store.read(LOCK_KEY).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&content).map(Some).map_err(|e| {
            StoreError::Corrupted {
                key: String::from(LOCK_KEY),
                message: format!("Failed to parse lock file: {e}"),
            }
            .into()
        })
    }
}

fn locked_by(existing: LockInfo) -> FabricError {
    StoreError::LockedByOther {
        holder: existing.holder,
        since: existing.acquired_at.to_rfc3339(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Dialect;
    use crate::materializer::LocalContentStore;
    use crate::render::{ConfigBlock, Section};
    use tempfile::TempDir;

    fn create_test_materializer() -> (ConfigMaterializer, TempDir) {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(LocalContentStore::with_base_dir(temp.path()));
        (ConfigMaterializer::new(store), temp)
    }

    fn sample(timeout: u32) -> RenderedConfig {
        RenderedConfig::new(
            "dub-st1-lf1",
            Dialect::Nxos,
            vec![ConfigBlock::new(
                Section::Lines,
                "console",
                vec![String::from("line console"), format!("  exec-timeout {timeout}")],
            )],
        )
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let (materializer, _temp) = create_test_materializer();

        assert!(materializer.load_last("dub-st1-lf1").await.expect("load").is_none());

        let config = sample(15);
        materializer.persist(&config).await.expect("persist");

        let loaded = materializer
            .load_last("dub-st1-lf1")
            .await
            .expect("load")
            .expect("baseline exists");
        assert_eq!(loaded, config);
        assert_eq!(materializer.baselines().await.expect("list"), vec![String::from("dub-st1-lf1")]);
    }

    #[tokio::test]
    async fn test_tampered_baseline_rejected() {
        let (materializer, temp) = create_test_materializer();
        materializer.persist(&sample(15)).await.expect("persist");

        let path = temp.path().join("configs/dub-st1-lf1.json");
        let tampered = std::fs::read_to_string(&path)
            .expect("read")
            .replace("exec-timeout 15", "exec-timeout 99");
        std::fs::write(&path, tampered).expect("write");

        let result = materializer.load_last("dub-st1-lf1").await;
        assert!(matches!(
            result,
            Err(FabricError::Store(StoreError::PersistenceFailure { .. }))
        ));

        let (baseline, warning) = materializer.load_baseline("dub-st1-lf1").await;
        assert!(baseline.is_none());
        assert!(warning.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_forces_first_run() {
        let (materializer, _temp) = create_test_materializer();
        materializer.persist(&sample(15)).await.expect("persist");
        materializer.invalidate("dub-st1-lf1").await.expect("invalidate");

        assert!(materializer.load_last("dub-st1-lf1").await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_export_text() {
        let (materializer, temp) = create_test_materializer();
        let path = materializer
            .export_text(&sample(15), &temp.path().join("export"))
            .await
            .expect("export");

        assert!(path.ends_with("dub-st1-lf1.cfg"));
        let text = std::fs::read_to_string(path).expect("read");
        assert!(text.contains("exec-timeout 15"));
    }

    #[tokio::test]
    async fn test_reports_round_trip() {
        let (materializer, _temp) = create_test_materializer();
        assert!(materializer
            .latest_report::<serde_json::Value>()
            .await
            .expect("load")
            .is_none());

        let report = serde_json::json!({"run_id": "r1", "devices": 3});
        materializer.save_report("r1", &report).await.expect("save");

        let latest: serde_json::Value = materializer
            .latest_report()
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(latest, report);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let (materializer, _temp) = create_test_materializer();

        let attempts: Vec<_> = (0..8)
            .map(|i| {
                let materializer = materializer.clone();
                tokio::spawn(async move { materializer.acquire_lock(Some(&format!("run-{i}"))).await })
            })
            .collect();

        let mut winners = 0;
        for attempt in attempts {
            match attempt.await.expect("join") {
                Ok(_) => winners += 1,
                Err(e) => assert!(
                    matches!(e, FabricError::Store(StoreError::LockedByOther { .. })),
                    "{e}"
                ),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expired_lock_taken_over() {
        let (materializer, _temp) = create_test_materializer();
        let stale = LockInfo::with_ttl("crashed-run", chrono::Duration::seconds(-1));
        materializer
            .store
            .write_atomic(LOCK_KEY, &serde_json::to_vec(&stale).expect("serialize"))
            .await
            .expect("write");

        let lock = materializer.acquire_lock(Some("next-run")).await.expect("take over");
        let current = materializer.lock_info().await.expect("info").expect("held");
        assert!(current.is_held_by(&lock.lock_id));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (materializer, _temp) = create_test_materializer();

        let lock = materializer.acquire_lock(Some("holder-1")).await.expect("acquire");
        assert!(materializer.lock_info().await.expect("info").is_some());

        let conflict = materializer.acquire_lock(Some("holder-2")).await;
        assert!(matches!(
            conflict,
            Err(FabricError::Store(StoreError::LockedByOther { .. }))
        ));

        materializer.release_lock(&lock.lock_id).await.expect("release");
        assert!(materializer.lock_info().await.expect("info").is_none());
    }
}
