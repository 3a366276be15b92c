//! Deployment engine.
//!
//! Each device with a payload runs in its own task: push, read back,
//! verify, retry with backoff, roll back on terminal failure, and persist
//! the new baseline once verified. A failing device never stops the others.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DeployError, SessionError};
use crate::inventory::Device;
use crate::materializer::ConfigMaterializer;
use crate::planner::{BlockedDevice, DevicePlan, PushPayload};
use crate::render::{RenderedConfig, Section};

use super::record::{DeviceRunState, PushRecord, PushResult, RollbackOutcome, StateTrail, VerifyResult};
use super::retry::RetryPolicy;
use super::run_log::RunLog;
use super::session::{DeviceSession, SessionProvider, removed_keys, verify_snapshot};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Retry policy for push and verify failures.
    pub retry: RetryPolicy,
    /// Bound on every session operation.
    pub session_timeout: Duration,
    /// Devices pushed at once.
    pub concurrency: usize,
    /// Restore the prior config after a terminal failure.
    pub rollback_on_failure: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            session_timeout: Duration::from_secs(30),
            concurrency: 8,
            rollback_on_failure: true,
        }
    }
}

/// Everything the engine needs to deploy one device.
#[derive(Debug, Clone)]
pub struct DeviceJob {
    /// Target device.
    pub device: Device,
    /// Planned action and payload.
    pub plan: DevicePlan,
    /// Config to reach.
    pub intended: RenderedConfig,
    /// Baseline, used for rollback.
    pub prior: Option<RenderedConfig>,
}

/// Pushes planned configs to devices and records the outcome.
#[derive(Clone)]
pub struct DeploymentEngine {
    sessions: Arc<dyn SessionProvider>,
    materializer: ConfigMaterializer,
    settings: EngineSettings,
}

impl std::fmt::Debug for DeploymentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentEngine")
            .field("sessions", &self.sessions.provider_type())
            .field("materializer", &self.materializer)
            .field("settings", &self.settings)
            .finish()
    }
}

impl DeploymentEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionProvider>, materializer: ConfigMaterializer, settings: EngineSettings) -> Self {
        Self {
            sessions,
            materializer,
            settings,
        }
    }

    /// Engine settings.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Deploys every job concurrently and returns the run log.
    ///
    /// Blocked devices are recorded first and never touched. Records are
    /// appended as devices complete.
    pub async fn run(&self, jobs: Vec<DeviceJob>, blocked: &[BlockedDevice], cancel: &CancellationToken) -> RunLog {
        let log = RunLog::new();
        for device in blocked {
            warn!("Skipping {}: {} error(s)", device.device, device.errors.len());
            log.append(PushRecord::blocked(&device.device, &device.errors))
                .await;
        }

        info!("Deploying {} device(s), concurrency {}", jobs.len(), self.settings.concurrency);

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for job in jobs {
            let engine = self.clone();
            let log = log.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let record = engine.deploy_device(job, &semaphore, &cancel).await;
                log.append(record).await;
            });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "device task panicked");
            }
        }

        log
    }

    /// Runs one device to a terminal state.
    async fn deploy_device(&self, job: DeviceJob, semaphore: &Semaphore, cancel: &CancellationToken) -> PushRecord {
        let mut trail = StateTrail::new(&job.device.name);
        let mut record = PushRecord {
            device: job.device.name.clone(),
            attempted: false,
            attempts: 0,
            prior_hash: job.prior.as_ref().map(|p| p.content_hash().to_string()),
            new_hash: Some(job.intended.content_hash().to_string()),
            result: PushResult::Failure,
            verification: VerifyResult::NotRun,
            error: None,
            states: Vec::new(),
            rollback: None,
            persisted: false,
            completed_at: chrono::Utc::now(),
        };

        if let Err(e) = self
            .drive(&job, &mut trail, &mut record, semaphore, cancel)
            .await
        {
            error!("{e}");
            record.result = PushResult::Failure;
            record.error = Some(e.to_string());
        }

        record.states = trail.into_states();
        record.completed_at = chrono::Utc::now();
        record
    }

    async fn drive(
        &self,
        job: &DeviceJob,
        trail: &mut StateTrail,
        record: &mut PushRecord,
        semaphore: &Semaphore,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let name = job.device.name.as_str();
        trail.advance(DeviceRunState::Diffed)?;

        let Some(payload) = job.plan.payload.clone() else {
            trail.advance(DeviceRunState::NoChange)?;
            trail.advance(DeviceRunState::Done)?;
            record.result = PushResult::NoChange;
            debug!("{name}: no change");
            return Ok(());
        };

        let permit = tokio::select! {
            () = cancel.cancelled() => None,
            permit = semaphore.acquire() => permit.ok(),
        };
        if permit.is_none() || cancel.is_cancelled() {
            trail.advance(DeviceRunState::Done)?;
            record.result = PushResult::Cancelled;
            record.error = Some(
                DeployError::Cancelled {
                    device: name.to_string(),
                }
                .to_string(),
            );
            info!("{name}: cancelled before push");
            return Ok(());
        }

        let removed = removed_keys(&payload);
        let mut current = payload;
        let mut last_error = None;

        for attempt in 0..self.settings.retry.max_attempts() {
            if attempt > 0 {
                if cancel.is_cancelled() {
                    warn!("{name}: run cancelled, not retrying");
                    break;
                }
                let delay = self.settings.retry.delay_for_retry(attempt - 1);
                warn!("{name}: retrying in {delay:?} (attempt {})", attempt + 1);
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }

            trail.advance(DeviceRunState::Pushing)?;
            record.attempted = true;
            record.attempts += 1;
            info!(
                "{name}: pushing {} payload ({} block(s))",
                if current.is_full() { "full" } else { "delta" },
                current.block_count()
            );

            match self
                .push_and_verify(&job.device, &current, &job.intended, &removed)
                .await
            {
                Ok(()) => {
                    trail.advance(DeviceRunState::Verified)?;
                    record.verification = VerifyResult::Passed;
                    last_error = None;
                    break;
                }
                Err(e) => {
                    if let DeployError::VerifyFailed { mismatches, .. } = &e {
                        trail.advance(DeviceRunState::VerifyFailed)?;
                        record.verification = VerifyResult::Failed {
                            mismatches: mismatches.clone(),
                        };
                        // The device drifted from the baseline; stop trusting deltas.
                        current = PushPayload::full(&job.intended);
                    } else {
                        trail.advance(DeviceRunState::PushFailed)?;
                    }
                    warn!("{name}: attempt {} failed: {e}", attempt + 1);
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        if trail.current() == DeviceRunState::Verified {
            self.record_baseline(job, record).await;
        } else {
            let message = last_error.map_or_else(
                || String::from("push did not complete"),
                |e| e.to_string(),
            );
            error!("{name}: giving up after {} attempt(s): {message}", record.attempts);
            record.result = PushResult::Failure;
            record.error = Some(message);
            record.rollback = self.rollback(job, cancel).await;
        }

        trail.advance(DeviceRunState::Done)?;
        Ok(())
    }

    /// Persists the verified config. A failed write drops the old baseline
    /// so the next run pushes in full.
    async fn record_baseline(&self, job: &DeviceJob, record: &mut PushRecord) {
        let name = job.device.name.as_str();
        match self.materializer.persist(&job.intended).await {
            Ok(()) => {
                record.result = PushResult::Success;
                record.persisted = true;
                info!("{name}: verified");
            }
            Err(e) => {
                error!("{name}: verified but baseline not persisted: {e}");
                if let Err(invalidate) = self.materializer.invalidate(name).await {
                    warn!("{name}: failed to drop stale baseline: {invalidate}");
                }
                record.result = PushResult::Failure;
                record.error = Some(e.to_string());
            }
        }
    }

    async fn rollback(&self, job: &DeviceJob, cancel: &CancellationToken) -> Option<RollbackOutcome> {
        if !self.settings.rollback_on_failure {
            return None;
        }
        let prior = job.prior.as_ref()?;
        let name = job.device.name.as_str();

        if cancel.is_cancelled() {
            return Some(RollbackOutcome::Skipped {
                reason: String::from("run cancelled"),
            });
        }

        warn!("{name}: rolling back to {}", &prior.content_hash()[..8]);
        match self
            .push_and_verify(&job.device, &PushPayload::full(prior), prior, &[])
            .await
        {
            Ok(()) => Some(RollbackOutcome::Restored {
                hash: prior.content_hash().to_string(),
            }),
            Err(e) => {
                error!("{name}: rollback failed: {e}");
                Some(RollbackOutcome::Failed {
                    message: e.to_string(),
                })
            }
        }
    }

    /// One attempt: connect, push, read back, compare, close.
    async fn push_and_verify(
        &self,
        device: &Device,
        payload: &PushPayload,
        intended: &RenderedConfig,
        removed: &[(Section, String)],
    ) -> Result<(), DeployError> {
        let name = device.name.as_str();
        let mut session = self
            .timed(name, "connect", self.sessions.connect(device))
            .await?;

        let result = self
            .exchange(session.as_mut(), name, payload, intended, removed)
            .await;

        if let Err(e) = self.timed(name, "close", session.close()).await {
            debug!("{name}: close failed: {e}");
        }
        result
    }

    async fn exchange(
        &self,
        session: &mut dyn DeviceSession,
        name: &str,
        payload: &PushPayload,
        intended: &RenderedConfig,
        removed: &[(Section, String)],
    ) -> Result<(), DeployError> {
        self.timed(name, "push", session.push(payload)).await?;
        let snapshot = self.timed(name, "verify", session.read_state()).await?;

        let mismatches = verify_snapshot(intended, removed, &snapshot);
        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(DeployError::VerifyFailed {
                device: name.to_string(),
                mismatches,
            })
        }
    }

    /// Bounds a session operation by the session timeout.
    async fn timed<T>(
        &self,
        device: &str,
        operation: &str,
        operation_future: impl Future<Output = Result<T, SessionError>> + Send,
    ) -> Result<T, DeployError> {
        match tokio::time::timeout(self.settings.session_timeout, operation_future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(DeployError::PushFailed {
                device: device.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(DeployError::Timeout {
                device: device.to_string(),
                operation: operation.to_string(),
                secs: self.settings.session_timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::session::{DeviceSnapshot, MockDeviceSession, MockSessionProvider};
    use crate::deploy::spool::SpoolSessionProvider;
    use crate::error::StoreError;
    use crate::inventory::{Dialect, Tier};
    use crate::materializer::{LocalContentStore, MockContentStore};
    use crate::planner::DiffEngine;
    use crate::render::ConfigBlock;
    use tempfile::TempDir;

    fn settings(max_retries: u32) -> EngineSettings {
        EngineSettings {
            retry: RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(5)),
            session_timeout: Duration::from_secs(5),
            concurrency: 4,
            rollback_on_failure: true,
        }
    }

    fn device(name: &str) -> Device {
        Device::new(name, Tier::Leaf, Dialect::Nxos, &["data_switches"])
    }

    fn config(name: &str, timeout: u32) -> RenderedConfig {
        RenderedConfig::new(
            name,
            Dialect::Nxos,
            vec![
                ConfigBlock::new(Section::Features, "lacp", vec![String::from("feature lacp")]),
                ConfigBlock::new(
                    Section::Lines,
                    "console",
                    vec![String::from("line console"), format!("  exec-timeout {timeout}")],
                ),
            ],
        )
    }

    fn job(name: &str, intended: RenderedConfig, prior: Option<RenderedConfig>) -> DeviceJob {
        DeviceJob {
            device: device(name),
            plan: DevicePlan::new(&DiffEngine::new(), &intended, prior.as_ref()),
            intended,
            prior,
        }
    }

    fn local_materializer(temp: &TempDir) -> ConfigMaterializer {
        ConfigMaterializer::new(Arc::new(LocalContentStore::with_base_dir(temp.path().join("store"))))
    }

    fn rejecting_session() -> Box<dyn DeviceSession> {
        let mut session = MockDeviceSession::new();
        session.expect_push().returning(|_| {
            Err(SessionError::Rejected {
                message: String::from("% Invalid command"),
            })
        });
        session.expect_close().returning(|| Ok(()));
        Box::new(session)
    }

    #[tokio::test]
    async fn test_no_change_opens_no_session() {
        let temp = TempDir::new().expect("temp dir");
        let mut provider = MockSessionProvider::new();
        provider.expect_connect().times(0);
        provider.expect_provider_type().return_const("mock");

        let engine = DeploymentEngine::new(Arc::new(provider), local_materializer(&temp), settings(2));
        let current = config("dub-st1-lf1", 15);
        let records = engine
            .run(
                vec![job("dub-st1-lf1", current.clone(), Some(current))],
                &[],
                &CancellationToken::new(),
            )
            .await
            .snapshot()
            .await;

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.result, PushResult::NoChange);
        assert!(!record.attempted);
        assert_eq!(
            record.states,
            vec![
                DeviceRunState::Pending,
                DeviceRunState::Diffed,
                DeviceRunState::NoChange,
                DeviceRunState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_verify_failure_isolated_to_one_device() {
        let temp = TempDir::new().expect("temp dir");
        let spool = SpoolSessionProvider::new(temp.path().join("spool"));
        std::fs::create_dir_all(spool.dir()).expect("spool dir");
        std::fs::write(spool.fault_path("dub-st1-lf2"), "verify").expect("fault");

        let materializer = local_materializer(&temp);
        let engine = DeploymentEngine::new(Arc::new(spool), materializer.clone(), settings(1));

        let jobs = ["dub-st1-lf1", "dub-st1-lf2", "dub-st1-lf3"]
            .into_iter()
            .map(|name| job(name, config(name, 15), None))
            .collect();
        let records = engine
            .run(jobs, &[], &CancellationToken::new())
            .await
            .snapshot()
            .await;

        assert_eq!(records.len(), 3);
        for record in &records {
            if record.device == "dub-st1-lf2" {
                assert_eq!(record.result, PushResult::Failure);
                assert_eq!(record.attempts, 2);
                assert!(matches!(record.verification, VerifyResult::Failed { .. }));
                assert!(!record.persisted);
            } else {
                assert_eq!(record.result, PushResult::Success);
                assert_eq!(record.verification, VerifyResult::Passed);
                assert!(record.persisted);
            }
        }

        assert!(materializer.load_last("dub-st1-lf1").await.expect("load").is_some());
        assert!(materializer.load_last("dub-st1-lf2").await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_drifted_device_escalates_to_full() {
        let temp = TempDir::new().expect("temp dir");
        let spool = SpoolSessionProvider::new(temp.path().join("spool"));
        let engine = DeploymentEngine::new(Arc::new(spool.clone()), local_materializer(&temp), settings(2));

        // The baseline claims lacp is configured but the device is empty.
        let records = engine
            .run(
                vec![job(
                    "dub-st1-lf1",
                    config("dub-st1-lf1", 20),
                    Some(config("dub-st1-lf1", 15)),
                )],
                &[],
                &CancellationToken::new(),
            )
            .await
            .snapshot()
            .await;

        let record = &records[0];
        assert_eq!(record.result, PushResult::Success);
        assert_eq!(record.attempts, 2);
        assert!(record.states.contains(&DeviceRunState::VerifyFailed));
        assert_eq!(spool.running("dub-st1-lf1").await.expect("running").blocks.len(), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_on_rejection() {
        let temp = TempDir::new().expect("temp dir");
        let mut provider = MockSessionProvider::new();
        provider
            .expect_connect()
            .times(3)
            .returning(|_| Ok(rejecting_session()));
        provider.expect_provider_type().return_const("mock");

        let engine = DeploymentEngine::new(Arc::new(provider), local_materializer(&temp), settings(2));
        let records = engine
            .run(
                vec![job("dub-st1-lf1", config("dub-st1-lf1", 15), None)],
                &[],
                &CancellationToken::new(),
            )
            .await
            .snapshot()
            .await;

        let record = &records[0];
        assert_eq!(record.result, PushResult::Failure);
        assert_eq!(record.attempts, 3);
        assert!(record.rollback.is_none());
        assert_eq!(
            record
                .states
                .iter()
                .filter(|s| **s == DeviceRunState::PushFailed)
                .count(),
            3
        );
        assert_eq!(record.states.last(), Some(&DeviceRunState::Done));
    }

    #[tokio::test]
    async fn test_timeout_is_push_failure() {
        let temp = TempDir::new().expect("temp dir");
        let spool = SpoolSessionProvider::new(temp.path().join("spool"));
        std::fs::create_dir_all(spool.dir()).expect("spool dir");
        std::fs::write(spool.fault_path("dub-st1-lf1"), "timeout").expect("fault");

        let mut fast = settings(0);
        fast.session_timeout = Duration::from_millis(50);
        let engine = DeploymentEngine::new(Arc::new(spool), local_materializer(&temp), fast);

        let records = engine
            .run(
                vec![
                    job("dub-st1-lf1", config("dub-st1-lf1", 15), None),
                    job("dub-st1-lf2", config("dub-st1-lf2", 15), None),
                ],
                &[],
                &CancellationToken::new(),
            )
            .await
            .snapshot()
            .await;

        let stalled = records
            .iter()
            .find(|r| r.device == "dub-st1-lf1")
            .expect("record");
        assert_eq!(stalled.result, PushResult::Failure);
        assert!(stalled.states.contains(&DeviceRunState::PushFailed));
        assert!(stalled.error.as_deref().is_some_and(|e| e.contains("Timeout")));

        let healthy = records
            .iter()
            .find(|r| r.device == "dub-st1-lf2")
            .expect("record");
        assert_eq!(healthy.result, PushResult::Success);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_unstarted_devices() {
        let temp = TempDir::new().expect("temp dir");
        let mut provider = MockSessionProvider::new();
        provider.expect_connect().times(0);
        provider.expect_provider_type().return_const("mock");

        let engine = DeploymentEngine::new(Arc::new(provider), local_materializer(&temp), settings(2));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let records = engine
            .run(
                vec![
                    job("dub-st1-lf1", config("dub-st1-lf1", 15), None),
                    job("dub-st1-lf2", config("dub-st1-lf2", 15), None),
                ],
                &[],
                &cancel,
            )
            .await
            .snapshot()
            .await;

        assert_eq!(records.len(), 2);
        for record in records {
            assert_eq!(record.result, PushResult::Cancelled);
            assert!(!record.attempted);
            assert_eq!(record.attempts, 0);
        }
    }

    #[tokio::test]
    async fn test_rollback_restores_prior_config() {
        let temp = TempDir::new().expect("temp dir");
        let prior = config("dub-st1-lf1", 15);
        let materializer = local_materializer(&temp);
        materializer.persist(&prior).await.expect("persist");

        let restored = prior.blocks().to_vec();
        let mut calls = 0;
        let mut provider = MockSessionProvider::new();
        provider.expect_connect().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                return Ok(rejecting_session());
            }
            let blocks = restored.clone();
            let mut session = MockDeviceSession::new();
            session.expect_push().times(1).returning(|_| Ok(()));
            session
                .expect_read_state()
                .returning(move || Ok(DeviceSnapshot::new(blocks.clone())));
            session.expect_close().returning(|| Ok(()));
            Ok(Box::new(session) as Box<dyn DeviceSession>)
        });
        provider.expect_provider_type().return_const("mock");

        let engine = DeploymentEngine::new(Arc::new(provider), materializer.clone(), settings(0));
        let records = engine
            .run(
                vec![job("dub-st1-lf1", config("dub-st1-lf1", 20), Some(prior.clone()))],
                &[],
                &CancellationToken::new(),
            )
            .await
            .snapshot()
            .await;

        let record = &records[0];
        assert_eq!(record.result, PushResult::Failure);
        assert_eq!(
            record.rollback,
            Some(RollbackOutcome::Restored {
                hash: prior.content_hash().to_string(),
            })
        );
        assert!(!record.persisted);
        assert_eq!(
            materializer.load_last("dub-st1-lf1").await.expect("load"),
            Some(prior)
        );
    }

    #[tokio::test]
    async fn test_persistence_failure_leaves_baseline_unset() {
        let temp = TempDir::new().expect("temp dir");
        let mut store = MockContentStore::new();
        store
            .expect_write_atomic()
            .returning(|key, _| Err(StoreError::persistence(key, "disk full").into()));
        store.expect_delete().times(1).returning(|_| Ok(()));
        store.expect_backend_type().return_const("mock");

        let spool = SpoolSessionProvider::new(temp.path().join("spool"));
        let engine = DeploymentEngine::new(
            Arc::new(spool),
            ConfigMaterializer::new(Arc::new(store)),
            settings(0),
        );

        let records = engine
            .run(
                vec![job("dub-st1-lf1", config("dub-st1-lf1", 15), None)],
                &[],
                &CancellationToken::new(),
            )
            .await
            .snapshot()
            .await;

        let record = &records[0];
        assert_eq!(record.verification, VerifyResult::Passed);
        assert_eq!(record.result, PushResult::Failure);
        assert!(!record.persisted);
        assert!(record.error.as_deref().is_some_and(|e| e.contains("disk full")));
        assert!(record.states.contains(&DeviceRunState::Verified));
    }

    #[tokio::test]
    async fn test_blocked_devices_recorded_not_pushed() {
        let temp = TempDir::new().expect("temp dir");
        let mut provider = MockSessionProvider::new();
        provider.expect_connect().times(0);
        provider.expect_provider_type().return_const("mock");

        let engine = DeploymentEngine::new(Arc::new(provider), local_materializer(&temp), settings(0));
        let blocked = vec![BlockedDevice {
            device: String::from("dub-st1-lf1"),
            errors: vec![String::from("interfaces: missing_required_variable")],
        }];

        let records = engine
            .run(Vec::new(), &blocked, &CancellationToken::new())
            .await
            .snapshot()
            .await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].result, PushResult::Blocked);
        assert!(records[0].needs_attention());
    }
}
