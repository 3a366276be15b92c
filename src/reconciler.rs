//! Fleet reconciler.
//!
//! This module drives one run end to end: snapshot the scopes, resolve and
//! render every device, diff against the stored baselines, deploy, and
//! persist a run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DeploySettings;
use crate::deploy::{DeploymentEngine, DeviceJob, PushRecord, PushResult, SessionProvider};
use crate::error::{InventoryError, RenderError, ResolveError, Result};
use crate::inventory::{AdjacencyReport, Device, InventoryProvider, ScopeProvider};
use crate::materializer::ConfigMaterializer;
use crate::planner::{BlockedDevice, DevicePlan, DiffEngine, PushPlan};
use crate::render::{PortChannelInput, RenderOutcome, RenderedConfig, Template, TemplateRenderer};
use crate::resolver::{ResolvedVariableSet, VariableResolver};

/// Resolution and rendering result for one device.
#[derive(Debug, Clone)]
pub struct DeviceSynthesis {
    /// The device.
    pub device: Device,
    /// Resolved variables, absent if resolution found conflicts.
    pub resolved: Option<ResolvedVariableSet>,
    /// Resolution errors.
    pub resolve_errors: Vec<ResolveError>,
    /// Render outcome. With resolution errors it covers the keys that
    /// did resolve.
    pub outcome: RenderOutcome,
}

impl DeviceSynthesis {
    /// The config, only if resolution was complete and every section
    /// rendered.
    #[must_use]
    pub fn config(&self) -> Option<&RenderedConfig> {
        (self.resolve_errors.is_empty() && self.outcome.is_clean()).then_some(&self.outcome.config)
    }

    /// Returns true if the device must not be pushed.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.config().is_none()
    }

    /// Every error, one line each.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        let resolve = self.resolve_errors.iter().map(ToString::to_string);
        let render = self
            .outcome
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.section, e.error));
        resolve.chain(render).collect()
    }
}

/// Synthesis of the selected devices.
#[derive(Debug, Clone)]
pub struct Synthesis {
    /// Per-device results in inventory order.
    pub devices: Vec<DeviceSynthesis>,
    /// Link adjacency across the whole inventory.
    pub adjacency: AdjacencyReport,
}

/// A plan together with what the engine needs to carry it out.
#[derive(Debug, Clone)]
pub struct PlannedRun {
    /// Operator-facing plan.
    pub plan: PushPlan,
    /// One job per planned device.
    pub jobs: Vec<DeviceJob>,
}

/// Persisted outcome of one deploy run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Plan warnings.
    pub warnings: Vec<String>,
    /// One record per device, in completion order.
    pub records: Vec<PushRecord>,
}

impl RunReport {
    /// Number of records with the given result.
    #[must_use]
    pub fn count(&self, result: PushResult) -> usize {
        self.records.iter().filter(|r| r.result == result).count()
    }

    /// Returns true if no device needs operator attention.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.records.iter().any(PushRecord::needs_attention)
    }

    /// Record of one device.
    #[must_use]
    pub fn record(&self, device: &str) -> Option<&PushRecord> {
        self.records.iter().find(|r| r.device == device)
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "run {}: {} success, {} no change, {} failed, {} blocked, {} cancelled",
            &self.run_id[..8.min(self.run_id.len())],
            self.count(PushResult::Success),
            self.count(PushResult::NoChange),
            self.count(PushResult::Failure),
            self.count(PushResult::Blocked),
            self.count(PushResult::Cancelled),
        )
    }
}

/// Orchestrates resolve, render, plan and deploy for the fleet.
pub struct FleetReconciler {
    inventory: Arc<dyn InventoryProvider>,
    scopes: Arc<dyn ScopeProvider>,
    sessions: Arc<dyn SessionProvider>,
    materializer: ConfigMaterializer,
    settings: DeploySettings,
    renderer: TemplateRenderer,
    diff_engine: DiffEngine,
}

impl std::fmt::Debug for FleetReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetReconciler")
            .field("sessions", &self.sessions.provider_type())
            .field("materializer", &self.materializer)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl FleetReconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(
        inventory: Arc<dyn InventoryProvider>,
        scopes: Arc<dyn ScopeProvider>,
        sessions: Arc<dyn SessionProvider>,
        materializer: ConfigMaterializer,
        settings: DeploySettings,
    ) -> Self {
        Self {
            inventory,
            scopes,
            sessions,
            materializer,
            settings,
            renderer: TemplateRenderer::new(),
            diff_engine: DiffEngine::new(),
        }
    }

    /// The materializer.
    #[must_use]
    pub const fn materializer(&self) -> &ConfigMaterializer {
        &self.materializer
    }

    /// Inventory devices, narrowed to `filter` when it is not empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the inventory cannot be loaded or a filtered name
    /// is unknown.
    pub fn devices(&self, filter: &[String]) -> Result<Vec<Device>> {
        let all = self.inventory.devices()?;
        select(&all, filter)
    }

    /// Resolves and renders the selected devices against one scope snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the inventory or scopes cannot be loaded.
    /// Per-device problems are reported inside the result instead.
    pub fn synthesize(&self, filter: &[String]) -> Result<Synthesis> {
        let all = self.inventory.devices()?;
        let selected = select(&all, filter)?;
        let resolver = VariableResolver::new(Arc::new(self.scopes.scopes()?))
            .with_merge_policy(self.settings.merge_policy);

        let devices: Vec<DeviceSynthesis> = selected
            .into_iter()
            .map(|device| self.synthesize_device(&resolver, device))
            .collect();

        // Explicit peers need resolved variables; resolve the unselected
        // devices only for that.
        let mut explicit = Vec::new();
        for device in &all {
            let resolved = match devices.iter().find(|d| d.device.name == device.name) {
                Some(synth) => synth.resolved.clone(),
                None => resolver.resolve(device).ok(),
            };
            if let Some(resolved) = resolved {
                explicit.extend(explicit_peers(&resolved));
            }
        }

        Ok(Synthesis {
            devices,
            adjacency: AdjacencyReport::build(&all, &explicit),
        })
    }

    fn synthesize_device(&self, resolver: &VariableResolver, device: Device) -> DeviceSynthesis {
        let resolution = resolver.resolve_partial(&device);
        let mut outcome = self
            .renderer
            .render(&resolution.vars, &Template::standard(device.dialect));

        // A conflicting key is already reported; do not report it missing too.
        outcome.errors.retain(|e| match &e.error {
            RenderError::Resolve(ResolveError::MissingRequiredVariable { key, .. }) => {
                !resolution.conflicts_on(key)
            }
            _ => true,
        });

        if !resolution.is_complete() {
            warn!(
                "{}: {} resolution error(s), {} section error(s), device blocked",
                device.name,
                resolution.conflicts.len(),
                outcome.errors.len()
            );
        } else if !outcome.is_clean() {
            warn!(
                "{}: {} section error(s), device blocked",
                device.name,
                outcome.errors.len()
            );
        } else {
            debug!("{}: rendered {} block(s)", device.name, outcome.config.blocks().len());
        }

        let (resolved, resolve_errors) = match resolution.into_result() {
            Ok(vars) => (Some(vars), Vec::new()),
            Err(conflicts) => (None, conflicts),
        };
        DeviceSynthesis {
            device,
            resolved,
            resolve_errors,
            outcome,
        }
    }

    /// Builds the push plan for the selected devices.
    ///
    /// # Errors
    ///
    /// Returns an error if the inventory or scopes cannot be loaded.
    pub async fn plan(&self, filter: &[String]) -> Result<PlannedRun> {
        let synthesis = self.synthesize(filter)?;
        let mut plan = PushPlan::new();
        let mut jobs = Vec::new();

        for synth in synthesis.devices {
            let Some(intended) = synth.config().cloned() else {
                plan.blocked.push(BlockedDevice {
                    errors: synth.errors(),
                    device: synth.device.name,
                });
                continue;
            };

            let (prior, warning) = self.materializer.load_baseline(&synth.device.name).await;
            if let Some(warning) = warning {
                plan.warnings
                    .push(format!("{}: baseline ignored, full push ({warning})", synth.device.name));
            }

            let device_plan = DevicePlan::new(&self.diff_engine, &intended, prior.as_ref());
            plan.devices.push(device_plan.clone());
            jobs.push(DeviceJob {
                device: synth.device,
                plan: device_plan,
                intended,
                prior,
            });
        }

        let adjacency_warnings = synthesis.adjacency.warnings_for(&plan.pushed_devices());
        for warning in &adjacency_warnings {
            warn!("{warning}");
        }
        plan.warnings.extend(adjacency_warnings);

        info!(
            "Plan: {} device(s), {} to push, {} blocked",
            plan.devices.len(),
            plan.pushed_devices().len(),
            plan.blocked.len()
        );
        Ok(PlannedRun { plan, jobs })
    }

    /// Carries out a plan under the run lock and saves the report.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held by another run or the report
    /// cannot be saved. Device failures are recorded, not returned.
    pub async fn deploy(&self, planned: PlannedRun, cancel: &CancellationToken) -> Result<RunReport> {
        let lock = self.materializer.acquire_lock(None).await?;
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();

        let engine = DeploymentEngine::new(
            Arc::clone(&self.sessions),
            self.materializer.clone(),
            self.settings.engine_settings(),
        );
        let records = engine
            .run(planned.jobs, &planned.plan.blocked, cancel)
            .await
            .snapshot()
            .await;

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            cancelled: cancel.is_cancelled(),
            warnings: planned.plan.warnings,
            records,
        };

        let saved = self.materializer.save_report(&report.run_id, &report).await;
        if let Err(e) = self.materializer.release_lock(&lock.lock_id).await {
            error!("Failed to release run lock: {e}");
        }
        saved?;

        info!("{report}");
        Ok(report)
    }

    /// Plans and deploys in one step.
    ///
    /// # Errors
    ///
    /// See [`Self::plan`] and [`Self::deploy`].
    pub async fn run(&self, filter: &[String], cancel: &CancellationToken) -> Result<RunReport> {
        let planned = self.plan(filter).await?;
        self.deploy(planned, cancel).await
    }

    /// The most recent run report.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored report cannot be decoded.
    pub async fn last_report(&self) -> Result<Option<RunReport>> {
        self.materializer.latest_report().await
    }
}

fn select(all: &[Device], filter: &[String]) -> Result<Vec<Device>> {
    if filter.is_empty() {
        return Ok(all.to_vec());
    }
    if let Some(unknown) = filter.iter().find(|name| !all.iter().any(|d| &d.name == *name)) {
        return Err(InventoryError::UnknownDevice {
            name: unknown.clone(),
        }
        .into());
    }
    Ok(all
        .iter()
        .filter(|d| filter.contains(&d.name))
        .cloned()
        .collect())
}

/// `(device, peer)` pairs declared through `portchannels[].peer`.
fn explicit_peers(resolved: &ResolvedVariableSet) -> Vec<(String, String)> {
    resolved
        .decode::<Vec<PortChannelInput>>("portchannels")
        .ok()
        .flatten()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|pc| pc.peer)
        .map(|peer| (resolved.device().to_string(), peer))
        .collect()
}
