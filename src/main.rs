//! Fabric CLI entrypoint.
//!
//! This is the main entrypoint for the fabric command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use fabric_deploy::cli::{Cli, Commands, OutputFormatter, StateCommands};
use fabric_deploy::config::{ConfigParser, ConfigValidator, DeployConfig, find_config_file};
use fabric_deploy::deploy::SpoolSessionProvider;
use fabric_deploy::error::Result;
use fabric_deploy::inventory::{ScopeProvider, YamlInventory};
use fabric_deploy::materializer::{ConfigMaterializer, LocalContentStore};
use fabric_deploy::planner::PushPlan;
use fabric_deploy::reconciler::FleetReconciler;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point. Returns false when the command ran but the
/// outcome needs operator attention.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(&config, warnings, &formatter),
        Commands::Resolve { device } => cmd_resolve(&config, device, &formatter),
        Commands::Render { device, export } => cmd_render(&config, &device, export.as_deref(), &formatter).await,
        Commands::Plan { device, detailed } => cmd_plan(&config, &device, detailed, &formatter).await,
        Commands::Deploy { yes, device } => cmd_deploy(&config, &device, yes, &formatter).await,
        Commands::Status => cmd_status(&config, &formatter).await,
        Commands::Links => cmd_links(&config, &formatter),
        Commands::State { command } => cmd_state(&config, command, &formatter).await,
    }
}

/// Validate settings and inventory.
fn cmd_validate(config: &DeployConfig, show_warnings: bool, formatter: &OutputFormatter) -> Result<bool> {
    info!("Validating {}", config.qualified_name());
    let inventory = YamlInventory::load(config.inventory_path())?;
    let scopes = inventory.scopes()?;

    let result = ConfigValidator::new().check(config, Some((inventory.file(), &scopes)));
    emit(&formatter.format_validation(&result, show_warnings))?;
    Ok(result.is_valid())
}

/// Show the resolved variables of one device.
fn cmd_resolve(config: &DeployConfig, device: String, formatter: &OutputFormatter) -> Result<bool> {
    let reconciler = build_reconciler(config)?;
    let synthesis = reconciler.synthesize(&[device])?;

    for synth in &synthesis.devices {
        match &synth.resolved {
            Some(vars) => emit(&formatter.format_resolved(vars))?,
            None => {
                emit(&formatter.format_synthesis(std::slice::from_ref(synth)))?;
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Render configs, optionally exporting them as text files.
async fn cmd_render(
    config: &DeployConfig,
    devices: &[String],
    export: Option<&Path>,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let reconciler = build_reconciler(config)?;
    let synthesis = reconciler.synthesize(devices)?;

    if let Some(dir) = export {
        for rendered in synthesis.devices.iter().filter_map(|s| s.config()) {
            let path = reconciler.materializer().export_text(rendered, dir).await?;
            debug!("Exported {}", path.display());
        }
        info!("Exported configs to {}", dir.display());
    }

    emit(&formatter.format_synthesis(&synthesis.devices))?;
    Ok(synthesis.devices.iter().all(|s| !s.is_blocked()))
}

/// Show the push plan.
async fn cmd_plan(
    config: &DeployConfig,
    devices: &[String],
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let reconciler = build_reconciler(config)?;
    let planned = reconciler.plan(devices).await?;
    emit(&formatter.format_plan(&planned.plan, detailed))?;
    Ok(planned.plan.blocked.is_empty())
}

/// Plan, confirm and deploy.
async fn cmd_deploy(
    config: &DeployConfig,
    devices: &[String],
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let reconciler = build_reconciler(config)?;
    let planned = reconciler.plan(devices).await?;

    if planned.plan.is_empty() {
        info!("No changes to deploy, recording a no-change run");
    }

    if needs_confirmation(&planned.plan, auto_approve) {
        eprintln!("{}", formatter.format_plan(&planned.plan, false));
        eprint!("Do you want to deploy this plan? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Deploy cancelled.");
            return Ok(true);
        }
    }

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
    let report = reconciler.deploy(planned, &cancel).await;
    watcher.abort();

    let report = report?;
    emit(&formatter.format_report(&report))?;
    Ok(report.is_success())
}

/// Show the last run report.
async fn cmd_status(config: &DeployConfig, formatter: &OutputFormatter) -> Result<bool> {
    let reconciler = build_reconciler(config)?;
    let report = reconciler.last_report().await?;
    emit(&formatter.format_status(report.as_ref()))?;
    Ok(true)
}

/// Show link adjacency.
fn cmd_links(config: &DeployConfig, formatter: &OutputFormatter) -> Result<bool> {
    let reconciler = build_reconciler(config)?;
    let synthesis = reconciler.synthesize(&[])?;
    emit(&formatter.format_links(&synthesis.adjacency))?;
    Ok(true)
}

/// Content store commands.
async fn cmd_state(config: &DeployConfig, command: StateCommands, formatter: &OutputFormatter) -> Result<bool> {
    let materializer = build_materializer(config);

    match command {
        StateCommands::Show => {
            let baselines = materializer.baselines().await?;
            let lock = materializer.lock_info().await?;
            emit(&formatter.format_state(&baselines, lock.as_ref()))?;
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                materializer.force_unlock().await?;
                emit(&formatter.format_message("Run lock forcefully released."))?;
            } else if let Some(id) = lock_id {
                materializer.release_lock(&id).await?;
                emit(&formatter.format_message("Run lock released."))?;
            } else {
                eprintln!("Please provide --lock-id or use --force");
                return Ok(false);
            }
        }
    }
    Ok(true)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads settings from `--config` or the nearest settings file.
fn load_config(config_path: Option<&PathBuf>) -> Result<DeployConfig> {
    let config_file = config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))?;
    debug!("Loading settings from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")));
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }
    Ok(config)
}

fn build_materializer(config: &DeployConfig) -> ConfigMaterializer {
    ConfigMaterializer::new(Arc::new(LocalContentStore::with_base_dir(config.store_path())))
}

fn build_reconciler(config: &DeployConfig) -> Result<FleetReconciler> {
    let inventory = Arc::new(YamlInventory::load(config.inventory_path())?);
    Ok(FleetReconciler::new(
        inventory.clone(),
        inventory,
        Arc::new(SpoolSessionProvider::new(config.spool_path())),
        build_materializer(config),
        config.deploy,
    ))
}

/// Only a plan that pushes something asks before running. An unchanged
/// fleet still runs so every device gets its no-change record.
fn needs_confirmation(plan: &PushPlan, auto_approve: bool) -> bool {
    !auto_approve && !plan.is_empty()
}

/// Cancels the run on the first Ctrl-C. In-flight pushes finish.
async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupt received, finishing in-flight pushes");
        cancel.cancel();
    }
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    Ok(())
}
