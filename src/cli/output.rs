//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::deploy::{PushRecord, PushResult, VerifyResult};
use crate::inventory::{AdjacencyKind, AdjacencyReport};
use crate::materializer::LockInfo;
use crate::planner::{ActionType, DiffType, PushPlan};
use crate::reconciler::{DeviceSynthesis, RunReport};
use crate::resolver::ResolvedVariableSet;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "+")]
    added: usize,
    #[tabled(rename = "~")]
    changed: usize,
    #[tabled(rename = "-")]
    removed: usize,
    #[tabled(rename = "Payload")]
    payload: String,
}

/// Push record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Verify")]
    verify: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Variable row for table display.
#[derive(Tabled)]
struct VariableRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Scope")]
    scope: String,
}

/// Link row for table display.
#[derive(Tabled)]
struct LinkRow {
    #[tabled(rename = "A")]
    a: String,
    #[tabled(rename = "B")]
    b: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        if self.format == OutputFormat::Json {
            let json = serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            });
            return to_json(&json);
        }

        let mut output = String::new();
        if result.is_valid() {
            let _ = writeln!(output, "{} Configuration is valid", "✓".green());
        } else {
            let _ = writeln!(output, "{} {} error(s):", "✗".red(), result.error_count());
            for error in &result.errors {
                let _ = writeln!(output, "   - {error}");
            }
        }

        if !result.warnings.is_empty() {
            if show_warnings {
                let _ = writeln!(output, "\n{} Warnings:", "!".yellow());
                for warning in &result.warnings {
                    let _ = writeln!(output, "   - {warning}");
                }
            } else {
                let _ = writeln!(output, "   {} warning(s), use --warnings to show", result.warning_count());
            }
        }
        output
    }

    /// Formats one resolved variable set with per-key provenance.
    #[must_use]
    pub fn format_resolved(&self, vars: &ResolvedVariableSet) -> String {
        if self.format == OutputFormat::Json {
            return to_json(vars);
        }

        let rows: Vec<VariableRow> = vars
            .iter()
            .map(|(key, value)| VariableRow {
                key: key.clone(),
                value: truncate(&serde_json::to_string(value).unwrap_or_default(), 60),
                scope: vars.source_of(key).unwrap_or("-").to_string(),
            })
            .collect();

        let mut output = format!("\n{} ({} variables)\n\n", vars.device().bold(), vars.len());
        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }
        output
    }

    /// Formats rendered configs, or the errors that blocked them.
    #[must_use]
    pub fn format_synthesis(&self, devices: &[DeviceSynthesis]) -> String {
        if self.format == OutputFormat::Json {
            let json: Vec<RenderJson> = devices.iter().map(RenderJson::from).collect();
            return to_json(&json);
        }

        let mut output = String::new();
        for synth in devices {
            match synth.config() {
                Some(config) => {
                    let _ = writeln!(
                        output,
                        "{} {} ({}, {})",
                        "#".dimmed(),
                        synth.device.name.bold(),
                        synth.device.dialect,
                        &config.content_hash()[..12]
                    );
                    output.push_str(&config.to_text());
                    output.push('\n');
                }
                None => {
                    let _ = writeln!(output, "{} {} blocked:", "✗".red(), synth.device.name.bold());
                    for error in synth.errors() {
                        let _ = writeln!(output, "   - {error}");
                    }
                    output.push('\n');
                }
            }
        }
        output
    }

    /// Formats a push plan.
    #[must_use]
    pub fn format_plan(&self, plan: &PushPlan, detailed: bool) -> String {
        if self.format == OutputFormat::Json {
            return to_json(plan);
        }

        let mut output = String::new();
        if plan.is_empty() && plan.blocked.is_empty() {
            let _ = writeln!(output, "{} No changes required, fabric is up to date.", "✓".green());
            return output;
        }

        let _ = writeln!(output, "\nPush Plan\n");
        let rows: Vec<PlanRow> = plan
            .devices
            .iter()
            .map(|d| PlanRow {
                device: d.device.clone(),
                action: format_action_type(d.action_type),
                added: d.diff.count(DiffType::Added),
                changed: d.diff.count(DiffType::Changed),
                removed: d.diff.count(DiffType::Removed),
                payload: d.payload.as_ref().map_or_else(
                    || String::from("-"),
                    |p| format!("{} ({} blocks)", if p.is_full() { "full" } else { "delta" }, p.block_count()),
                ),
            })
            .collect();
        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if detailed {
            for device in plan.devices.iter().filter(|d| !d.diff.is_empty()) {
                let _ = writeln!(output, "\n{}:", device.device.bold());
                for block in &device.diff.blocks {
                    let marker = match block.diff_type {
                        DiffType::Added => "+".green(),
                        DiffType::Changed => "~".yellow(),
                        DiffType::Removed => "-".red(),
                    };
                    let _ = writeln!(output, "   {marker} {}/{}", block.section, block.key);
                }
            }
        }

        if !plan.blocked.is_empty() {
            let _ = writeln!(output, "\n{} Blocked:", "✗".red());
            for blocked in &plan.blocked {
                let _ = writeln!(output, "   {}", blocked.device.bold());
                for error in &blocked.errors {
                    let _ = writeln!(output, "     - {error}");
                }
            }
        }

        write_warnings(&mut output, &plan.warnings);

        let _ = writeln!(
            output,
            "\nPlan: {} first push, {} update, {} unchanged, {} blocked",
            plan.count(ActionType::FirstPush).to_string().green(),
            plan.count(ActionType::Update).to_string().yellow(),
            plan.count(ActionType::NoChange),
            plan.blocked.len().to_string().red()
        );
        output
    }

    /// Formats a run report.
    #[must_use]
    pub fn format_report(&self, report: &RunReport) -> String {
        if self.format == OutputFormat::Json {
            return to_json(report);
        }

        let status = if report.is_success() {
            format!("{} Deploy succeeded", "✓".green())
        } else if report.cancelled {
            format!("{} Deploy cancelled", "!".yellow())
        } else {
            format!("{} Deploy needs attention", "✗".red())
        };

        let mut output = format!(
            "{status}\n   Run: {} ({})\n\n",
            report.run_id,
            report.finished_at.format("%Y-%m-%d %H:%M:%S")
        );

        let rows: Vec<RecordRow> = report.records.iter().map(record_row).collect();
        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let rollbacks: Vec<&PushRecord> = report.records.iter().filter(|r| r.rollback.is_some()).collect();
        if !rollbacks.is_empty() {
            let _ = writeln!(output, "\nRollbacks:");
            for record in rollbacks {
                let _ = writeln!(
                    output,
                    "   {}: {}",
                    record.device,
                    serde_json::to_string(&record.rollback).unwrap_or_default()
                );
            }
        }

        write_warnings(&mut output, &report.warnings);
        let _ = writeln!(output, "\n{report}");
        output
    }

    /// Formats the last run report, if any.
    #[must_use]
    pub fn format_status(&self, report: Option<&RunReport>) -> String {
        match report {
            Some(report) => self.format_report(report),
            None if self.format == OutputFormat::Json => String::from("null"),
            None => String::from("No run recorded yet.\n"),
        }
    }

    /// Formats link adjacency.
    #[must_use]
    pub fn format_links(&self, adjacency: &AdjacencyReport) -> String {
        if self.format == OutputFormat::Json {
            return to_json(adjacency);
        }
        if adjacency.is_empty() {
            return String::from("No links found.\n");
        }

        let rows: Vec<LinkRow> = adjacency
            .links()
            .iter()
            .map(|l| LinkRow {
                a: l.a.clone(),
                b: l.b.clone(),
                kind: match l.kind {
                    AdjacencyKind::Explicit => String::from("explicit"),
                    AdjacencyKind::Implicit => "implicit".dimmed().to_string(),
                },
                reason: l.reason.clone(),
            })
            .collect();
        format!("{}\n\n{} link(s)\n", Table::new(rows), adjacency.len())
    }

    /// Formats the content store summary.
    #[must_use]
    pub fn format_state(&self, baselines: &[String], lock: Option<&LockInfo>) -> String {
        if self.format == OutputFormat::Json {
            let json = serde_json::json!({ "baselines": baselines, "lock": lock });
            return to_json(&json);
        }

        let mut output = format!("\nBaselines: {}\n", baselines.len());
        for device in baselines {
            let _ = writeln!(output, "   - {device}");
        }
        match lock {
            Some(lock) => {
                let expiry = if lock.is_expired() {
                    "expired".red().to_string()
                } else {
                    format!("{}s left", lock.remaining_secs())
                };
                let _ = writeln!(
                    output,
                    "\nLock: {} held by {} since {} ({expiry})",
                    lock.lock_id,
                    lock.holder,
                    lock.acquired_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            None => output.push_str("\nLock: none\n"),
        }
        output
    }

    /// Formats a one-line message.
    #[must_use]
    pub fn format_message(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "message": message })),
            OutputFormat::Text => format!("{} {message}\n", "✓".green()),
        }
    }
}

#[derive(Serialize)]
struct RenderJson<'a> {
    device: &'a str,
    hash: Option<&'a str>,
    config: Option<String>,
    errors: Vec<String>,
}

impl<'a> From<&'a DeviceSynthesis> for RenderJson<'a> {
    fn from(synth: &'a DeviceSynthesis) -> Self {
        let config = synth.config();
        Self {
            device: &synth.device.name,
            hash: config.map(|c| c.content_hash()),
            config: config.map(crate::render::RenderedConfig::to_text),
            errors: synth.errors(),
        }
    }
}

fn record_row(record: &PushRecord) -> RecordRow {
    RecordRow {
        device: record.device.clone(),
        result: format_result(record.result),
        attempts: record.attempts,
        verify: match &record.verification {
            VerifyResult::Passed => "passed".green().to_string(),
            VerifyResult::Failed { .. } => record.verification.to_string().red().to_string(),
            VerifyResult::NotRun => "-".dimmed().to_string(),
        },
        hash: record
            .new_hash
            .as_deref()
            .map_or_else(|| String::from("-"), |h| h[..8.min(h.len())].to_string()),
        error: record.error.as_deref().map_or_else(String::new, |e| truncate(e, 50)),
    }
}

fn write_warnings(output: &mut String, warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    let _ = writeln!(output, "\n{} Warnings:", "!".yellow());
    for warning in warnings {
        let _ = writeln!(output, "   - {warning}");
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Formats an action type with color.
fn format_action_type(action_type: ActionType) -> String {
    match action_type {
        ActionType::FirstPush => "+first push".green().to_string(),
        ActionType::Update => "~update".yellow().to_string(),
        ActionType::NoChange => "no change".dimmed().to_string(),
    }
}

/// Formats a push result with color.
fn format_result(result: PushResult) -> String {
    match result {
        PushResult::Success => "success".green().to_string(),
        PushResult::NoChange => "no change".dimmed().to_string(),
        PushResult::Failure => "failure".red().to_string(),
        PushResult::Blocked => "blocked".red().to_string(),
        PushResult::Cancelled => "cancelled".yellow().to_string(),
    }
}

/// Truncates a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
