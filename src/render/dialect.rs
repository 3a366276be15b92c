//! Dialect syntax seam.
//!
//! Section renderers decide *what* to emit; a [`DialectSyntax`] decides how
//! each statement is spelled and which values the platform accepts.

use crate::inventory::Dialect;

use super::document::{ConfigBlock, Section};
use super::eos::EosSyntax;
use super::inputs::{ConsoleLineInput, LacpMode, Range, VtyLineInput};
use super::nxos::NxosSyntax;

/// Legal numeric ranges for one dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectLimits {
    /// VLAN ids.
    pub vlan: Range,
    /// Port-channel numbers.
    pub port_channel: Range,
    /// Interface MTU.
    pub mtu: Range,
    /// VXLAN network identifiers.
    pub vni: Range,
    /// Console/VTY idle timeout in minutes.
    pub line_timeout: Range,
    /// Concurrent VTY sessions.
    pub session_limit: Range,
}

/// Spelling of configuration statements for one dialect.
pub trait DialectSyntax: Send + Sync {
    /// Dialect this syntax renders.
    fn dialect(&self) -> Dialect;

    /// Legal ranges.
    fn limits(&self) -> DialectLimits;

    /// Lines enabling a feature, or `None` if the dialect has no such
    /// feature.
    fn feature(&self, name: &str) -> Option<Vec<String>>;

    /// Lines declaring a VLAN, with its optional VNI mapping.
    fn vlan(&self, id: i64, name: Option<&str>, vni: Option<i64>) -> Vec<String>;

    /// Interface name of a port-channel.
    fn port_channel_name(&self, id: i64) -> String;

    /// Member statement placed under each bundled interface.
    fn channel_group(&self, id: i64, mode: LacpMode) -> String {
        format!("  channel-group {id} mode {}", mode.as_str())
    }

    /// Console line stanza.
    fn console(&self, console: &ConsoleLineInput) -> Vec<String>;

    /// VTY stanza.
    fn vty(&self, vty: &VtyLineInput) -> Vec<String>;

    /// Lines undoing a block that is no longer rendered.
    fn negate(&self, block: &ConfigBlock) -> Vec<String> {
        match block.section {
            Section::Lines => block
                .stanzas()
                .into_iter()
                .flat_map(|stanza| {
                    std::iter::once(stanza.header.to_string()).chain(
                        stanza
                            .children
                            .into_iter()
                            .map(|child| negate_statement(Section::Lines, child)),
                    )
                })
                .collect(),
            _ => negate_top_level(block),
        }
    }

    /// Lines withdrawing the statements a changed block no longer carries.
    ///
    /// Each affected stanza header is repeated so the negation lands in the
    /// right context. Statements still present in `new` are left alone. A
    /// block whose own object changed is negated whole.
    fn retract(&self, old: &ConfigBlock, new: &ConfigBlock) -> Vec<String> {
        if old.lines.first() != new.lines.first() {
            return self.negate(old);
        }

        let kept = new.stanzas();
        let mut out = Vec::new();
        for stanza in old.stanzas() {
            let still: &[&str] = kept
                .iter()
                .find(|k| k.header == stanza.header)
                .map(|k| k.children.as_slice())
                .unwrap_or_default();

            let mut withdrawn: Vec<String> = Vec::new();
            for child in stanza.children.iter().filter(|c| !still.contains(c)) {
                let negation = negate_statement(old.section, child);
                if !withdrawn.contains(&negation) {
                    withdrawn.push(negation);
                }
            }
            if !withdrawn.is_empty() {
                out.push(stanza.header.to_string());
                out.append(&mut withdrawn);
            }
        }
        out
    }
}

/// Negation of one indented statement. Line settings and bundle membership
/// are cleared by keyword; everything else is negated verbatim.
fn negate_statement(section: Section, statement: &str) -> String {
    let statement = statement.trim();
    let keyword = statement.split_whitespace().next().unwrap_or(statement);
    if section == Section::Lines || keyword == "channel-group" {
        format!("  no {keyword}")
    } else {
        format!("  no {statement}")
    }
}

/// Negates the block's own object (its first statement). Later top-level
/// statements are context headers such as bundle members; their children
/// are negated one by one under the same header.
fn negate_top_level(block: &ConfigBlock) -> Vec<String> {
    let mut out = Vec::new();
    let mut stanzas = block.stanzas().into_iter();

    if let Some(head) = stanzas.next().map(|s| s.header) {
        if let Some(stripped) = head.strip_prefix("no ") {
            out.push(stripped.to_string());
        } else if block.section == Section::Interfaces && !is_logical_interface(head) {
            out.push(format!("default {head}"));
        } else {
            out.push(format!("no {head}"));
        }
    }

    for stanza in stanzas {
        out.push(stanza.header.to_string());
        out.extend(
            stanza
                .children
                .into_iter()
                .map(|child| negate_statement(block.section, child)),
        );
    }
    out
}

/// Physical interfaces cannot be deleted, only reset.
fn is_logical_interface(header: &str) -> bool {
    let name = header.trim_start_matches("interface ").to_ascii_lowercase();
    ["loopback", "port-channel", "vlan", "vxlan"]
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Returns the syntax for a dialect.
#[must_use]
pub fn syntax_for(dialect: Dialect) -> &'static dyn DialectSyntax {
    match dialect {
        Dialect::Nxos => &NxosSyntax,
        Dialect::Eos => &EosSyntax,
    }
}
