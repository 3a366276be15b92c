//! Section-by-section template rendering.
//!
//! Every section is an independent function over typed inputs. A section
//! that fails contributes no blocks and reports all of its errors; the other
//! sections still render.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::RenderError;
use crate::inventory::Dialect;
use crate::resolver::ResolvedVariableSet;

use super::dialect::{DialectSyntax, syntax_for};
use super::document::{ConfigBlock, RenderedConfig, Section};
use super::inputs::{
    InterfaceInput, LinesInput, LoopbackInput, PortChannelInput, Range, VlanEntry, VniMappings,
    natural_cmp,
};

/// One section entry of a template.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateSection {
    /// Section to render.
    pub section: Section,
    /// Whether its primary variables must be present.
    pub required: bool,
}

/// Static per-dialect document skeleton.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Template {
    dialect: Dialect,
    sections: Vec<TemplateSection>,
}

impl Template {
    /// Creates a template; sections are kept in canonical section order.
    #[must_use]
    pub fn new(dialect: Dialect, mut sections: Vec<TemplateSection>) -> Self {
        sections.sort_by_key(|s| s.section);
        sections.dedup_by_key(|s| s.section);
        Self { dialect, sections }
    }

    /// The standard campus template: features, interfaces and lines are
    /// required; VLANs and port-channels are optional.
    #[must_use]
    pub fn standard(dialect: Dialect) -> Self {
        let required = |section| TemplateSection {
            section,
            required: true,
        };
        let optional = |section| TemplateSection {
            section,
            required: false,
        };
        Self::new(
            dialect,
            vec![
                required(Section::Features),
                optional(Section::Vlans),
                optional(Section::PortChannels),
                required(Section::Interfaces),
                required(Section::Lines),
            ],
        )
    }

    /// Target dialect.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Sections in emission order.
    #[must_use]
    pub fn sections(&self) -> &[TemplateSection] {
        &self.sections
    }
}

/// An error attributed to one section.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SectionError {
    /// Section that failed.
    pub section: Section,
    /// The failure.
    #[serde(serialize_with = "serialize_display")]
    pub error: RenderError,
}

/// A possibly partial config plus every error found.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    /// Blocks of the sections that rendered cleanly.
    pub config: RenderedConfig,
    /// Errors from the sections that did not.
    pub errors: Vec<SectionError>,
}

impl RenderOutcome {
    /// Returns true if every section rendered.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Sections that failed.
    #[must_use]
    pub fn failed_sections(&self) -> BTreeSet<Section> {
        self.errors.iter().map(|e| e.section).collect()
    }

    /// Converts into the clean config or the error list.
    ///
    /// # Errors
    ///
    /// Returns the collected section errors if any section failed.
    pub fn into_result(self) -> std::result::Result<RenderedConfig, Vec<SectionError>> {
        if self.errors.is_empty() {
            Ok(self.config)
        } else {
            Err(self.errors)
        }
    }
}

/// Renders resolved variable sets into configuration documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

type SectionResult = std::result::Result<Vec<ConfigBlock>, Vec<RenderError>>;

/// What a section function sees.
struct SectionContext<'a> {
    vars: &'a ResolvedVariableSet,
    syntax: &'a dyn DialectSyntax,
    required: bool,
}

impl TemplateRenderer {
    /// Creates a renderer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Renders one device. Never fails outright; see [`RenderOutcome`].
    #[must_use]
    pub fn render(&self, vars: &ResolvedVariableSet, template: &Template) -> RenderOutcome {
        let syntax = syntax_for(template.dialect());
        let mut blocks = Vec::new();
        let mut errors = Vec::new();

        for entry in template.sections() {
            let ctx = SectionContext {
                vars,
                syntax,
                required: entry.required,
            };
            let result = match entry.section {
                Section::Features => render_features(&ctx),
                Section::Vlans => render_vlans(&ctx),
                Section::PortChannels => render_port_channels(&ctx),
                Section::Interfaces => render_interfaces(&ctx),
                Section::Lines => render_lines(&ctx),
            };
            match result {
                Ok(section_blocks) => blocks.extend(section_blocks),
                Err(section_errors) => {
                    debug!(
                        "Section {} failed for {} with {} error(s)",
                        entry.section,
                        vars.device(),
                        section_errors.len()
                    );
                    errors.extend(section_errors.into_iter().map(|error| SectionError {
                        section: entry.section,
                        error,
                    }));
                }
            }
        }

        let config = RenderedConfig::new(vars.device(), template.dialect(), blocks);
        debug!(
            "Rendered {} blocks for {} ({})",
            config.blocks().len(),
            vars.device(),
            &config.content_hash()[..8]
        );
        RenderOutcome { config, errors }
    }
}

impl SectionContext<'_> {
    /// Decodes a section's primary key, honouring the `required` flag.
    fn primary<T: DeserializeOwned>(&self, key: &str) -> std::result::Result<Option<T>, RenderError> {
        if self.required {
            self.vars.require_decoded(key).map(Some)
        } else {
            self.vars.decode(key)
        }
    }
}

fn check_range(errors: &mut Vec<RenderError>, key: String, value: i64, range: Range, what: &str) {
    if !range.contains(value) {
        errors.push(RenderError::invalid(
            key,
            value,
            format!("{what} must be within {range}"),
        ));
    }
}

fn finish(blocks: Vec<ConfigBlock>, errors: Vec<RenderError>) -> SectionResult {
    if errors.is_empty() { Ok(blocks) } else { Err(errors) }
}

fn render_features(ctx: &SectionContext<'_>) -> SectionResult {
    let features: Vec<String> = match ctx.primary("features") {
        Ok(features) => features.unwrap_or_default(),
        Err(e) => return Err(vec![e]),
    };

    let sorted: BTreeSet<&str> = features.iter().map(String::as_str).collect();
    let mut blocks = Vec::new();
    let mut errors = Vec::new();
    // Block keys spell spaces as dashes; two names must not share one.
    let mut keys: BTreeMap<String, &str> = BTreeMap::new();

    for name in sorted {
        let key = name.replace(' ', "-");
        if let Some(other) = keys.get(&key) {
            errors.push(RenderError::invalid(
                "features",
                name,
                format!("collides with feature '{other}'"),
            ));
            continue;
        }
        match ctx.syntax.feature(name) {
            Some(lines) => {
                keys.insert(key.clone(), name);
                blocks.push(ConfigBlock::new(Section::Features, key, lines));
            }
            None => errors.push(RenderError::invalid(
                "features",
                name,
                format!("not a {} feature", ctx.syntax.dialect()),
            )),
        }
    }
    finish(blocks, errors)
}

fn render_vlans(ctx: &SectionContext<'_>) -> SectionResult {
    let vlans: Option<Vec<VlanEntry>> = ctx.primary("vlans").map_err(|e| vec![e])?;
    let vni: VniMappings = ctx
        .vars
        .decode("vni_mappings")
        .map_err(|e| vec![e])?
        .unwrap_or_default();
    let vlans = vlans.unwrap_or_default();
    let limits = ctx.syntax.limits();

    let mut errors = Vec::new();
    let mut by_id: BTreeMap<i64, &VlanEntry> = BTreeMap::new();
    for (index, vlan) in vlans.iter().enumerate() {
        let key = format!("vlans[{index}]");
        check_range(&mut errors, key.clone(), vlan.id(), limits.vlan, "VLAN id");
        if by_id.insert(vlan.id(), vlan).is_some() {
            errors.push(RenderError::invalid(key, vlan.id(), "duplicate VLAN id"));
        }
    }
    for (vlan, segment) in &vni {
        let key = format!("vni_mappings.{vlan}");
        check_range(&mut errors, key.clone(), *segment, limits.vni, "VNI");
        if !by_id.contains_key(vlan) {
            errors.push(RenderError::invalid(key, vlan, "VLAN is not declared in vlans"));
        }
    }

    let blocks = by_id
        .values()
        .map(|vlan| {
            ConfigBlock::new(
                Section::Vlans,
                format!("vlan{}", vlan.id()),
                ctx.syntax.vlan(vlan.id(), vlan.name(), vni.get(&vlan.id()).copied()),
            )
        })
        .collect();
    finish(blocks, errors)
}

fn render_port_channels(ctx: &SectionContext<'_>) -> SectionResult {
    let channels: Vec<PortChannelInput> = ctx
        .primary("portchannels")
        .map_err(|e| vec![e])?
        .unwrap_or_default();
    let default_mtu: Option<i64> = ctx.vars.decode("mtu").map_err(|e| vec![e])?;
    let limits = ctx.syntax.limits();

    let mut errors = Vec::new();
    let mut by_id: BTreeMap<i64, &PortChannelInput> = BTreeMap::new();
    let mut member_owner: BTreeMap<&str, i64> = BTreeMap::new();

    for (index, pc) in channels.iter().enumerate() {
        let key = format!("portchannels[{index}]");
        check_range(&mut errors, format!("{key}.id"), pc.id, limits.port_channel, "port-channel id");
        if let Some(mtu) = pc.mtu.or(default_mtu) {
            check_range(&mut errors, format!("{key}.mtu"), mtu, limits.mtu, "MTU");
        }
        if by_id.insert(pc.id, pc).is_some() {
            errors.push(RenderError::invalid(format!("{key}.id"), pc.id, "duplicate port-channel id"));
        }
        for member in &pc.members {
            if let Some(owner) = member_owner.insert(member.as_str(), pc.id)
                && owner != pc.id
            {
                errors.push(RenderError::invalid(
                    format!("{key}.members"),
                    member,
                    format!("already a member of port-channel {owner}"),
                ));
            }
        }
    }

    let blocks = by_id
        .values()
        .map(|pc| {
            let name = ctx.syntax.port_channel_name(pc.id);
            let mut lines = vec![format!("interface {name}")];
            if let Some(description) = &pc.description {
                lines.push(format!("  description {description}"));
            }
            if let Some(mtu) = pc.mtu.or(default_mtu) {
                lines.push(format!("  mtu {mtu}"));
            }

            let mut members: Vec<&String> = pc.members.iter().collect();
            members.sort_by(|a, b| natural_cmp(a, b));
            members.dedup();
            for member in members {
                lines.push(format!("interface {member}"));
                lines.push(ctx.syntax.channel_group(pc.id, pc.mode));
            }
            ConfigBlock::new(Section::PortChannels, name, lines)
        })
        .collect();
    finish(blocks, errors)
}

fn render_interfaces(ctx: &SectionContext<'_>) -> SectionResult {
    let mut errors = Vec::new();

    let interfaces: Option<Vec<InterfaceInput>> = ctx
        .primary("interfaces")
        .unwrap_or_else(|e| {
            errors.push(e);
            None
        });
    let default_mtu: Option<i64> = ctx.primary("mtu").unwrap_or_else(|e| {
        errors.push(e);
        None
    });
    let loopbacks: BTreeMap<String, LoopbackInput> = ctx
        .vars
        .decode("loopback_interfaces")
        .unwrap_or_else(|e| {
            errors.push(e);
            None
        })
        .unwrap_or_default();

    if !errors.is_empty() {
        return Err(errors);
    }

    let limits = ctx.syntax.limits();
    if let Some(mtu) = default_mtu {
        check_range(&mut errors, String::from("mtu"), mtu, limits.mtu, "MTU");
    }

    let mut blocks: Vec<ConfigBlock> = Vec::new();
    let mut seen = BTreeSet::new();

    for (index, iface) in interfaces.unwrap_or_default().iter().enumerate() {
        let key = format!("interfaces[{index}]");
        if !seen.insert(iface.name.clone()) {
            errors.push(RenderError::invalid(format!("{key}.name"), &iface.name, "duplicate interface"));
            continue;
        }
        let mtu = iface.mtu.or(default_mtu);
        if let Some(mtu) = iface.mtu {
            check_range(&mut errors, format!("{key}.mtu"), mtu, limits.mtu, "MTU");
        }

        let mut lines = vec![format!("interface {}", iface.name)];
        if let Some(description) = &iface.description {
            lines.push(format!("  description {description}"));
        }
        if let Some(mtu) = mtu {
            lines.push(format!("  mtu {mtu}"));
        }
        if let Some(address) = &iface.ip_address {
            if iface.name.to_ascii_lowercase().starts_with("ethernet") {
                lines.push(String::from("  no switchport"));
            }
            lines.push(format!("  ip address {address}"));
        }
        lines.push(String::from(if iface.shutdown { "  shutdown" } else { "  no shutdown" }));
        blocks.push(ConfigBlock::new(Section::Interfaces, iface.name.clone(), lines));
    }

    for (name, loopback) in &loopbacks {
        if !seen.insert(name.clone()) {
            errors.push(RenderError::invalid(
                format!("loopback_interfaces.{name}"),
                name,
                "duplicate interface",
            ));
            continue;
        }
        let mut lines = vec![format!("interface {name}")];
        if let Some(description) = &loopback.description {
            lines.push(format!("  description {description}"));
        }
        lines.push(format!("  ip address {}", loopback.ip_address));
        blocks.push(ConfigBlock::new(Section::Interfaces, name.clone(), lines));
    }

    blocks.sort_by(|a, b| natural_cmp(&a.key, &b.key));
    finish(blocks, errors)
}

fn render_lines(ctx: &SectionContext<'_>) -> SectionResult {
    let Some(lines) = ctx.primary::<LinesInput>("lines").map_err(|e| vec![e])? else {
        return Ok(Vec::new());
    };
    if ctx.required && lines.console.is_none() && lines.vty.is_none() {
        return Err(vec![RenderError::malformed(
            "lines",
            "defines neither console nor vty",
        )]);
    }

    let limits = ctx.syntax.limits();
    let mut errors = Vec::new();
    let mut blocks = Vec::new();

    if let Some(console) = &lines.console {
        check_range(
            &mut errors,
            String::from("lines.console.exec_timeout"),
            console.exec_timeout,
            limits.line_timeout,
            "timeout",
        );
        blocks.push(ConfigBlock::new(Section::Lines, "console", ctx.syntax.console(console)));
    }
    if let Some(vty) = &lines.vty {
        check_range(
            &mut errors,
            String::from("lines.vty.exec_timeout"),
            vty.exec_timeout,
            limits.line_timeout,
            "timeout",
        );
        if let Some(limit) = vty.session_limit {
            check_range(
                &mut errors,
                String::from("lines.vty.session_limit"),
                limit,
                limits.session_limit,
                "session limit",
            );
        }
        blocks.push(ConfigBlock::new(Section::Lines, "vty", ctx.syntax.vty(vty)));
    }
    finish(blocks, errors)
}

fn serialize_display<S: serde::Serializer>(
    error: &RenderError,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolveError;
    use crate::inventory::{Device, Tier};
    use crate::resolver::{ScopeSet, VariableResolver, VariableScope, vars_from_yaml};
    use std::sync::Arc;

    const LEAF_VARS: &str = r"
features: [lacp, ospf, bgp, 'nv overlay']
mtu: 9216
vlans: [300, {id: 100, name: users}, 200]
vni_mappings: {100: 10100, 200: 10200, 300: 10300}
portchannels:
  - id: 10
    members: [Ethernet1/10, Ethernet1/2]
    description: to-spine
interfaces:
  - name: Ethernet1/10
    description: uplink
  - name: Ethernet1/2
    ip_address: 10.0.0.1/31
loopback_interfaces:
  loopback0:
    description: Router-ID
    ip_address: 10.10.10.11/32
lines:
  console: {exec_timeout: 15}
  vty: {exec_timeout: 30, session_limit: 8, access_class: MGMT}
";

    fn resolve(name: &str, dialect: Dialect, yaml: &str) -> ResolvedVariableSet {
        let scopes = ScopeSet::new().with(VariableScope::device(
            name,
            vars_from_yaml(yaml).expect("valid yaml"),
        ));
        let device = Device::new(name, Tier::Leaf, dialect, &[]);
        VariableResolver::new(Arc::new(scopes))
            .resolve(&device)
            .expect("resolves")
    }

    #[test]
    fn test_render_twice_identical() {
        let vars = resolve("dub-st1-lf1", Dialect::Nxos, LEAF_VARS);
        let template = Template::standard(Dialect::Nxos);

        let first = TemplateRenderer::new().render(&vars, &template);
        let second = TemplateRenderer::new().render(&vars, &template);

        assert!(first.is_clean(), "{:?}", first.errors);
        assert_eq!(first.config.content_hash(), second.config.content_hash());
        assert_eq!(first.config.to_text(), second.config.to_text());
    }

    #[test]
    fn test_section_order_and_sorting() {
        let vars = resolve("dub-st1-lf1", Dialect::Nxos, LEAF_VARS);
        let config = TemplateRenderer::new()
            .render(&vars, &Template::standard(Dialect::Nxos))
            .into_result()
            .expect("clean");

        let sections: Vec<Section> = config.blocks().iter().map(|b| b.section).collect();
        let mut ordered = sections.clone();
        ordered.sort();
        assert_eq!(sections, ordered);

        let features: Vec<&str> = config.blocks_in(Section::Features).map(|b| b.key.as_str()).collect();
        assert_eq!(features, vec!["bgp", "lacp", "nv-overlay", "ospf"]);

        let vlans: Vec<&str> = config.blocks_in(Section::Vlans).map(|b| b.key.as_str()).collect();
        assert_eq!(vlans, vec!["vlan100", "vlan200", "vlan300"]);

        let interfaces: Vec<&str> =
            config.blocks_in(Section::Interfaces).map(|b| b.key.as_str()).collect();
        assert_eq!(interfaces, vec!["Ethernet1/2", "Ethernet1/10", "loopback0"]);

        let pc = config.block(Section::PortChannels, "port-channel10").expect("pc10");
        assert_eq!(
            pc.lines,
            vec![
                String::from("interface port-channel10"),
                String::from("  description to-spine"),
                String::from("  mtu 9216"),
                String::from("interface Ethernet1/2"),
                String::from("  channel-group 10 mode active"),
                String::from("interface Ethernet1/10"),
                String::from("  channel-group 10 mode active"),
            ]
        );
    }

    #[test]
    fn test_missing_interfaces_does_not_block_other_sections() {
        let vars = resolve(
            "dub-st1-lf1",
            Dialect::Nxos,
            "features: [lacp]\nmtu: 9216\nlines:\n  console: {exec_timeout: 15}\n",
        );
        let outcome = TemplateRenderer::new().render(&vars, &Template::standard(Dialect::Nxos));

        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].section, Section::Interfaces);
        assert_eq!(
            outcome.errors[0].error,
            RenderError::Resolve(ResolveError::MissingRequiredVariable {
                device: String::from("dub-st1-lf1"),
                key: String::from("interfaces"),
            })
        );
        assert!(outcome.config.block(Section::Features, "lacp").is_some());
        assert!(outcome.config.block(Section::Lines, "console").is_some());
        assert_eq!(outcome.config.blocks_in(Section::Interfaces).count(), 0);
    }

    #[test]
    fn test_all_errors_reported_in_one_pass() {
        let vars = resolve(
            "dub-st1-lf1",
            Dialect::Nxos,
            "vlans: [0, 4000]\nlines:\n  vty: {exec_timeout: -1}\n",
        );
        let outcome = TemplateRenderer::new().render(&vars, &Template::standard(Dialect::Nxos));

        let kinds: Vec<(Section, &str)> = outcome
            .errors
            .iter()
            .map(|e| (e.section, e.error.kind()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (Section::Features, "missing_required_variable"),
                (Section::Vlans, "invalid_value"),
                (Section::Vlans, "invalid_value"),
                (Section::Interfaces, "missing_required_variable"),
                (Section::Interfaces, "missing_required_variable"),
                (Section::Lines, "invalid_value"),
            ]
        );
    }

    #[test]
    fn test_ranges_differ_per_dialect() {
        let yaml = "features: []\nmtu: 9216\ninterfaces: []\nvlans: [4000]\nportchannels: [{id: 3000}]\nlines:\n  console: {exec_timeout: 100000}\n";

        let nxos = TemplateRenderer::new().render(
            &resolve("dub-st1-lf1", Dialect::Nxos, yaml),
            &Template::standard(Dialect::Nxos),
        );
        assert_eq!(
            nxos.failed_sections(),
            BTreeSet::from([Section::Vlans])
        );

        let eos = TemplateRenderer::new().render(
            &resolve("dub-st1-lf1", Dialect::Eos, yaml),
            &Template::standard(Dialect::Eos),
        );
        assert_eq!(
            eos.failed_sections(),
            BTreeSet::from([Section::PortChannels, Section::Interfaces, Section::Lines])
        );
    }

    #[test]
    fn test_out_of_range_not_clamped() {
        let vars = resolve(
            "dub-st1-lf1",
            Dialect::Nxos,
            "features: []\nmtu: 9216\ninterfaces: [{name: Ethernet1/1, mtu: 9300}]\nlines: {console: {exec_timeout: 5}}\n",
        );
        let outcome = TemplateRenderer::new().render(&vars, &Template::standard(Dialect::Nxos));

        assert_eq!(
            outcome.errors[0].error,
            RenderError::invalid("interfaces[0].mtu", 9300, "MTU must be within 576-9216")
        );
        assert!(outcome.config.blocks_in(Section::Interfaces).next().is_none());
    }

    #[test]
    fn test_eos_rejects_unknown_feature() {
        let vars = resolve(
            "dub-st2-lf1",
            Dialect::Eos,
            "features: [ip-routing, ospf]\nmtu: 9214\ninterfaces: []\nlines: {vty: {exec_timeout: 30}}\n",
        );
        let outcome = TemplateRenderer::new().render(&vars, &Template::standard(Dialect::Eos));

        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].section, Section::Features);
        assert!(outcome.config.blocks_in(Section::Features).next().is_none());
    }

    #[test]
    fn test_feature_key_collision_rejected() {
        let vars = resolve(
            "dub-st1-lf1",
            Dialect::Nxos,
            "features: [nv-overlay, 'nv overlay', lacp]\n",
        );
        let template = Template::new(
            Dialect::Nxos,
            vec![TemplateSection {
                section: Section::Features,
                required: true,
            }],
        );
        let outcome = TemplateRenderer::new().render(&vars, &template);

        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].error.kind(), "invalid_value");
        assert!(outcome.errors[0].error.to_string().contains("collides"));
    }

    #[test]
    fn test_member_in_two_bundles_rejected() {
        let vars = resolve(
            "dub-st1-lf1",
            Dialect::Nxos,
            "portchannels:\n  - {id: 10, members: [Ethernet1/1]}\n  - {id: 20, members: [Ethernet1/1]}\n",
        );
        let template = Template::new(
            Dialect::Nxos,
            vec![TemplateSection {
                section: Section::PortChannels,
                required: true,
            }],
        );
        let outcome = TemplateRenderer::new().render(&vars, &template);

        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].error.kind(), "invalid_value");
    }
}
