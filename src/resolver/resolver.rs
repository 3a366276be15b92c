//! Hierarchical variable resolution.
//!
//! Scopes are folded left to right into a single mapping:
//! facts, then group scopes ordered from least to most specific, then the
//! device's own scope. Later scopes overwrite earlier ones key by key.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::error::ResolveError;
use crate::inventory::Device;

use super::resolved::ResolvedVariableSet;
use super::scope::{ALL_GROUP, ScopeKind, ScopeSet, VariableScope, Vars};

/// How nested (non-list) mappings defined at several scopes combine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// The most specific scope replaces the whole mapping.
    #[default]
    Replace,
    /// Mappings merge recursively; lists are still replaced.
    #[serde(alias = "deep")]
    DeepMerge,
}

/// A device's variables with every conflicting key left out, plus the
/// conflicts found.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Keys that resolved without conflict.
    pub vars: ResolvedVariableSet,
    /// Scope conflicts; empty when the set is complete.
    pub conflicts: Vec<ResolveError>,
}

impl Resolution {
    /// Returns true if no key conflicted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Returns true if `key` was left out because of a conflict.
    #[must_use]
    pub fn conflicts_on(&self, key: &str) -> bool {
        self.conflicts
            .iter()
            .any(|c| matches!(c, ResolveError::ScopeConflict { key: k, .. } if k == key))
    }

    /// The complete set, or the conflicts.
    ///
    /// # Errors
    ///
    /// Returns the conflicts if there are any.
    pub fn into_result(self) -> std::result::Result<ResolvedVariableSet, Vec<ResolveError>> {
        if self.conflicts.is_empty() {
            Ok(self.vars)
        } else {
            Err(self.conflicts)
        }
    }
}

/// Resolver for per-device variable sets.
#[derive(Debug, Clone)]
pub struct VariableResolver {
    /// Snapshot of all scopes for this run.
    scopes: Arc<ScopeSet>,
    /// Nested mapping policy.
    policy: MergePolicy,
}

impl VariableResolver {
    /// Creates a resolver over a scope snapshot.
    #[must_use]
    pub const fn new(scopes: Arc<ScopeSet>) -> Self {
        Self {
            scopes,
            policy: MergePolicy::Replace,
        }
    }

    /// Sets the nested mapping policy.
    #[must_use]
    pub const fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the scope snapshot.
    #[must_use]
    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    /// Computes the device's group chain, least specific first.
    ///
    /// The implicit `all` group always leads. Groups without a scope are
    /// skipped. The sort is stable, so groups sharing a specificity keep
    /// their membership order.
    #[must_use]
    pub fn group_chain(&self, device: &Device) -> Vec<&VariableScope> {
        let mut seen = HashSet::new();
        let mut chain: Vec<&VariableScope> = std::iter::once(ALL_GROUP)
            .chain(device.groups.iter().map(String::as_str))
            .filter(|name| seen.insert(*name))
            .filter_map(|name| {
                let scope = self.scopes.group(name);
                if scope.is_none() {
                    debug!("Group '{name}' of {} has no variables", device.name);
                }
                scope
            })
            .collect();

        chain.sort_by_key(|scope| scope.specificity().unwrap_or(0));
        chain
    }

    /// Resolves the variable set for one device.
    ///
    /// # Errors
    ///
    /// Returns every [`ResolveError::ScopeConflict`] found in the chain.
    pub fn resolve(&self, device: &Device) -> std::result::Result<ResolvedVariableSet, Vec<ResolveError>> {
        self.resolve_partial(device).into_result()
    }

    /// Resolves everything that can be resolved. Group values of a
    /// conflicting key are skipped so the rest of the set can still be
    /// rendered and checked.
    #[must_use]
    pub fn resolve_partial(&self, device: &Device) -> Resolution {
        let chain = self.group_chain(device);
        let conflicts = detect_conflicts(&device.name, &chain);
        let conflicted: HashSet<&str> = conflicts
            .iter()
            .filter_map(|c| match c {
                ResolveError::ScopeConflict { key, .. } => Some(key.as_str()),
                _ => None,
            })
            .collect();

        let facts = facts_scope(device);
        let device_scope = self.scopes.device(&device.name);

        let mut vars: BTreeMap<String, Value> = BTreeMap::new();
        let mut provenance: BTreeMap<String, String> = BTreeMap::new();

        let layers = std::iter::once(&facts).chain(chain).chain(device_scope);
        for scope in layers {
            let label = scope_label(scope);
            let is_group = matches!(scope.kind, ScopeKind::Group { .. });
            for (key, value) in &scope.vars {
                if is_group && conflicted.contains(key.as_str()) {
                    continue;
                }
                self.fold(&mut vars, key, value);
                provenance.insert(key.clone(), label.clone());
            }
        }

        debug!(
            "Resolved {} variables for {} (policy {:?})",
            vars.len(),
            device.name,
            self.policy
        );

        if !conflicts.is_empty() {
            debug!("{} has {} conflicting key(s)", device.name, conflicts.len());
        }
        Resolution {
            vars: ResolvedVariableSet::new(device.name.clone(), vars, provenance),
            conflicts,
        }
    }

    /// Folds one key into the accumulator according to the merge policy.
    fn fold(&self, vars: &mut BTreeMap<String, Value>, key: &str, value: &Value) {
        match (self.policy, vars.get_mut(key)) {
            (MergePolicy::DeepMerge, Some(existing)) => deep_merge(existing, value),
            _ => {
                vars.insert(key.to_string(), value.clone());
            }
        }
    }
}

/// Recursively merges `overlay` into `base`. Only mapping-into-mapping
/// merges; anything else (lists included) is replaced.
fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Finds keys defined with different values by scopes of equal specificity.
fn detect_conflicts(device: &str, chain: &[&VariableScope]) -> Vec<ResolveError> {
    let mut by_level: BTreeMap<u16, Vec<&VariableScope>> = BTreeMap::new();
    for scope in chain {
        by_level
            .entry(scope.specificity().unwrap_or(0))
            .or_default()
            .push(scope);
    }

    let mut conflicts = Vec::new();
    for (specificity, scopes) in by_level.into_iter().filter(|(_, s)| s.len() > 1) {
        let mut keys: Vec<&String> = scopes.iter().flat_map(|s| s.vars.keys()).collect();
        keys.sort();
        keys.dedup();

        for key in keys {
            let definers: Vec<&VariableScope> =
                scopes.iter().copied().filter(|s| s.vars.contains_key(key)).collect();
            let Some(first) = definers.first() else {
                continue;
            };
            let disagree = definers.iter().any(|s| s.vars.get(key) != first.vars.get(key));
            if disagree {
                conflicts.push(ResolveError::ScopeConflict {
                    device: device.to_string(),
                    key: key.clone(),
                    specificity,
                    scopes: definers.iter().map(|s| s.name.clone()).collect(),
                });
            }
        }
    }
    conflicts
}

/// Builds the lowest layer from inventory identity.
fn facts_scope(device: &Device) -> VariableScope {
    let mut vars = Vars::new();
    vars.insert(
        String::from("inventory_hostname"),
        Value::String(device.name.clone()),
    );
    vars.insert(
        String::from("device_tier"),
        Value::String(device.tier.as_str().to_string()),
    );
    vars.insert(
        String::from("device_dialect"),
        Value::String(device.dialect.as_str().to_string()),
    );
    if let Some(site) = &device.site {
        vars.insert(String::from("device_site"), Value::String(site.clone()));
    }
    VariableScope {
        name: String::from("facts"),
        kind: ScopeKind::Facts,
        vars,
    }
}

fn scope_label(scope: &VariableScope) -> String {
    match scope.kind {
        ScopeKind::Facts => scope.name.clone(),
        ScopeKind::Group { .. } => format!("group:{}", scope.name),
        ScopeKind::Device => format!("host:{}", scope.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Dialect, Tier};
    use crate::resolver::scope::{SPECIFICITY_ALL, SPECIFICITY_GROUP, SPECIFICITY_TIER, vars_from_yaml};

    fn vars(yaml: &str) -> Vars {
        vars_from_yaml(yaml).expect("valid yaml")
    }

    fn leaf() -> Device {
        Device::new("dub-st1-lf1", Tier::Leaf, Dialect::Nxos, &["data_switches", "leaf_defaults"])
    }

    fn campus_scopes() -> ScopeSet {
        ScopeSet::new()
            .with(VariableScope::group(
                "all",
                SPECIFICITY_ALL,
                vars("bgp_asn: 65001\nospf_area: 0.0.0.0\nmtu: 1500\n"),
            ))
            .with(VariableScope::group(
                "data_switches",
                SPECIFICITY_GROUP,
                vars("mtu: 9216\n"),
            ))
            .with(VariableScope::group(
                "leaf_defaults",
                SPECIFICITY_TIER,
                vars("portchannels:\n  - id: 10\n    members: [Ethernet1/1, Ethernet1/2]\nmtu: 9000\n"),
            ))
            .with(VariableScope::device(
                "dub-st1-lf1",
                vars("portchannels:\n  - id: 10\n    members: [Ethernet1/1, Ethernet1/2, Ethernet1/3]\n"),
            ))
    }

    fn resolver() -> VariableResolver {
        VariableResolver::new(Arc::new(campus_scopes()))
    }

    #[test]
    fn test_resolution_deterministic() {
        let resolver = resolver();
        let first = resolver.resolve(&leaf()).expect("resolves");
        let second = resolver.resolve(&leaf()).expect("resolves");
        assert_eq!(first, second);
    }

    #[test]
    fn test_leaf_scenario_list_replaced() {
        let resolved = resolver().resolve(&leaf()).expect("resolves");

        assert_eq!(resolved.get("mtu"), Some(&Value::from(9216)));

        let portchannels = resolved.get("portchannels").expect("portchannels present");
        let expected: Value = serde_yaml::from_str(
            "- id: 10\n  members: [Ethernet1/1, Ethernet1/2, Ethernet1/3]\n",
        )
        .expect("valid yaml");
        assert_eq!(portchannels, &expected);
        assert_eq!(resolved.source_of("portchannels"), Some("host:dub-st1-lf1"));
    }

    #[test]
    fn test_group_chain_sorted_by_specificity() {
        let resolver = resolver();
        let device = leaf();
        let names: Vec<&str> = resolver
            .group_chain(&device)
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        // leaf_defaults (tier, 10) applies before data_switches (group, 20)
        // even though membership lists data_switches first.
        assert_eq!(names, vec!["all", "leaf_defaults", "data_switches"]);
    }

    #[test]
    fn test_device_scope_wins_every_key() {
        let scopes = campus_scopes().with(VariableScope::device(
            "dub-st1-lf1",
            vars("mtu: 1600\nbgp_asn: 65100\nospf_area: 0.0.0.1\n"),
        ));
        let resolved = VariableResolver::new(Arc::new(scopes))
            .resolve(&leaf())
            .expect("resolves");

        assert_eq!(resolved.get("mtu"), Some(&Value::from(1600)));
        assert_eq!(resolved.get("bgp_asn"), Some(&Value::from(65100)));
        assert_eq!(resolved.get("ospf_area"), Some(&Value::from("0.0.0.1")));
    }

    #[test]
    fn test_inherited_defaults_and_facts() {
        let resolved = resolver().resolve(&leaf()).expect("resolves");

        assert_eq!(resolved.get("bgp_asn"), Some(&Value::from(65001)));
        assert_eq!(resolved.source_of("bgp_asn"), Some("group:all"));
        assert_eq!(resolved.get("inventory_hostname"), Some(&Value::from("dub-st1-lf1")));
        assert_eq!(resolved.get("device_site"), Some(&Value::from("st1")));
    }

    #[test]
    fn test_scope_conflict_same_specificity() {
        let scopes = campus_scopes().with(VariableScope::group(
            "edge_switches",
            SPECIFICITY_GROUP,
            vars("mtu: 1500\n"),
        ));
        let device = Device::new(
            "dub-st1-lf1",
            Tier::Leaf,
            Dialect::Nxos,
            &["data_switches", "edge_switches", "leaf_defaults"],
        );

        let errors = VariableResolver::new(Arc::new(scopes))
            .resolve(&device)
            .expect_err("conflict detected");

        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ResolveError::ScopeConflict { key, specificity, scopes, .. } => {
                assert_eq!(key, "mtu");
                assert_eq!(*specificity, SPECIFICITY_GROUP);
                assert_eq!(scopes, &vec![String::from("data_switches"), String::from("edge_switches")]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_partial_resolution_skips_conflicting_key() {
        let scopes = campus_scopes().with(VariableScope::group(
            "edge_switches",
            SPECIFICITY_GROUP,
            vars("mtu: 1500
"),
        ));
        let device = Device::new(
            "dub-st1-lf1",
            Tier::Leaf,
            Dialect::Nxos,
            &["data_switches", "edge_switches", "leaf_defaults"],
        );

        let resolution = VariableResolver::new(Arc::new(scopes)).resolve_partial(&device);
        assert!(!resolution.is_complete());
        assert!(resolution.conflicts_on("mtu"));
        // Lower scopes never stand in for a conflicting key.
        assert!(!resolution.vars.contains("mtu"));
        assert_eq!(resolution.vars.get("bgp_asn"), Some(&Value::from(65001)));
    }

    #[test]
    fn test_equal_values_same_specificity_not_conflict() {
        let scopes = campus_scopes().with(VariableScope::group(
            "edge_switches",
            SPECIFICITY_GROUP,
            vars("mtu: 9216\n"),
        ));
        let device = Device::new(
            "dub-st1-lf1",
            Tier::Leaf,
            Dialect::Nxos,
            &["data_switches", "edge_switches"],
        );

        let resolved = VariableResolver::new(Arc::new(scopes))
            .resolve(&device)
            .expect("no conflict");
        assert_eq!(resolved.get("mtu"), Some(&Value::from(9216)));
    }

    #[test]
    fn test_nested_mapping_policies() {
        let scopes = ScopeSet::new()
            .with(VariableScope::group(
                "all",
                SPECIFICITY_ALL,
                vars("lines:\n  console:\n    exec_timeout: 15\n  vty:\n    exec_timeout: 30\n"),
            ))
            .with(VariableScope::device(
                "dub-ssp1",
                vars("lines:\n  vty:\n    exec_timeout: 5\n"),
            ));
        let device = Device::new("dub-ssp1", Tier::Superspine, Dialect::Nxos, &[]);
        let scopes = Arc::new(scopes);

        let replaced = VariableResolver::new(Arc::clone(&scopes))
            .resolve(&device)
            .expect("resolves");
        let expected_replace: Value =
            serde_yaml::from_str("vty:\n  exec_timeout: 5\n").expect("valid yaml");
        assert_eq!(replaced.get("lines"), Some(&expected_replace));

        let merged = VariableResolver::new(scopes)
            .with_merge_policy(MergePolicy::DeepMerge)
            .resolve(&device)
            .expect("resolves");
        let expected_merge: Value = serde_yaml::from_str(
            "console:\n  exec_timeout: 15\nvty:\n  exec_timeout: 5\n",
        )
        .expect("valid yaml");
        assert_eq!(merged.get("lines"), Some(&expected_merge));
    }

    #[test]
    fn test_deep_merge_still_replaces_lists() {
        let scopes = ScopeSet::new()
            .with(VariableScope::group(
                "all",
                SPECIFICITY_ALL,
                vars("uplinks:\n  members: [Ethernet1/1, Ethernet1/2]\n  mode: active\n"),
            ))
            .with(VariableScope::device(
                "dub-ssp1",
                vars("uplinks:\n  members: [Ethernet1/9]\n"),
            ));
        let device = Device::new("dub-ssp1", Tier::Superspine, Dialect::Nxos, &[]);

        let merged = VariableResolver::new(Arc::new(scopes))
            .with_merge_policy(MergePolicy::DeepMerge)
            .resolve(&device)
            .expect("resolves");
        let expected: Value =
            serde_yaml::from_str("members: [Ethernet1/9]\nmode: active\n").expect("valid yaml");
        assert_eq!(merged.get("uplinks"), Some(&expected));
    }

    #[test]
    fn test_missing_group_scope_ignored() {
        let device = Device::new("dub-st1-lf1", Tier::Leaf, Dialect::Nxos, &["no_such_group"]);
        let resolved = resolver().resolve(&device).expect("resolves");
        assert_eq!(resolved.get("mtu"), Some(&Value::from(1500)));
    }

    #[test]
    fn test_require_missing_key() {
        let resolved = resolver().resolve(&leaf()).expect("resolves");
        let err = resolved.require("interfaces").expect_err("absent");
        assert_eq!(
            err,
            ResolveError::MissingRequiredVariable {
                device: String::from("dub-st1-lf1"),
                key: String::from("interfaces"),
            }
        );
    }
}
