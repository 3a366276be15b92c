//! Cisco NX-OS syntax.

use crate::inventory::Dialect;

use super::dialect::{DialectLimits, DialectSyntax};
use super::inputs::{ConsoleLineInput, Range, VtyLineInput};

/// NX-OS statement spelling.
#[derive(Debug, Clone, Copy, Default)]
pub struct NxosSyntax;

const LIMITS: DialectLimits = DialectLimits {
    vlan: Range::new(1, 3967),
    port_channel: Range::new(1, 4096),
    mtu: Range::new(576, 9216),
    vni: Range::new(1, 16_777_214),
    line_timeout: Range::new(0, 525_600),
    session_limit: Range::new(1, 64),
};

impl DialectSyntax for NxosSyntax {
    fn dialect(&self) -> Dialect {
        Dialect::Nxos
    }

    fn limits(&self) -> DialectLimits {
        LIMITS
    }

    fn feature(&self, name: &str) -> Option<Vec<String>> {
        let well_formed = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase())
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == ' ');
        well_formed.then(|| {
            if name == "nv overlay" {
                vec![String::from("feature nv overlay")]
            } else {
                vec![format!("feature {name}")]
            }
        })
    }

    fn vlan(&self, id: i64, name: Option<&str>, vni: Option<i64>) -> Vec<String> {
        let mut lines = vec![format!("vlan {id}")];
        if let Some(name) = name {
            lines.push(format!("  name {name}"));
        }
        if let Some(vni) = vni {
            lines.push(format!("  vn-segment {vni}"));
        }
        lines
    }

    fn port_channel_name(&self, id: i64) -> String {
        format!("port-channel{id}")
    }

    fn console(&self, console: &ConsoleLineInput) -> Vec<String> {
        vec![
            String::from("line console"),
            format!("  exec-timeout {}", console.exec_timeout),
        ]
    }

    fn vty(&self, vty: &VtyLineInput) -> Vec<String> {
        let mut lines = vec![
            String::from("line vty"),
            format!("  exec-timeout {}", vty.exec_timeout),
        ];
        if let Some(limit) = vty.session_limit {
            lines.push(format!("  session-limit {limit}"));
        }
        if let Some(acl) = &vty.access_class {
            lines.push(format!("  access-class {acl} in"));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features() {
        assert_eq!(NxosSyntax.feature("lacp"), Some(vec![String::from("feature lacp")]));
        assert_eq!(
            NxosSyntax.feature("nv overlay"),
            Some(vec![String::from("feature nv overlay")])
        );
        assert_eq!(NxosSyntax.feature("Bad_Feature"), None);
        assert_eq!(NxosSyntax.feature(""), None);
    }

    #[test]
    fn test_vlan_with_vni() {
        assert_eq!(
            NxosSyntax.vlan(100, Some("users"), Some(10_100)),
            vec![
                String::from("vlan 100"),
                String::from("  name users"),
                String::from("  vn-segment 10100"),
            ]
        );
    }
}
