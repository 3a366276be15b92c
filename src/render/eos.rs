//! Arista EOS syntax.

use crate::inventory::Dialect;

use super::dialect::{DialectLimits, DialectSyntax};
use super::inputs::{ConsoleLineInput, Range, VtyLineInput};

/// EOS statement spelling.
#[derive(Debug, Clone, Copy, Default)]
pub struct EosSyntax;

const LIMITS: DialectLimits = DialectLimits {
    vlan: Range::new(1, 4094),
    port_channel: Range::new(1, 2000),
    mtu: Range::new(68, 9214),
    vni: Range::new(1, 16_777_214),
    line_timeout: Range::new(0, 86_400),
    session_limit: Range::new(1, 100),
};

/// EOS has no feature toggles; these are the statements standing in for
/// the portable feature names.
const FEATURES: &[(&str, &str)] = &[
    ("ip-routing", "ip routing"),
    ("lacp", "lacp system-priority 32768"),
    ("lldp", "lldp run"),
    ("multi-agent", "service routing protocols model multi-agent"),
    ("vxlan", "interface Vxlan1"),
];

impl DialectSyntax for EosSyntax {
    fn dialect(&self) -> Dialect {
        Dialect::Eos
    }

    fn limits(&self) -> DialectLimits {
        LIMITS
    }

    fn feature(&self, name: &str) -> Option<Vec<String>> {
        FEATURES
            .iter()
            .find(|(feature, _)| *feature == name)
            .map(|(_, statement)| vec![(*statement).to_string()])
    }

    fn vlan(&self, id: i64, name: Option<&str>, vni: Option<i64>) -> Vec<String> {
        let mut lines = vec![format!("vlan {id}")];
        if let Some(name) = name {
            lines.push(format!("  name {name}"));
        }
        if let Some(vni) = vni {
            lines.push(String::from("interface Vxlan1"));
            lines.push(format!("  vxlan vlan {id} vni {vni}"));
        }
        lines
    }

    fn port_channel_name(&self, id: i64) -> String {
        format!("Port-Channel{id}")
    }

    fn console(&self, console: &ConsoleLineInput) -> Vec<String> {
        vec![
            String::from("management console"),
            format!("  idle-timeout {}", console.exec_timeout),
        ]
    }

    fn vty(&self, vty: &VtyLineInput) -> Vec<String> {
        let mut lines = vec![
            String::from("management ssh"),
            format!("  idle-timeout {}", vty.exec_timeout),
        ];
        if let Some(limit) = vty.session_limit {
            lines.push(format!("  connection limit {limit}"));
        }
        if let Some(acl) = &vty.access_class {
            lines.push(format!("  ip access-group {acl} in"));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_table() {
        assert_eq!(EosSyntax.feature("ip-routing"), Some(vec![String::from("ip routing")]));
        assert_eq!(EosSyntax.feature("ospf"), None);
    }

    #[test]
    fn test_vlan_vni_mapping() {
        assert_eq!(
            EosSyntax.vlan(300, None, Some(10_300)),
            vec![
                String::from("vlan 300"),
                String::from("interface Vxlan1"),
                String::from("  vxlan vlan 300 vni 10300"),
            ]
        );
    }

    #[test]
    fn test_vty_spelling() {
        let vty = VtyLineInput {
            exec_timeout: 30,
            session_limit: Some(5),
            access_class: Some(String::from("MGMT")),
        };
        assert_eq!(
            EosSyntax.vty(&vty),
            vec![
                String::from("management ssh"),
                String::from("  idle-timeout 30"),
                String::from("  connection limit 5"),
                String::from("  ip access-group MGMT in"),
            ]
        );
    }
}
