//! The canonical rendered configuration document.

use serde::{Deserialize, Serialize};

use crate::config::ConfigHasher;
use crate::inventory::Dialect;

/// Logical section of a device configuration, in emission order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Section {
    /// Feature enablement.
    Features,
    /// VLAN declarations and VNI mappings.
    Vlans,
    /// Port-channels and their member interfaces.
    PortChannels,
    /// Physical and logical interfaces.
    Interfaces,
    /// Console and VTY lines.
    Lines,
}

impl Section {
    /// Every section, in emission order.
    pub const ALL: [Self; 5] = [
        Self::Features,
        Self::Vlans,
        Self::PortChannels,
        Self::Interfaces,
        Self::Lines,
    ];

    /// Returns the section name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Features => "features",
            Self::Vlans => "vlans",
            Self::PortChannels => "port-channels",
            Self::Interfaces => "interfaces",
            Self::Lines => "lines",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One named block of configuration lines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigBlock {
    /// Owning section.
    pub section: Section,
    /// Key unique within the section, e.g. `port-channel10`.
    pub key: String,
    /// Lines exactly as sent to the device.
    pub lines: Vec<String>,
}

impl ConfigBlock {
    /// Creates a block.
    #[must_use]
    pub fn new(section: Section, key: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            section,
            key: key.into(),
            lines,
        }
    }

    /// Stable identity of the block across renders.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}/{}", self.section, self.key)
    }

    /// Lines grouped under their top-level statement. Indented lines
    /// before any header are dropped.
    #[must_use]
    pub fn stanzas(&self) -> Vec<Stanza<'_>> {
        stanzas(&self.lines)
    }
}

/// A top-level statement and the indented lines under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stanza<'a> {
    /// The unindented context line.
    pub header: &'a str,
    /// Indented lines, as written.
    pub children: Vec<&'a str>,
}

/// Groups raw lines into stanzas.
#[must_use]
pub fn stanzas(lines: &[String]) -> Vec<Stanza<'_>> {
    let mut out: Vec<Stanza<'_>> = Vec::new();
    for line in lines {
        if line.starts_with(' ') {
            if let Some(current) = out.last_mut() {
                current.children.push(line);
            }
        } else {
            out.push(Stanza {
                header: line,
                children: Vec::new(),
            });
        }
    }
    out
}

/// Ordered, hashable configuration for one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderedConfig {
    device: String,
    dialect: Dialect,
    blocks: Vec<ConfigBlock>,
    content_hash: String,
}

impl RenderedConfig {
    /// Builds a document and computes its content hash.
    #[must_use]
    pub fn new(device: impl Into<String>, dialect: Dialect, blocks: Vec<ConfigBlock>) -> Self {
        let content_hash = ConfigHasher::new().hash_blocks(dialect, &blocks);
        Self {
            device: device.into(),
            dialect,
            blocks,
            content_hash,
        }
    }

    /// Device name.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Dialect the document was rendered for.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Blocks in emission order.
    #[must_use]
    pub fn blocks(&self) -> &[ConfigBlock] {
        &self.blocks
    }

    /// SHA-256 hex digest of the content.
    #[must_use]
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Finds a block by section and key.
    #[must_use]
    pub fn block(&self, section: Section, key: &str) -> Option<&ConfigBlock> {
        self.blocks
            .iter()
            .find(|b| b.section == section && b.key == key)
    }

    /// Blocks of one section.
    pub fn blocks_in(&self, section: Section) -> impl Iterator<Item = &ConfigBlock> {
        self.blocks.iter().filter(move |b| b.section == section)
    }

    /// Returns true if the stored hash matches the content.
    #[must_use]
    pub fn hash_is_valid(&self) -> bool {
        let computed = ConfigHasher::new().hash_blocks(self.dialect, &self.blocks);
        ConfigHasher::hashes_match(&computed, &self.content_hash)
    }

    /// Total number of configuration lines.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.blocks.iter().map(|b| b.lines.len()).sum()
    }

    /// Plain-text export, one `!` separator between sections.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = format!("! {} ({})\n", self.device, self.dialect);
        let mut current: Option<Section> = None;
        for block in &self.blocks {
            if current != Some(block.section) {
                out.push_str("!\n");
                current = Some(block.section);
            }
            for line in &block.lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str("end\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RenderedConfig {
        RenderedConfig::new(
            "dub-ssp1",
            Dialect::Nxos,
            vec![
                ConfigBlock::new(Section::Features, "feature-ospf", vec![String::from("feature ospf")]),
                ConfigBlock::new(
                    Section::Lines,
                    "console",
                    vec![String::from("line console"), String::from("  exec-timeout 15")],
                ),
            ],
        )
    }

    #[test]
    fn test_hash_valid_after_serde() {
        let config = sample();
        let json = serde_json::to_string(&config).expect("serializes");
        let loaded: RenderedConfig = serde_json::from_str(&json).expect("deserializes");

        assert_eq!(loaded.content_hash(), config.content_hash());
        assert!(loaded.hash_is_valid());
    }

    #[test]
    fn test_tampered_hash_detected() {
        let json = serde_json::to_string(&sample())
            .expect("serializes")
            .replace("exec-timeout 15", "exec-timeout 0");
        let loaded: RenderedConfig = serde_json::from_str(&json).expect("deserializes");
        assert!(!loaded.hash_is_valid());
    }

    #[test]
    fn test_text_export() {
        let text = sample().to_text();
        assert!(text.starts_with("! dub-ssp1 (nxos)\n!\nfeature ospf\n!\nline console\n"));
        assert!(text.ends_with("end\n"));
        assert_eq!(sample().line_count(), 3);
    }

    #[test]
    fn test_stanzas_group_members() {
        let block = ConfigBlock::new(
            Section::PortChannels,
            "port-channel10",
            vec![
                String::from("interface port-channel10"),
                String::from("  mtu 9216"),
                String::from("interface Ethernet1/1"),
                String::from("  channel-group 10 mode active"),
            ],
        );
        let stanzas = block.stanzas();
        assert_eq!(stanzas.len(), 2);
        assert_eq!(stanzas[0].header, "interface port-channel10");
        assert_eq!(stanzas[0].children, vec!["  mtu 9216"]);
        assert_eq!(stanzas[1].header, "interface Ethernet1/1");
    }
}
