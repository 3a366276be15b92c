//! Content hashing for change detection.
//!
//! This module provides deterministic hashing of rendered configuration
//! blocks so unchanged devices can be recognised without a device session.

use sha2::{Digest, Sha256};

use crate::inventory::Dialect;
use crate::render::ConfigBlock;

/// Hasher for computing rendered configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the content hash of a set of blocks.
    ///
    /// Blocks are hashed in (section, key) order, so emitting the same
    /// blocks in a different order yields the same hash.
    #[must_use]
    pub fn hash_blocks(&self, dialect: Dialect, blocks: &[ConfigBlock]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(dialect.as_str().as_bytes());
        hasher.update([0u8]);

        let mut sorted: Vec<&ConfigBlock> = blocks.iter().collect();
        sorted.sort_by(|a, b| (a.section, &a.key).cmp(&(b.section, &b.key)));

        for block in sorted {
            hasher.update(self.hash_block(block).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes the hash of a single block.
    #[must_use]
    pub fn hash_block(&self, block: &ConfigBlock) -> String {
        let mut hasher = Sha256::new();
        hasher.update(block.section.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(block.key.as_bytes());
        hasher.update([0u8]);
        for line in &block.lines {
            hasher.update(line.as_bytes());
            hasher.update([b'\n']);
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
