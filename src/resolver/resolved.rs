//! The flattened per-device variable mapping.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::collections::BTreeMap;

use crate::error::{RenderError, ResolveError};

/// The final, per-device variable mapping after all scopes were applied.
///
/// Immutable once produced. Keys are kept sorted so iteration is
/// deterministic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedVariableSet {
    device: String,
    vars: BTreeMap<String, Value>,
    provenance: BTreeMap<String, String>,
}

impl ResolvedVariableSet {
    pub(crate) const fn new(
        device: String,
        vars: BTreeMap<String, Value>,
        provenance: BTreeMap<String, String>,
    ) -> Self {
        Self {
            device,
            vars,
            provenance,
        }
    }

    /// Device the set was resolved for.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Looks up a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Looks up a key that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::MissingRequiredVariable`] if the key is absent.
    pub fn require(&self, key: &str) -> std::result::Result<&Value, ResolveError> {
        self.vars
            .get(key)
            .ok_or_else(|| ResolveError::MissingRequiredVariable {
                device: self.device.clone(),
                key: key.to_string(),
            })
    }

    /// Decodes an optional key into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Malformed`] if the value has the wrong shape.
    pub fn decode<T: DeserializeOwned>(&self, key: &str) -> std::result::Result<Option<T>, RenderError> {
        self.vars
            .get(key)
            .map(|value| decode_value(key, value))
            .transpose()
    }

    /// Decodes a required key into a typed value.
    ///
    /// # Errors
    ///
    /// Returns a missing-variable error if absent, or
    /// [`RenderError::Malformed`] if the value has the wrong shape.
    pub fn require_decoded<T: DeserializeOwned>(&self, key: &str) -> std::result::Result<T, RenderError> {
        let value = self.require(key)?;
        decode_value(key, value)
    }

    /// Name of the scope that supplied a key.
    #[must_use]
    pub fn source_of(&self, key: &str) -> Option<&str> {
        self.provenance.get(key).map(String::as_str)
    }

    /// Iterates over keys and values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    /// Number of resolved keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true if nothing was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn decode_value<T: DeserializeOwned>(key: &str, value: &Value) -> std::result::Result<T, RenderError> {
    serde_yaml::from_value(value.clone()).map_err(|e| RenderError::malformed(key, e.to_string()))
}
