use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Sentinel stored in the settings file for "no limit".
const UNLIMITED: i64 = -1;

/// A per-category recursion bound for watch expansion.
///
/// `Unlimited` expansion is still finite in practice: cyclic object graphs
/// terminate because every recursion category that can re-enter itself
/// (objects, classes) defaults to a small bound, and the object counter is
/// what a cycle consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecursionLimit {
    Unlimited,
    Max(u32),
}

impl RecursionLimit {
    /// Whether another level of expansion is allowed at `current` depth.
    pub fn allows(self, current: u32) -> bool {
        match self {
            RecursionLimit::Unlimited => true,
            RecursionLimit::Max(max) => current < max,
        }
    }

    fn to_raw(self) -> i64 {
        match self {
            RecursionLimit::Unlimited => UNLIMITED,
            RecursionLimit::Max(max) => i64::from(max),
        }
    }

    fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            RecursionLimit::Unlimited
        } else {
            RecursionLimit::Max(raw as u32)
        }
    }
}

impl Serialize for RecursionLimit {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.to_raw())
    }
}

impl<'de> Deserialize<'de> for RecursionLimit {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(RecursionLimit::from_raw(i64::deserialize(deserializer)?))
    }
}

/// The five persisted expansion limits, one per value category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecursionLimits {
    #[serde(rename = "OBJECTMAX")]
    pub object: RecursionLimit,
    #[serde(rename = "STRUCTMAX")]
    pub struct_members: RecursionLimit,
    #[serde(rename = "CLASSMAX")]
    pub class: RecursionLimit,
    #[serde(rename = "STATICARRAYMAX")]
    pub static_array: RecursionLimit,
    #[serde(rename = "DYNAMICARRAYMAX")]
    pub dynamic_array: RecursionLimit,
}

impl Default for RecursionLimits {
    fn default() -> Self {
        Self {
            object: RecursionLimit::Max(1),
            struct_members: RecursionLimit::Unlimited,
            class: RecursionLimit::Max(1),
            static_array: RecursionLimit::Max(2),
            dynamic_array: RecursionLimit::Max(1),
        }
    }
}

impl RecursionLimits {
    /// Load limits from a JSON key-value file, falling back to the
    /// defaults for a missing file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the limits back to the settings file.
    pub fn store(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

/// Non-persisted engine options.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Escalate call-stack corruption to a panic instead of recovering.
    /// Mirrors the behavior of diagnostic builds; off by default.
    pub hard_fault_on_corruption: bool,
}
