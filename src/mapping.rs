//! Declarative operation mappings
//!
//! The engine never decides what to restructure. Each operation receives one of these
//! values, read from a JSON or TOML file, and executes it verbatim.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Members moved to (or extracted from) one class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberAssignment {
    pub properties: Vec<String>,
    pub methods: Vec<String>,
}

impl MemberAssignment {
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.methods.is_empty()
    }
}

/// Split one class into several destination classes
///
/// ```json
/// {"source_class": "Order", "destinations": {"Pricing": {"properties": ["total"], "methods": ["price"]}}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitClassConfig {
    pub source_class: String,
    pub destinations: BTreeMap<String, MemberAssignment>,
}

/// Lift shared members of sibling classes into a new base class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractSuperclassConfig {
    pub base_class: String,
    pub child_classes: Vec<String>,
    pub extract_from: BTreeMap<String, MemberAssignment>,
    #[serde(default)]
    pub abstract_methods: Vec<String>,
}

/// Fold several classes into one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeClassesConfig {
    pub source_classes: Vec<String>,
    #[serde(alias = "base_class")]
    pub target_class: String,
    /// Restrict the merged methods to these names
    #[serde(default)]
    pub methods: Option<Vec<String>>,
    /// Restrict the merged properties to these names
    #[serde(default)]
    pub properties: Option<Vec<String>>,
    /// Keep `Source = Target` bindings for old names
    #[serde(default)]
    pub keep_aliases: bool,
}

/// Explode one file into a package of modules
///
/// Entities are top-level names or `Class.method` for a method lifted into a module
/// as a free function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitFileConfig {
    /// Package directory name, `<stem><package_suffix>` when absent
    #[serde(default)]
    pub package_name: Option<String>,
    pub modules: BTreeMap<String, Vec<String>>,
}

/// Read a mapping file, TOML when the extension says so and JSON otherwise
pub fn load_mapping<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read mapping file {}", path.display()))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    if is_toml {
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML mapping {}", path.display()))
    } else {
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse JSON mapping {}", path.display()))
    }
}
