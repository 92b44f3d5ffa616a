//! Host configuration: which add-in documents to load and from where.
//!
//! ```json
//! {
//!   "addins_folder": "addins",
//!   "addins": [
//!     { "path": "core/core.addin.json" },
//!     { "path": "/opt/shared/tools.addin.json", "absolute": true },
//!     { "path": "legacy/legacy.addin.json", "disabled": true }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::paths;

fn default_addins_folder() -> String {
    "addins".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Folder non-absolute add-in paths are resolved against.
    #[serde(default = "default_addins_folder")]
    pub addins_folder: String,

    #[serde(default)]
    pub addins: Vec<AddInConfig>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            addins_folder: default_addins_folder(),
            addins: Vec::new(),
        }
    }
}

/// One add-in document to load at start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddInConfig {
    pub path: String,

    /// Use `path` as-is instead of resolving it under the add-ins folder.
    #[serde(default)]
    pub absolute: bool,

    #[serde(default)]
    pub disabled: bool,
}

impl AddInConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            absolute: false,
            disabled: false,
        }
    }
}

/// An enabled add-in entry with its locations resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddIn {
    /// Location of the declaration document.
    pub document: String,
    /// Parent of `document`; module locators are relative to it.
    pub base_location: String,
}

impl HostConfig {
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn with_addin(mut self, addin: AddInConfig) -> Self {
        self.addins.push(addin);
        self
    }

    /// Enabled entries in declaration order.
    pub fn resolve(&self) -> Vec<ResolvedAddIn> {
        self.addins
            .iter()
            .filter(|a| !a.disabled)
            .map(|a| {
                let document = if a.absolute {
                    a.path.clone()
                } else {
                    paths::combine([self.addins_folder.as_str(), a.path.as_str()])
                };
                let base_location = paths::parent(&document).to_string();
                ResolvedAddIn {
                    document,
                    base_location,
                }
            })
            .collect()
    }
}
