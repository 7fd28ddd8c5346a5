use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings for both directions of a session, typically read once from the
/// host application's config file.
///
/// ```toml
/// [save]
/// pretty = true
///
/// [load]
/// allow_legacy = false
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScribeConfig {
    pub save: SaveOptions,
    pub load: LoadOptions,
}

impl ScribeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveOptions {
    /// Indent the JSON output.
    pub pretty: bool,
    /// Write values even when they equal their declared default.
    pub write_defaults: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Fall back to the legacy binary decoder when the input is not JSON.
    pub allow_legacy: bool,
    /// Maximum node nesting accepted from legacy input.
    pub max_depth: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            allow_legacy: true,
            max_depth: 64,
        }
    }
}
