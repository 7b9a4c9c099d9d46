//! Project configuration file discovery.
//!
//! A project may carry a `nops.json`, `nops.toml` or `nops.yaml` in its root.
//! Top-level keys are defaults for every command; the `command` table holds
//! per-command defaults keyed by command name:
//!
//! ```toml
//! loglevel = "info"
//!
//! [command.exec]
//! report = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};
use tracing::debug;

use crate::argv::deep_merge;
use crate::error::{CommandResult, ValidationError};

/// File names searched for, in order of preference.
pub const CONFIG_FILES: &[&str] = &["nops.json", "nops.toml", "nops.yaml", "nops.yml"];

/// Key holding per-command sections.
pub const COMMAND_KEY: &str = "command";

/// A loaded project configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    pub path: PathBuf,
    pub root: PathBuf,
    values: Map<String, Value>,
}

impl ProjectConfig {
    /// Search `start` and its ancestors for a configuration file.
    pub fn discover(start: &Path) -> CommandResult<Option<Self>> {
        for dir in start.ancestors() {
            for name in CONFIG_FILES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    debug!("Found project config at {:?}", candidate);
                    return Self::load(&candidate).map(Some);
                }
            }
        }
        Ok(None)
    }

    /// Load a configuration file, picking the format from its extension.
    pub fn load(path: &Path) -> CommandResult<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let invalid = |message: String| {
            ValidationError::new("config", format!("Invalid config {}: {}", path.display(), message))
        };

        let value: Value = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| invalid(e.to_string()))?,
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| invalid(e.to_string()))?
            }
            _ => serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?,
        };

        let values = match value {
            Value::Object(map) => map,
            // An empty YAML document parses as null
            Value::Null => Map::new(),
            other => return Err(invalid(format!("expected a table, found {}", other)).into()),
        };

        if let Some(section) = values.get(COMMAND_KEY) {
            if !section.is_object() {
                return Err(invalid(format!("\"{}\" must be a table", COMMAND_KEY)).into());
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            root: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            values,
        })
    }

    /// Defaults for `command`: the shared keys, then its own section on top.
    pub fn defaults_for(&self, command: &str) -> Map<String, Value> {
        let mut shared = self.values.clone();
        let section = shared
            .remove(COMMAND_KEY)
            .and_then(|commands| commands.get(command).cloned());

        let mut merged = Value::Object(shared);
        if let Some(section) = section.filter(Value::is_object) {
            deep_merge(&mut merged, section);
        }

        match merged {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}
