//! Command input and the effective option set.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parsed command-line arguments handed to a command.
///
/// The known fields are typed; every other option lives in `values`.
/// `cwd` and `$0` are internal and never reach [`Options`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Argv {
    /// Name of the parent command when invoked from another command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composed: Option<String>,

    /// Program version, announced once by the outermost command
    #[serde(
        default,
        rename = "cliVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub cli_version: Option<String>,

    /// Working directory the command operates in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Name the program was invoked as
    #[serde(default, rename = "$0", skip_serializing_if = "Option::is_none")]
    pub bin: Option<String>,

    /// All remaining options
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

impl Argv {
    /// Empty input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from any serializable value that renders as a JSON object.
    pub fn from_serializable<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::to_value(value)?)
    }

    /// Set a named argument.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Mark the input as coming from the `parent` command.
    pub fn composed(mut self, parent: impl Into<String>) -> Self {
        self.composed = Some(parent.into());
        self
    }

    /// Version announced by outermost invocations.
    pub fn cli_version(mut self, version: impl Into<String>) -> Self {
        self.cli_version = Some(version.into());
        self
    }

    /// Directory project configuration is searched from.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Name of the program being run.
    pub fn bin(mut self, bin: impl Into<String>) -> Self {
        self.bin = Some(bin.into());
        self
    }

    /// A named argument.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// The arguments as they take part in option resolution.
    pub fn public_view(&self) -> Map<String, Value> {
        let mut view = Map::new();
        if let Some(composed) = &self.composed {
            view.insert("composed".to_string(), Value::String(composed.clone()));
        }
        if let Some(version) = &self.cli_version {
            view.insert("cliVersion".to_string(), Value::String(version.clone()));
        }
        for (key, value) in &self.values {
            view.insert(key.clone(), value.clone());
        }
        view
    }
}

/// Recursively merge `overlay` into `base`.
///
/// Objects merge key by key; any other overlay value replaces the base value.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => merge_maps(base, overlay),
        (base, overlay) => *base = overlay,
    }
}

fn merge_maps(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match base.get_mut(&key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}

/// Effective option values of a command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(Map<String, Value>);

impl Options {
    /// No options set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimal environment defaults: quiet, no progress indicator.
    pub fn baseline() -> Self {
        let mut map = Map::new();
        map.insert("loglevel".to_string(), Value::String("error".to_string()));
        map.insert("progress".to_string(), Value::Bool(false));
        Self(map)
    }

    /// A copy of `self` with `overlay` deep-merged on top.
    pub fn overlay(&self, overlay: Map<String, Value>) -> Self {
        let mut merged = self.0.clone();
        merge_maps(&mut merged, overlay);
        Self(merged)
    }

    /// An option value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A string option.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// A boolean option.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Set an option, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Configured log level, ignoring empty or non-string values.
    pub fn loglevel(&self) -> Option<&str> {
        self.get_str("loglevel").filter(|level| !level.is_empty())
    }

    /// Whether a progress indicator was asked for.
    pub fn progress(&self) -> bool {
        self.get_bool("progress").unwrap_or(false)
    }

    /// The options as a JSON map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying JSON map.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Whether no option is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Options {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
