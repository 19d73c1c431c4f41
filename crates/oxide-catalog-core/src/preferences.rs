//! Scripting preferences and execution modes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::provider::{EngineEdition, EngineType, ServerInfo, ServerVersion};

/// Options passed to scripters.
///
/// Unset targets default to the connected server. Preferences can be
/// loaded from JSON:
///
/// ```json
/// { "target_version": { "major": 13, "minor": 0, "build": 0 }, "include_if_not_exists": true }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptingPreferences {
    /// Version the script must run on.
    pub target_version: Option<ServerVersion>,
    /// Engine type the script must run on.
    pub target_engine_type: Option<EngineType>,
    /// Engine edition the script must run on.
    pub target_engine_edition: Option<EngineEdition>,
    /// The statements run immediately on this connection, so saved-script
    /// conveniences such as name substitution are disabled.
    pub direct_execution: bool,
    /// Guard creates with existence checks.
    pub include_if_not_exists: bool,
    /// Prefix scripts with a descriptive comment.
    pub include_header: bool,
    /// Statement separator for saved scripts.
    pub batch_terminator: Option<String>,
}

impl ScriptingPreferences {
    /// Preferences for statements executed by the verbs themselves.
    #[must_use]
    pub fn for_direct_execution(server: &ServerInfo) -> Self {
        Self {
            direct_execution: true,
            ..Self::default()
        }
        .resolved(server)
    }

    /// Fills unset targets from the connected server.
    #[must_use]
    pub fn resolved(mut self, server: &ServerInfo) -> Self {
        self.target_version.get_or_insert(server.version);
        self.target_engine_type.get_or_insert(server.engine_type);
        self.target_engine_edition
            .get_or_insert(server.engine_edition);
        self
    }

    /// Target version, defaulting to `0.0.0` when unresolved.
    #[must_use]
    pub fn version(&self) -> ServerVersion {
        self.target_version.unwrap_or_default()
    }

    /// Target engine type.
    #[must_use]
    pub fn engine_type(&self) -> EngineType {
        self.target_engine_type.unwrap_or_default()
    }

    /// Target engine edition.
    #[must_use]
    pub fn engine_edition(&self) -> EngineEdition {
        self.target_engine_edition.unwrap_or_default()
    }

    /// Parses preferences from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads preferences from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// What the execution manager does with statement batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Send to the server.
    #[default]
    Execute,
    /// Capture only. State transitions are not committed.
    Record,
    /// Send and capture.
    ExecuteAndRecord,
}

impl ExecutionMode {
    /// Returns true if batches reach the server.
    #[must_use]
    pub const fn executes(self) -> bool {
        matches!(self, Self::Execute | Self::ExecuteAndRecord)
    }

    /// Returns true if batches are captured.
    #[must_use]
    pub const fn captures(self) -> bool {
        matches!(self, Self::Record | Self::ExecuteAndRecord)
    }
}
