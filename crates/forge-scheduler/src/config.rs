use crate::{ApprovalMode, NonInteractivePolicy, SchedulerError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Runtime configuration for a scheduler session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub approval_mode: ApprovalMode,
    /// Whether a human is available to answer confirmations. When `false`
    /// every confirmation is answered by `non_interactive_policy`.
    pub interactive: bool,
    pub non_interactive_policy: NonInteractivePolicy,
    /// Persist "proceed always" decisions here; in-memory only when unset.
    pub allowlist_path: Option<PathBuf>,
    pub default_output_limit: usize,
    pub tool_output_limits: HashMap<String, usize>,
    pub tool_line_limits: HashMap<String, usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            approval_mode: ApprovalMode::Default,
            interactive: false,
            non_interactive_policy: NonInteractivePolicy::Reject,
            allowlist_path: None,
            default_output_limit: 20_000,
            tool_output_limits: default_tool_output_limits(),
            tool_line_limits: default_tool_line_limits(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, SchedulerError> {
        serde_json::from_str(raw)
            .map_err(|err| SchedulerError::InvalidConfiguration(err.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            SchedulerError::InvalidConfiguration(format!(
                "read settings '{}' failed: {err}",
                path.display()
            ))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn output_limit_for(&self, tool_name: &str) -> usize {
        self.tool_output_limits
            .get(tool_name)
            .copied()
            .unwrap_or(self.default_output_limit)
    }
}

pub fn default_tool_output_limits() -> HashMap<String, usize> {
    HashMap::from([
        ("read_file".to_string(), 50_000),
        ("shell".to_string(), 30_000),
        ("grep".to_string(), 20_000),
        ("edit_file".to_string(), 10_000),
        ("write_file".to_string(), 1_000),
    ])
}

pub fn default_tool_line_limits() -> HashMap<String, usize> {
    HashMap::from([("shell".to_string(), 256), ("grep".to_string(), 200)])
}
