use serde::{Deserialize, Serialize};
use serde_json::Value;
use similar::TextDiff;

/// What the decision-maker is shown before a call is allowed to run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfirmationDetails {
    Edit {
        title: String,
        file_path: String,
        diff: String,
        original: String,
        proposed: String,
    },
    Exec {
        title: String,
        command: String,
        root_command: String,
    },
    Info {
        title: String,
        prompt: String,
    },
}

impl ConfirmationDetails {
    /// Builds edit details with a unified diff of `original` -> `proposed`.
    pub fn edit(
        title: impl Into<String>,
        file_path: impl Into<String>,
        original: impl Into<String>,
        proposed: impl Into<String>,
    ) -> Self {
        let file_path = file_path.into();
        let original = original.into();
        let proposed = proposed.into();
        let diff = unified_diff(&file_path, &original, &proposed);
        Self::Edit {
            title: title.into(),
            file_path,
            diff,
            original,
            proposed,
        }
    }

    pub fn exec(title: impl Into<String>, command: impl Into<String>) -> Self {
        let command = command.into();
        let root_command = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        Self::Exec {
            title: title.into(),
            command,
            root_command,
        }
    }

    pub fn info(title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::Info {
            title: title.into(),
            prompt: prompt.into(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Edit { title, .. } | Self::Exec { title, .. } | Self::Info { title, .. } => title,
        }
    }
}

pub fn unified_diff(file_path: &str, original: &str, proposed: &str) -> String {
    let diff = TextDiff::from_lines(original, proposed);
    diff.unified_diff()
        .context_radius(3)
        .header(&format!("a/{file_path}"), &format!("b/{file_path}"))
        .to_string()
}

/// Published on the confirmation bus for one call awaiting a decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub description: String,
    pub details: ConfirmationDetails,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationDecision {
    ProceedOnce,
    ProceedAlways,
    Modify,
    Cancel,
}

impl ConfirmationDecision {
    pub fn approves(self) -> bool {
        matches!(self, Self::ProceedOnce | Self::ProceedAlways)
    }
}
