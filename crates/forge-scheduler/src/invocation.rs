use crate::{ConfirmationDetails, ToolError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Broad classification of what a tool does, used by the approval policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Read,
    Edit,
    Delete,
    Move,
    Search,
    Execute,
    Fetch,
    Think,
    Other,
}

impl ToolKind {
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Read | Self::Search | Self::Think)
    }
}

/// Structured result of a successful execution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Value,
    pub display: Option<String>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Value::String(content.into()),
            display: None,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }
}

pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives live output fragments while an invocation runs. Fragments are
/// progress only and never change the call's state.
#[derive(Clone, Default)]
pub struct OutputSink {
    callback: Option<OutputCallback>,
}

impl OutputSink {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    pub fn discard() -> Self {
        Self::default()
    }

    pub fn push(&self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if let Some(callback) = &self.callback {
            callback(fragment);
        }
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink")
            .field("attached", &self.callback.is_some())
            .finish()
    }
}

/// A validated, ready-to-run tool call.
///
/// This is the entire surface the scheduler depends on: a side-effect-free
/// description, an optional confirmation probe, and execution. Concrete tools
/// are produced by [`crate::Tool::build`].
#[async_trait]
pub trait ToolInvocation: Send + Sync {
    fn tool_name(&self) -> &str;

    fn kind(&self) -> ToolKind;

    fn arguments(&self) -> &Value;

    fn description(&self) -> String;

    /// Key under which a "proceed always" decision is remembered.
    fn signature(&self) -> String {
        canonical_signature(self.arguments())
    }

    /// Returns the confirmation prompt for this call, or `None` when the
    /// call can run without one.
    async fn should_confirm(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Option<ConfirmationDetails>, ToolError> {
        Ok(None)
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        output: OutputSink,
    ) -> Result<ToolOutput, ToolError>;

    /// Builds replacement arguments from user-edited content. Only tools that
    /// support the "modify" decision return `Some`.
    fn apply_modified_content(&self, _edited: &str) -> Option<Value> {
        None
    }
}

/// Serializes arguments with object keys sorted at every level.
pub fn canonical_signature(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&object[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
