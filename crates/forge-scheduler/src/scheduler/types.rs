use crate::{ConfirmationDecision, ConfirmationRequest, ToolInvocation, ToolKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// One function call emitted by the model. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
    /// Unparsed JSON argument text; takes precedence over `arguments`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_arguments: Option<String>,
}

impl ToolCallRequest {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            raw_arguments: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Validating,
    Scheduled,
    AwaitingConfirmation,
    Executing,
    Success,
    Error,
    Cancelled,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    ToolNotRegistered,
    InvalidParams,
    ConfirmationFailed,
    ExecutionFailed,
    Cancelled,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolErrorInfo {
    pub kind: ToolErrorKind,
    pub message: String,
}

/// Result fed back to the conversation for one call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub call_id: String,
    pub content: Value,
    pub display: Option<String>,
    pub error: Option<ToolErrorInfo>,
    /// Set when cancellation interrupted a running call; `content` holds the
    /// output produced so far.
    pub partial: bool,
}

impl ToolCallResponse {
    pub(crate) fn failure(
        call_id: &str,
        kind: ToolErrorKind,
        message: impl Into<String>,
        partial_output: Option<String>,
    ) -> Self {
        let message = message.into();
        let partial = partial_output.as_ref().is_some_and(|output| !output.is_empty());
        let content = match partial_output.filter(|output| !output.is_empty()) {
            Some(output) => Value::String(format!("{output}\n[{message}]")),
            None => Value::String(message.clone()),
        };
        Self {
            call_id: call_id.to_string(),
            content,
            display: None,
            error: Some(ToolErrorInfo { kind, message }),
            partial,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Lifecycle state of a call. The invocation lives only in the validated,
/// non-terminal states.
pub(crate) enum CallState {
    Validating,
    AwaitingConfirmation {
        invocation: Arc<dyn ToolInvocation>,
        request: ConfirmationRequest,
    },
    Scheduled {
        invocation: Arc<dyn ToolInvocation>,
    },
    Executing {
        invocation: Arc<dyn ToolInvocation>,
        output: String,
    },
    Success(ToolCallResponse),
    Error(ToolCallResponse),
    Cancelled(ToolCallResponse),
}

impl CallState {
    pub(crate) fn status(&self) -> ToolCallStatus {
        match self {
            Self::Validating => ToolCallStatus::Validating,
            Self::AwaitingConfirmation { .. } => ToolCallStatus::AwaitingConfirmation,
            Self::Scheduled { .. } => ToolCallStatus::Scheduled,
            Self::Executing { .. } => ToolCallStatus::Executing,
            Self::Success(_) => ToolCallStatus::Success,
            Self::Error(_) => ToolCallStatus::Error,
            Self::Cancelled(_) => ToolCallStatus::Cancelled,
        }
    }

    fn response(&self) -> Option<&ToolCallResponse> {
        match self {
            Self::Success(response) | Self::Error(response) | Self::Cancelled(response) => {
                Some(response)
            }
            _ => None,
        }
    }
}

/// A request bound to its lifecycle state. Mutated only by the scheduler.
pub(crate) struct ToolCall {
    pub(crate) request: ToolCallRequest,
    pub(crate) state: CallState,
    pub(crate) description: Option<String>,
    pub(crate) kind: Option<ToolKind>,
    pub(crate) outcome: Option<ConfirmationDecision>,
    pub(crate) started_at: Instant,
    pub(crate) duration_ms: Option<u128>,
}

impl ToolCall {
    pub(crate) fn new(request: ToolCallRequest) -> Self {
        Self {
            request,
            state: CallState::Validating,
            description: None,
            kind: None,
            outcome: None,
            started_at: Instant::now(),
            duration_ms: None,
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.status().is_terminal()
    }

    pub(crate) fn snapshot(&self) -> ToolCallSnapshot {
        let (confirmation, live_output) = match &self.state {
            CallState::AwaitingConfirmation { request, .. } => (Some(request.clone()), String::new()),
            CallState::Executing { output, .. } => (None, output.clone()),
            _ => (None, String::new()),
        };
        ToolCallSnapshot {
            request: self.request.clone(),
            status: self.state.status(),
            description: self.description.clone(),
            kind: self.kind,
            confirmation,
            live_output,
            response: self.state.response().cloned(),
            outcome: self.outcome,
            duration_ms: self.duration_ms,
        }
    }

    pub(crate) fn completed(&self) -> Option<CompletedToolCall> {
        let response = self.state.response()?.clone();
        Some(CompletedToolCall {
            request: self.request.clone(),
            status: self.state.status(),
            description: self.description.clone(),
            response,
            outcome: self.outcome,
            duration_ms: self.duration_ms.unwrap_or_default(),
        })
    }
}

/// Point-in-time view of a call for live display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallSnapshot {
    pub request: ToolCallRequest,
    pub status: ToolCallStatus,
    pub description: Option<String>,
    pub kind: Option<ToolKind>,
    pub confirmation: Option<ConfirmationRequest>,
    pub live_output: String,
    pub response: Option<ToolCallResponse>,
    pub outcome: Option<ConfirmationDecision>,
    pub duration_ms: Option<u128>,
}

/// A call in its terminal state, as delivered on batch completion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletedToolCall {
    pub request: ToolCallRequest,
    pub status: ToolCallStatus,
    pub description: Option<String>,
    pub response: ToolCallResponse,
    /// Last confirmation decision, `None` when the call was auto-approved or
    /// never reached confirmation.
    pub outcome: Option<ConfirmationDecision>,
    pub duration_ms: u128,
}
