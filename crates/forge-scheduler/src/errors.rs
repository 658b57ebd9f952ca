use thiserror::Error;

/// Batch-level failures of the scheduler.
///
/// Failures of an individual tool call never surface here; they are captured
/// in that call's terminal state and delivered through normal completion.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("duplicate call id in batch: {0}")]
    DuplicateCallId(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
    #[error("scheduler driver stopped before the batch completed")]
    DriverStopped,
    #[error(transparent)]
    Allowlist(#[from] AllowlistError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Raised while resolving a request into an invocation. Never retried.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("tool '{name}' is not registered{hint}")]
    UnknownTool { name: String, hint: String },
    #[error("invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },
}

/// Failures reported by a tool implementation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool validation failed: {0}")]
    Validation(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error("tool execution cancelled")]
    Cancelled,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("confirmation wait cancelled")]
    Cancelled,
    #[error("no confirmation consumer is attached to the bus")]
    NoConsumer,
    #[error("a confirmation for call '{0}' is already pending")]
    DuplicateRequest(String),
    #[error("no pending confirmation for call '{0}'")]
    NotPending(String),
    #[error("confirmation for call '{0}' was dropped without a decision")]
    Abandoned(String),
    #[error("no tokio runtime available to drive the confirmation consumer")]
    NoRuntime,
}

#[derive(Debug, Error)]
pub enum AllowlistError {
    #[error("allowlist storage error: {0}")]
    Backend(String),
    #[error("allowlist serialization error: {0}")]
    Serialization(String),
}
