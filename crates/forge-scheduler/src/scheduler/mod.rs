use crate::{
    Allowlist, AllowlistEntry, BusError, ConfirmationBus, ConfirmationDecision,
    ConfirmationDetails, ConfirmationRequest, DiffEditor, EditorOutcome, FsAllowlistStore,
    NonInteractiveResponder, NoopObserver, OutputSink, PolicyVerdict, SchedulerConfig,
    SchedulerError, SchedulerObserver, ToolError, ToolInvocation, ToolOutput, ToolResolver,
    ValidationError, evaluate_policy, truncate_tool_output,
};
use futures::FutureExt;
use futures::future::join_all;
use serde_json::Value;
use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod types;
pub use types::{
    CompletedToolCall, ToolCallRequest, ToolCallResponse, ToolCallSnapshot, ToolCallStatus,
    ToolErrorInfo, ToolErrorKind,
};
use types::{CallState, ToolCall};

const CANCELLED_MESSAGE: &str = "tool call cancelled";

/// Drives batches of tool calls through validate -> confirm -> execute.
///
/// Batches run one at a time in submission order; the calls inside a batch
/// progress concurrently. Cloning is cheap and shares the same queue,
/// allowlist and confirmation bus.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

pub struct SchedulerBuilder {
    resolver: Arc<dyn ToolResolver>,
    config: SchedulerConfig,
    allowlist: Option<Arc<Allowlist>>,
    bus: Option<ConfirmationBus>,
    editor: Option<Arc<dyn DiffEditor>>,
    observer: Arc<dyn SchedulerObserver>,
}

struct SchedulerInner {
    resolver: Arc<dyn ToolResolver>,
    config: SchedulerConfig,
    allowlist: Arc<Allowlist>,
    bus: ConfirmationBus,
    editor: Option<Arc<dyn DiffEditor>>,
    observer: Arc<dyn SchedulerObserver>,
    runtime: Handle,
    queue: Mutex<BatchQueue>,
}

#[derive(Default)]
struct BatchQueue {
    running: bool,
    pending: VecDeque<QueuedBatch>,
}

struct QueuedBatch {
    requests: Vec<ToolCallRequest>,
    cancel: CancellationToken,
    done: Option<oneshot::Sender<Vec<CompletedToolCall>>>,
}

struct Batch {
    calls: Mutex<Vec<ToolCall>>,
}

enum Validated {
    Ready(Arc<dyn ToolInvocation>),
    Invalid(ValidationError),
    Cancelled,
}

enum Approval {
    Approved,
    Modified(Value),
    Finished,
}

enum Modification {
    Arguments(Value),
    KeepWaiting,
    Unsupported(String),
    Cancelled,
    Failed(String),
}

impl SchedulerBuilder {
    pub fn new(resolver: Arc<dyn ToolResolver>) -> Self {
        Self {
            resolver,
            config: SchedulerConfig::default(),
            allowlist: None,
            bus: None,
            editor: None,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares an existing allowlist instead of building one from config.
    pub fn allowlist(mut self, allowlist: Arc<Allowlist>) -> Self {
        self.allowlist = Some(allowlist);
        self
    }

    /// Producer side of the bus an interactive consumer listens on.
    pub fn confirmation_bus(mut self, bus: ConfirmationBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn editor(mut self, editor: Arc<dyn DiffEditor>) -> Self {
        self.editor = Some(editor);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SchedulerObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Must be called inside a tokio runtime. Interactive schedulers need a
    /// bus; non-interactive ones answer confirmations with their own
    /// policy responder.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        let runtime =
            Handle::try_current().map_err(|err| SchedulerError::NoRuntime(err.to_string()))?;

        let allowlist = match (self.allowlist, &self.config.allowlist_path) {
            (Some(allowlist), _) => allowlist,
            (None, Some(path)) => Arc::new(Allowlist::with_store(Arc::new(
                FsAllowlistStore::new(path),
            ))?),
            (None, None) => Arc::new(Allowlist::new()),
        };

        let bus = if self.config.interactive {
            self.bus.ok_or_else(|| {
                SchedulerError::InvalidConfiguration(
                    "interactive confirmation requires a confirmation bus".to_string(),
                )
            })?
        } else {
            if self.bus.is_some() {
                warn!("ignoring confirmation bus for non-interactive scheduler");
            }
            ConfirmationBus::with_handler(Arc::new(NonInteractiveResponder::new(
                self.config.non_interactive_policy,
            )))?
        };

        Ok(Scheduler {
            inner: Arc::new(SchedulerInner {
                resolver: self.resolver,
                config: self.config,
                allowlist,
                bus,
                editor: self.editor,
                observer: self.observer,
                runtime,
                queue: Mutex::new(BatchQueue::default()),
            }),
        })
    }
}

impl Scheduler {
    pub fn builder(resolver: Arc<dyn ToolResolver>) -> SchedulerBuilder {
        SchedulerBuilder::new(resolver)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn allowlist(&self) -> &Arc<Allowlist> {
        &self.inner.allowlist
    }

    pub fn pending_confirmations(&self) -> Vec<String> {
        self.inner.bus.pending()
    }

    /// True when no batch is running or queued.
    pub fn is_idle(&self) -> bool {
        let queue = self.inner.lock_queue();
        !queue.running && queue.pending.is_empty()
    }

    /// Submits a batch. Completion is reported only through
    /// [`SchedulerObserver::on_batch_complete`].
    pub fn schedule(
        &self,
        requests: Vec<ToolCallRequest>,
        cancel: CancellationToken,
    ) -> Result<(), SchedulerError> {
        self.enqueue(requests, cancel, None)
    }

    /// Submits a batch and waits for its terminal calls in request order.
    /// Observer callbacks fire exactly as for [`Scheduler::schedule`].
    pub async fn run(
        &self,
        requests: Vec<ToolCallRequest>,
        cancel: CancellationToken,
    ) -> Result<Vec<CompletedToolCall>, SchedulerError> {
        let (done, completed) = oneshot::channel();
        self.enqueue(requests, cancel, Some(done))?;
        completed.await.map_err(|_| SchedulerError::DriverStopped)
    }

    /// Cancels every non-terminal call of the batch that owns `cancel`.
    pub fn cancel_all(&self, cancel: &CancellationToken) {
        if !cancel.is_cancelled() {
            info!("cancelling tool call batch");
        }
        cancel.cancel();
    }

    fn enqueue(
        &self,
        requests: Vec<ToolCallRequest>,
        cancel: CancellationToken,
        done: Option<oneshot::Sender<Vec<CompletedToolCall>>>,
    ) -> Result<(), SchedulerError> {
        ensure_unique_call_ids(&requests)?;
        let start_driver = {
            let mut queue = self.inner.lock_queue();
            queue.pending.push_back(QueuedBatch {
                requests,
                cancel,
                done,
            });
            if queue.running {
                debug!(queued = queue.pending.len(), "batch queued behind active batch");
                false
            } else {
                queue.running = true;
                true
            }
        };
        if start_driver {
            let inner = self.inner.clone();
            self.inner.runtime.spawn(inner.drain_queue());
        }
        Ok(())
    }
}

impl SchedulerInner {
    fn lock_queue(&self) -> MutexGuard<'_, BatchQueue> {
        self.queue.lock().expect("scheduler queue mutex poisoned")
    }

    async fn drain_queue(self: Arc<Self>) {
        let mut guard = DriverGuard {
            inner: self.clone(),
            armed: true,
        };
        loop {
            let next = {
                let mut queue = self.lock_queue();
                match queue.pending.pop_front() {
                    Some(batch) => batch,
                    None => {
                        queue.running = false;
                        guard.armed = false;
                        return;
                    }
                }
            };
            let completed = self.run_batch(next.requests, next.cancel).await;
            if let Some(done) = next.done {
                let _ = done.send(completed);
            }
        }
    }

    async fn run_batch(
        &self,
        requests: Vec<ToolCallRequest>,
        cancel: CancellationToken,
    ) -> Vec<CompletedToolCall> {
        let batch = Arc::new(Batch::new(requests));
        let size = batch.len();
        info!(batch_size = size, "starting tool call batch");
        self.observer.on_snapshot(&batch.snapshots());

        join_all((0..size).map(|index| self.drive_call(&batch, index, &cancel))).await;

        let completed = batch.completed();
        debug_assert_eq!(completed.len(), size, "every call must be terminal");
        info!(batch_size = size, "tool call batch complete");
        self.observer.on_batch_complete(&completed);
        completed
    }

    async fn drive_call(&self, batch: &Arc<Batch>, index: usize, cancel: &CancellationToken) {
        let mut request = batch.request(index);
        loop {
            if cancel.is_cancelled() {
                self.cancel_call(batch, index, CANCELLED_MESSAGE);
                return;
            }

            let invocation = match self.validate(&request, cancel).await {
                Validated::Ready(invocation) => invocation,
                Validated::Cancelled => {
                    self.cancel_call(batch, index, CANCELLED_MESSAGE);
                    return;
                }
                Validated::Invalid(error) => {
                    let kind = match &error {
                        ValidationError::UnknownTool { .. } => ToolErrorKind::ToolNotRegistered,
                        ValidationError::InvalidArguments { .. } => ToolErrorKind::InvalidParams,
                    };
                    self.fail(batch, index, kind, error.to_string());
                    return;
                }
            };
            batch.describe(index, invocation.as_ref());

            match self.confirm(batch, index, &invocation, cancel).await {
                Approval::Approved => {
                    self.execute(batch, index, invocation, cancel).await;
                    return;
                }
                Approval::Modified(arguments) => {
                    request.arguments = arguments;
                    request.raw_arguments = None;
                    let updated = request.clone();
                    self.transition(batch, index, move |call| {
                        call.request = updated;
                        call.state = CallState::Validating;
                    });
                }
                Approval::Finished => return,
            }
        }
    }

    async fn validate(&self, request: &ToolCallRequest, cancel: &CancellationToken) -> Validated {
        let arguments = match parse_arguments(request) {
            Ok(arguments) => arguments,
            Err(error) => return Validated::Invalid(error),
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Validated::Cancelled,
            resolved = AssertUnwindSafe(self.resolver.resolve(&request.tool_name, arguments))
                .catch_unwind() => match resolved {
                Ok(Ok(invocation)) => Validated::Ready(invocation),
                Ok(Err(error)) => Validated::Invalid(error),
                Err(payload) => Validated::Invalid(ValidationError::InvalidArguments {
                    tool: request.tool_name.clone(),
                    message: format!("tool construction panicked: {}", panic_message(payload)),
                }),
            },
        }
    }

    async fn confirm(
        &self,
        batch: &Arc<Batch>,
        index: usize,
        invocation: &Arc<dyn ToolInvocation>,
        cancel: &CancellationToken,
    ) -> Approval {
        let call_id = batch.call_id(index);
        if let PolicyVerdict::AutoApprove(reason) = evaluate_policy(
            self.config.approval_mode,
            invocation.as_ref(),
            &self.allowlist,
        ) {
            debug!(call_id = %call_id, ?reason, "tool call auto-approved");
            self.mark_scheduled(batch, index, invocation);
            return Approval::Approved;
        }

        let probed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
            probed = AssertUnwindSafe(invocation.should_confirm(cancel)).catch_unwind() => {
                probed.unwrap_or_else(|payload| {
                    Err(ToolError::Execution(format!(
                        "confirmation check panicked: {}",
                        panic_message(payload)
                    )))
                })
            }
        };
        let details = match probed {
            Ok(Some(details)) => details,
            Ok(None) => {
                self.mark_scheduled(batch, index, invocation);
                return Approval::Approved;
            }
            Err(ToolError::Cancelled) => {
                self.cancel_call(batch, index, CANCELLED_MESSAGE);
                return Approval::Finished;
            }
            Err(error) => {
                self.fail(batch, index, ToolErrorKind::ConfirmationFailed, error.to_string());
                return Approval::Finished;
            }
        };

        let request = ConfirmationRequest {
            call_id: call_id.clone(),
            tool_name: invocation.tool_name().to_string(),
            arguments: invocation.arguments().clone(),
            description: invocation.description(),
            details,
        };
        loop {
            let awaiting = request.clone();
            let pending_invocation = invocation.clone();
            self.transition(batch, index, move |call| {
                call.state = CallState::AwaitingConfirmation {
                    invocation: pending_invocation,
                    request: awaiting,
                };
            });

            let decision = match self.bus.request(request.clone(), cancel).await {
                Ok(decision) => decision,
                Err(BusError::Cancelled) => {
                    self.cancel_call(batch, index, CANCELLED_MESSAGE);
                    return Approval::Finished;
                }
                Err(error) => {
                    self.fail(batch, index, ToolErrorKind::ConfirmationFailed, error.to_string());
                    return Approval::Finished;
                }
            };
            debug!(call_id = %call_id, ?decision, "confirmation decided");
            batch.record_outcome(index, decision);

            match decision {
                ConfirmationDecision::ProceedOnce => {
                    self.mark_scheduled(batch, index, invocation);
                    return Approval::Approved;
                }
                ConfirmationDecision::ProceedAlways => {
                    self.remember(AllowlistEntry::for_invocation(invocation.as_ref()))
                        .await;
                    self.mark_scheduled(batch, index, invocation);
                    return Approval::Approved;
                }
                ConfirmationDecision::Cancel => {
                    self.reject_call(
                        batch,
                        index,
                        format!("tool call '{}' was rejected by the user", request.tool_name),
                    );
                    return Approval::Finished;
                }
                ConfirmationDecision::Modify => {
                    match self.modify(invocation, &request.details, cancel).await {
                        Modification::Arguments(arguments) => {
                            return Approval::Modified(arguments);
                        }
                        Modification::KeepWaiting => continue,
                        Modification::Unsupported(message) => {
                            self.reject_call(batch, index, message);
                            return Approval::Finished;
                        }
                        Modification::Cancelled => {
                            self.cancel_call(batch, index, CANCELLED_MESSAGE);
                            return Approval::Finished;
                        }
                        Modification::Failed(message) => {
                            self.fail(batch, index, ToolErrorKind::ConfirmationFailed, message);
                            return Approval::Finished;
                        }
                    }
                }
            }
        }
    }

    async fn remember(&self, entry: AllowlistEntry) {
        if !self.allowlist.is_persistent() {
            self.allowlist.insert(entry);
            return;
        }
        let allowlist = self.allowlist.clone();
        if let Err(error) = tokio::task::spawn_blocking(move || allowlist.insert(entry)).await {
            warn!(%error, "allowlist persistence task failed");
        }
    }

    async fn modify(
        &self,
        invocation: &Arc<dyn ToolInvocation>,
        details: &ConfirmationDetails,
        cancel: &CancellationToken,
    ) -> Modification {
        let ConfirmationDetails::Edit {
            file_path,
            original,
            proposed,
            ..
        } = details
        else {
            return Modification::Unsupported(format!(
                "tool '{}' does not support modification",
                invocation.tool_name()
            ));
        };
        let Some(editor) = &self.editor else {
            return Modification::Unsupported(
                "no editor is configured to modify tool calls".to_string(),
            );
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Modification::Cancelled,
            outcome = AssertUnwindSafe(editor.open_diff_for_edit(file_path, original, proposed))
                .catch_unwind() => match outcome {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = format!("editor panicked: {}", panic_message(payload));
                    return Modification::Failed(message);
                }
            },
        };
        match outcome {
            Ok(EditorOutcome::Saved(edited)) => match invocation.apply_modified_content(&edited) {
                Some(arguments) => Modification::Arguments(arguments),
                None => Modification::Unsupported(format!(
                    "tool '{}' does not support modification",
                    invocation.tool_name()
                )),
            },
            Ok(EditorOutcome::Cancelled) | Err(ToolError::Cancelled) => Modification::KeepWaiting,
            Err(error) => Modification::Failed(error.to_string()),
        }
    }

    async fn execute(
        &self,
        batch: &Arc<Batch>,
        index: usize,
        invocation: Arc<dyn ToolInvocation>,
        cancel: &CancellationToken,
    ) {
        if cancel.is_cancelled() {
            self.cancel_call(batch, index, CANCELLED_MESSAGE);
            return;
        }

        let call_id = batch.call_id(index);
        let running = invocation.clone();
        self.transition(batch, index, move |call| {
            call.state = CallState::Executing {
                invocation: running,
                output: String::new(),
            };
        });

        let sink = {
            let batch = batch.clone();
            let observer = self.observer.clone();
            let call_id = call_id.clone();
            OutputSink::new(move |fragment| {
                batch.append_output(index, fragment);
                observer.on_output(&call_id, fragment);
            })
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = AssertUnwindSafe(invocation.execute(cancel.child_token(), sink))
                .catch_unwind() => Some(result.unwrap_or_else(|payload| {
                    Err(ToolError::Execution(format!("tool panicked: {}", panic_message(payload))))
                })),
        };
        match result {
            None | Some(Err(ToolError::Cancelled)) => {
                self.cancel_call(batch, index, CANCELLED_MESSAGE);
            }
            Some(Ok(output)) => {
                let response = self.success_response(&call_id, invocation.as_ref(), output);
                self.finish(batch, index, CallState::Success(response));
            }
            Some(Err(error)) => {
                self.fail(batch, index, ToolErrorKind::ExecutionFailed, error.to_string());
            }
        }
    }

    fn success_response(
        &self,
        call_id: &str,
        invocation: &dyn ToolInvocation,
        output: ToolOutput,
    ) -> ToolCallResponse {
        let (content, display) = match output.content {
            Value::String(text) => {
                let truncated = truncate_tool_output(
                    &text,
                    invocation.tool_name(),
                    invocation.kind(),
                    &self.config,
                );
                let display = match output.display {
                    Some(display) => Some(display),
                    None if truncated != text => Some(text),
                    None => None,
                };
                (Value::String(truncated), display)
            }
            other => (other, output.display),
        };
        ToolCallResponse {
            call_id: call_id.to_string(),
            content,
            display,
            error: None,
            partial: false,
        }
    }

    fn mark_scheduled(&self, batch: &Batch, index: usize, invocation: &Arc<dyn ToolInvocation>) {
        let invocation = invocation.clone();
        self.transition(batch, index, move |call| {
            call.state = CallState::Scheduled { invocation };
        });
    }

    fn fail(&self, batch: &Batch, index: usize, kind: ToolErrorKind, message: String) {
        let call_id = batch.call_id(index);
        let response = ToolCallResponse::failure(&call_id, kind, message, None);
        self.finish(batch, index, CallState::Error(response));
    }

    fn cancel_call(&self, batch: &Batch, index: usize, message: &str) {
        let call_id = batch.call_id(index);
        let partial = batch.live_output(index);
        let response =
            ToolCallResponse::failure(&call_id, ToolErrorKind::Cancelled, message, partial);
        self.finish(batch, index, CallState::Cancelled(response));
    }

    fn reject_call(&self, batch: &Batch, index: usize, message: String) {
        let call_id = batch.call_id(index);
        let response = ToolCallResponse::failure(&call_id, ToolErrorKind::Rejected, message, None);
        self.finish(batch, index, CallState::Cancelled(response));
    }

    fn finish(&self, batch: &Batch, index: usize, state: CallState) {
        self.transition(batch, index, move |call| {
            call.duration_ms = Some(call.started_at.elapsed().as_millis());
            call.state = state;
        });
    }

    /// Applies `update` unless the call is already terminal, then publishes a
    /// full-batch snapshot.
    fn transition<F>(&self, batch: &Batch, index: usize, update: F)
    where
        F: FnOnce(&mut ToolCall),
    {
        let snapshots = {
            let mut calls = batch.lock();
            let call = &mut calls[index];
            if call.is_terminal() {
                return;
            }
            update(call);
            debug!(
                call_id = %call.request.call_id,
                status = ?call.state.status(),
                "tool call transition"
            );
            calls.iter().map(ToolCall::snapshot).collect::<Vec<_>>()
        };
        self.observer.on_snapshot(&snapshots);
    }
}

impl Batch {
    fn new(requests: Vec<ToolCallRequest>) -> Self {
        Self {
            calls: Mutex::new(requests.into_iter().map(ToolCall::new).collect()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ToolCall>> {
        self.calls.lock().expect("batch mutex poisoned")
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn request(&self, index: usize) -> ToolCallRequest {
        self.lock()[index].request.clone()
    }

    fn call_id(&self, index: usize) -> String {
        self.lock()[index].request.call_id.clone()
    }

    fn describe(&self, index: usize, invocation: &dyn ToolInvocation) {
        let mut calls = self.lock();
        calls[index].description = Some(invocation.description());
        calls[index].kind = Some(invocation.kind());
    }

    fn record_outcome(&self, index: usize, decision: ConfirmationDecision) {
        self.lock()[index].outcome = Some(decision);
    }

    fn append_output(&self, index: usize, fragment: &str) {
        if let CallState::Executing { output, .. } = &mut self.lock()[index].state {
            output.push_str(fragment);
        }
    }

    fn live_output(&self, index: usize) -> Option<String> {
        match &self.lock()[index].state {
            CallState::Executing { output, .. } => Some(output.clone()),
            _ => None,
        }
    }

    fn snapshots(&self) -> Vec<ToolCallSnapshot> {
        self.lock().iter().map(ToolCall::snapshot).collect()
    }

    fn completed(&self) -> Vec<CompletedToolCall> {
        self.lock().iter().filter_map(ToolCall::completed).collect()
    }
}

/// Keeps the queue usable when the driver task dies mid-batch, e.g. from a
/// panicking observer. The in-flight batch is lost; queued ones still run.
struct DriverGuard {
    inner: Arc<SchedulerInner>,
    armed: bool,
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let restart = {
            let mut queue = self
                .inner
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if queue.pending.is_empty() {
                queue.running = false;
                false
            } else {
                true
            }
        };
        warn!(restart, "tool call driver stopped unexpectedly");
        if restart {
            let inner = self.inner.clone();
            self.inner.runtime.spawn(inner.drain_queue());
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .unwrap_or_else(|| "unknown panic payload".to_string()),
    }
}

fn parse_arguments(request: &ToolCallRequest) -> Result<Value, ValidationError> {
    let Some(raw_arguments) = &request.raw_arguments else {
        return Ok(request.arguments.clone());
    };
    serde_json::from_str::<Value>(raw_arguments).map_err(|error| {
        ValidationError::InvalidArguments {
            tool: request.tool_name.clone(),
            message: format!("invalid JSON arguments: {error}"),
        }
    })
}

fn ensure_unique_call_ids(requests: &[ToolCallRequest]) -> Result<(), SchedulerError> {
    let mut seen = HashSet::with_capacity(requests.len());
    for request in requests {
        if !seen.insert(request.call_id.as_str()) {
            return Err(SchedulerError::DuplicateCallId(request.call_id.clone()));
        }
    }
    Ok(())
}
