use crate::{ConfirmationDecision, ConfirmationDetails, ConfirmationRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Decision-maker attached to the consumer side of the confirmation bus.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn decide(&self, request: ConfirmationRequest) -> ConfirmationDecision;
}

/// How confirmations are answered when nobody can be asked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonInteractivePolicy {
    #[default]
    Reject,
    AutoAccept,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NonInteractiveResponder {
    policy: NonInteractivePolicy,
}

impl NonInteractiveResponder {
    pub fn new(policy: NonInteractivePolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl ConfirmationHandler for NonInteractiveResponder {
    async fn decide(&self, request: ConfirmationRequest) -> ConfirmationDecision {
        match self.policy {
            NonInteractivePolicy::Reject => ConfirmationDecision::Cancel,
            NonInteractivePolicy::AutoAccept => {
                warn!(
                    call_id = %request.call_id,
                    tool = %request.tool_name,
                    "auto-accepting tool call without interactive confirmation"
                );
                ConfirmationDecision::ProceedOnce
            }
        }
    }
}

pub struct CallbackConfirmationHandler {
    callback: Arc<dyn Fn(ConfirmationRequest) -> ConfirmationDecision + Send + Sync>,
}

impl CallbackConfirmationHandler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ConfirmationRequest) -> ConfirmationDecision + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }
}

#[async_trait]
impl ConfirmationHandler for CallbackConfirmationHandler {
    async fn decide(&self, request: ConfirmationRequest) -> ConfirmationDecision {
        (self.callback)(request)
    }
}

/// Answers from a FIFO of scripted decisions, then cancels.
#[derive(Default)]
pub struct QueueConfirmationHandler {
    decisions: Mutex<VecDeque<ConfirmationDecision>>,
}

impl QueueConfirmationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decisions<I>(decisions: I) -> Self
    where
        I: IntoIterator<Item = ConfirmationDecision>,
    {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
        }
    }

    pub fn push_decision(&self, decision: ConfirmationDecision) {
        self.decisions
            .lock()
            .expect("queue handler mutex should lock")
            .push_back(decision);
    }

    pub fn pending(&self) -> usize {
        self.decisions
            .lock()
            .expect("queue handler mutex should lock")
            .len()
    }
}

#[async_trait]
impl ConfirmationHandler for QueueConfirmationHandler {
    async fn decide(&self, _request: ConfirmationRequest) -> ConfirmationDecision {
        self.decisions
            .lock()
            .expect("queue handler mutex should lock")
            .pop_front()
            .unwrap_or(ConfirmationDecision::Cancel)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedConfirmation {
    pub request: ConfirmationRequest,
    pub decision: ConfirmationDecision,
}

pub struct RecordingConfirmationHandler {
    inner: Arc<dyn ConfirmationHandler>,
    records: Mutex<Vec<RecordedConfirmation>>,
}

impl RecordingConfirmationHandler {
    pub fn new(inner: Arc<dyn ConfirmationHandler>) -> Self {
        Self {
            inner,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn recordings(&self) -> Vec<RecordedConfirmation> {
        self.records
            .lock()
            .expect("recording handler mutex should lock")
            .clone()
    }
}

#[async_trait]
impl ConfirmationHandler for RecordingConfirmationHandler {
    async fn decide(&self, request: ConfirmationRequest) -> ConfirmationDecision {
        let decision = self.inner.decide(request.clone()).await;
        self.records
            .lock()
            .expect("recording handler mutex should lock")
            .push(RecordedConfirmation { request, decision });
        decision
    }
}

struct ConsoleIo {
    input: Box<dyn BufRead + Send>,
    output: Box<dyn Write + Send>,
}

/// Prompts on stderr and reads the answer from stdin.
///
/// Requests are answered one at a time: a prompt and the line that answers
/// it are never interleaved with another request's prompt.
pub struct ConsoleConfirmationHandler {
    io: Arc<tokio::sync::Mutex<ConsoleIo>>,
}

impl ConsoleConfirmationHandler {
    pub fn new() -> Self {
        Self::with_io(BufReader::new(io::stdin()), io::stderr())
    }

    pub fn with_io<R, W>(input: R, output: W) -> Self
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            io: Arc::new(tokio::sync::Mutex::new(ConsoleIo {
                input: Box::new(input),
                output: Box::new(output),
            })),
        }
    }
}

impl Default for ConsoleConfirmationHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfirmationHandler for ConsoleConfirmationHandler {
    async fn decide(&self, request: ConfirmationRequest) -> ConfirmationDecision {
        let mut console = self.io.clone().lock_owned().await;
        let asked = tokio::task::spawn_blocking(move || ask_console(&mut *console, &request));
        match asked.await {
            Ok(Ok(decision)) => decision,
            Ok(Err(error)) => {
                warn!(%error, "console confirmation failed");
                ConfirmationDecision::Cancel
            }
            Err(_) => ConfirmationDecision::Cancel,
        }
    }
}

fn ask_console(
    console: &mut ConsoleIo,
    request: &ConfirmationRequest,
) -> io::Result<ConfirmationDecision> {
    let out = &mut console.output;
    writeln!(
        out,
        "[?] {} ({}, call {})",
        request.details.title(),
        request.tool_name,
        request.call_id
    )?;
    writeln!(out, "    {}", request.description)?;
    match &request.details {
        ConfirmationDetails::Edit { diff, .. } => writeln!(out, "{diff}")?,
        ConfirmationDetails::Exec { command, .. } => writeln!(out, "    $ {command}")?,
        ConfirmationDetails::Info { prompt, .. } => writeln!(out, "    {prompt}")?,
    }
    let can_modify = matches!(request.details, ConfirmationDetails::Edit { .. });
    if can_modify {
        write!(out, "[y]es once / [a]lways / [m]odify / [n]o: ")?;
    } else {
        write!(out, "[y]es once / [a]lways / [n]o: ")?;
    }
    out.flush()?;

    let mut raw = String::new();
    if console.input.read_line(&mut raw)? == 0 {
        return Ok(ConfirmationDecision::Cancel);
    }
    Ok(parse_console_answer(&raw, can_modify))
}

fn parse_console_answer(raw: &str, can_modify: bool) -> ConfirmationDecision {
    match raw.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ConfirmationDecision::ProceedOnce,
        "a" | "always" => ConfirmationDecision::ProceedAlways,
        "m" | "modify" if can_modify => ConfirmationDecision::Modify,
        _ => ConfirmationDecision::Cancel,
    }
}
