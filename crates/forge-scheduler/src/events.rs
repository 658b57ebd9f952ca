use crate::{CompletedToolCall, ToolCallSnapshot};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};

/// Callbacks through which the scheduler reports progress. Snapshots are for
/// live display only; completion is the single authoritative result.
pub trait SchedulerObserver: Send + Sync {
    fn on_output(&self, _call_id: &str, _fragment: &str) {}

    fn on_snapshot(&self, _calls: &[ToolCallSnapshot]) {}

    fn on_batch_complete(&self, _calls: &[CompletedToolCall]) {}
}

#[derive(Default)]
pub struct NoopObserver;

impl SchedulerObserver for NoopObserver {}

#[derive(Clone, Debug, PartialEq)]
pub enum SchedulerEvent {
    Output { call_id: String, fragment: String },
    Snapshot(Vec<ToolCallSnapshot>),
    BatchComplete(Vec<CompletedToolCall>),
}

/// Forwards every callback onto an unbounded channel.
#[derive(Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<SchedulerEvent>,
}

pub fn scheduler_event_channel() -> (ChannelObserver, mpsc::UnboundedReceiver<SchedulerEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ChannelObserver { sender }, receiver)
}

impl SchedulerObserver for ChannelObserver {
    fn on_output(&self, call_id: &str, fragment: &str) {
        let _ = self.sender.send(SchedulerEvent::Output {
            call_id: call_id.to_string(),
            fragment: fragment.to_string(),
        });
    }

    fn on_snapshot(&self, calls: &[ToolCallSnapshot]) {
        let _ = self.sender.send(SchedulerEvent::Snapshot(calls.to_vec()));
    }

    fn on_batch_complete(&self, calls: &[CompletedToolCall]) {
        let _ = self
            .sender
            .send(SchedulerEvent::BatchComplete(calls.to_vec()));
    }
}

#[derive(Default)]
struct BufferedState {
    outputs: Vec<(String, String)>,
    snapshots: Vec<Vec<ToolCallSnapshot>>,
    completions: Vec<Vec<CompletedToolCall>>,
}

/// Keeps every callback in memory; used by tests and simple hosts.
#[derive(Clone, Default)]
pub struct BufferedObserver {
    inner: Arc<Mutex<BufferedState>>,
    completed: Arc<Notify>,
}

impl BufferedObserver {
    pub fn outputs(&self) -> Vec<(String, String)> {
        self.lock().outputs.clone()
    }

    pub fn snapshots(&self) -> Vec<Vec<ToolCallSnapshot>> {
        self.lock().snapshots.clone()
    }

    pub fn completions(&self) -> Vec<Vec<CompletedToolCall>> {
        self.lock().completions.clone()
    }

    /// Waits until at least `count` batches have completed.
    pub async fn wait_for_completions(&self, count: usize) -> Vec<Vec<CompletedToolCall>> {
        loop {
            let notified = self.completed.notified();
            {
                let state = self.lock();
                if state.completions.len() >= count {
                    return state.completions.clone();
                }
            }
            notified.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferedState> {
        self.inner.lock().expect("buffered observer mutex poisoned")
    }
}

impl SchedulerObserver for BufferedObserver {
    fn on_output(&self, call_id: &str, fragment: &str) {
        self.lock()
            .outputs
            .push((call_id.to_string(), fragment.to_string()));
    }

    fn on_snapshot(&self, calls: &[ToolCallSnapshot]) {
        self.lock().snapshots.push(calls.to_vec());
    }

    fn on_batch_complete(&self, calls: &[CompletedToolCall]) {
        self.lock().completions.push(calls.to_vec());
        self.completed.notify_waiters();
    }
}
