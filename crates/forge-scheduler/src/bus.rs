use crate::{BusError, ConfirmationDecision, ConfirmationHandler, ConfirmationRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type PendingTable = Arc<Mutex<HashMap<String, oneshot::Sender<ConfirmationDecision>>>>;

/// Producer side of the confirmation channel.
///
/// Each request registers a one-shot slot keyed by call id; the consumer
/// answers through [`ConfirmationBus::resolve`] or
/// [`ConfirmationInbox::resolve`]. A slot accepts at most one decision and is
/// withdrawn when the waiting call is cancelled.
#[derive(Clone)]
pub struct ConfirmationBus {
    sender: mpsc::UnboundedSender<ConfirmationRequest>,
    pending: PendingTable,
}

/// Consumer side of the confirmation channel. Exactly one exists per bus.
pub struct ConfirmationInbox {
    receiver: mpsc::UnboundedReceiver<ConfirmationRequest>,
    pending: PendingTable,
}

impl ConfirmationBus {
    pub fn channel() -> (ConfirmationBus, ConfirmationInbox) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        (
            ConfirmationBus {
                sender,
                pending: pending.clone(),
            },
            ConfirmationInbox { receiver, pending },
        )
    }

    /// Builds a bus whose consumer is `handler`, driven on the current tokio
    /// runtime.
    pub fn with_handler(handler: Arc<dyn ConfirmationHandler>) -> Result<Self, BusError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        let (bus, inbox) = Self::channel();
        runtime.spawn(inbox.run(handler));
        Ok(bus)
    }

    /// Publishes `request` and waits for its decision.
    pub async fn request(
        &self,
        request: ConfirmationRequest,
        cancel: &CancellationToken,
    ) -> Result<ConfirmationDecision, BusError> {
        let call_id = request.call_id.clone();
        let (sender, receiver) = oneshot::channel();
        {
            let mut pending = lock_pending(&self.pending);
            if pending.contains_key(&call_id) {
                return Err(BusError::DuplicateRequest(call_id));
            }
            pending.insert(call_id.clone(), sender);
        }

        if self.sender.send(request).is_err() {
            self.withdraw(&call_id);
            return Err(BusError::NoConsumer);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.withdraw(&call_id);
                Err(BusError::Cancelled)
            }
            decision = receiver => decision.map_err(|_| BusError::Abandoned(call_id)),
        }
    }

    pub fn resolve(&self, call_id: &str, decision: ConfirmationDecision) -> Result<(), BusError> {
        resolve_pending(&self.pending, call_id, decision)
    }

    /// Call ids currently waiting for a decision, sorted.
    pub fn pending(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock_pending(&self.pending).keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    fn withdraw(&self, call_id: &str) {
        if lock_pending(&self.pending).remove(call_id).is_some() {
            debug!(call_id, "withdrew pending confirmation");
        }
    }
}

impl ConfirmationInbox {
    /// Next request that is still awaiting a decision. Requests withdrawn
    /// before delivery are skipped. Returns `None` once every bus handle is
    /// dropped.
    pub async fn next(&mut self) -> Option<ConfirmationRequest> {
        while let Some(request) = self.receiver.recv().await {
            if lock_pending(&self.pending).contains_key(&request.call_id) {
                return Some(request);
            }
            debug!(call_id = %request.call_id, "skipping withdrawn confirmation");
        }
        None
    }

    pub fn resolve(&self, call_id: &str, decision: ConfirmationDecision) -> Result<(), BusError> {
        resolve_pending(&self.pending, call_id, decision)
    }

    /// Drives `handler` on a background task. Requests are decided
    /// independently, so one slow decision never blocks another.
    pub fn spawn(self, handler: Arc<dyn ConfirmationHandler>) -> JoinHandle<()> {
        tokio::spawn(self.run(handler))
    }

    async fn run(mut self, handler: Arc<dyn ConfirmationHandler>) {
        while let Some(request) = self.next().await {
            let handler = handler.clone();
            let pending = self.pending.clone();
            tokio::spawn(async move {
                let call_id = request.call_id.clone();
                let decision = handler.decide(request).await;
                if let Err(error) = resolve_pending(&pending, &call_id, decision) {
                    debug!(call_id = %call_id, %error, "confirmation decision discarded");
                }
            });
        }
    }
}

fn resolve_pending(
    pending: &PendingTable,
    call_id: &str,
    decision: ConfirmationDecision,
) -> Result<(), BusError> {
    let sender = lock_pending(pending)
        .remove(call_id)
        .ok_or_else(|| BusError::NotPending(call_id.to_string()))?;
    sender
        .send(decision)
        .map_err(|_| BusError::NotPending(call_id.to_string()))
}

fn lock_pending(
    pending: &PendingTable,
) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<ConfirmationDecision>>> {
    pending.lock().expect("confirmation table mutex poisoned")
}
