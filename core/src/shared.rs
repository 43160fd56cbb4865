/// Reconciler shared between the feed listener, the poll timers and the writer
use crate::messenger_types::{Message, ViewEvent};
use crate::reconciler::{Applied, Reconciler, SyncEvent};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::debug;

/// Each `apply` runs to completion under the write lock (nothing awaits while
/// it is held), so callbacks from different sources never interleave inside a merge.
#[derive(Clone)]
pub struct SharedReconciler {
    inner: Arc<RwLock<Reconciler>>,
    messages_tx: Arc<watch::Sender<Vec<Message>>>,
    events_tx: broadcast::Sender<ViewEvent>,
    closed_tx: Arc<watch::Sender<bool>>,
}

impl SharedReconciler {
    pub fn new(reconciler: Reconciler, event_buffer: usize) -> Self {
        let (messages_tx, _) = watch::channel(reconciler.messages());
        let (events_tx, _) = broadcast::channel(event_buffer);
        Self {
            inner: Arc::new(RwLock::new(reconciler)),
            messages_tx: Arc::new(messages_tx),
            events_tx,
            closed_tx: Arc::new(watch::channel(false).0),
        }
    }

    /// Apply one event and publish the list if it changed. No-op once closed.
    pub async fn apply(&self, event: SyncEvent) -> Applied {
        if self.is_closed() {
            debug!("View closed, dropping {}", event_kind(&event));
            return Applied::default();
        }

        let mut reconciler = self.inner.write().await;
        // close may have raced with the lock wait
        if self.is_closed() {
            return Applied::default();
        }
        let applied = reconciler.apply(event);
        if applied.changed {
            let messages = reconciler.messages();
            self.messages_tx.send_replace(messages.clone());
            // no subscribers is fine
            let _ = self.events_tx.send(ViewEvent::MessagesChanged { messages });
        }
        applied
    }

    pub async fn snapshot(&self) -> Vec<Message> {
        self.inner.read().await.messages()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.read().await.pending_count()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<Message>> {
        self.messages_tx.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<ViewEvent> {
        self.events_tx.clone()
    }

    /// Detach from the view; later events from in-flight work are dropped
    pub fn close(&self) {
        self.closed_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Flips to `true` once on close
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }
}

fn event_kind(event: &SyncEvent) -> &'static str {
    match event {
        SyncEvent::ConfirmedSnapshot { .. } => "confirmed snapshot",
        SyncEvent::OptimisticAdd(_) => "optimistic add",
        SyncEvent::OptimisticResolve { .. } => "optimistic resolve",
    }
}
