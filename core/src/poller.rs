/// Poller: full-list refreshes on a fallback timer and a safety timer
use crate::config::Config;
use crate::message_store::MessageStore;
use crate::messenger_types::FeedHealth;
use crate::reconciler::SyncEvent;
use crate::shared::SharedReconciler;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Whether the fallback timer should run for the given feed health
pub fn fallback_active(health: FeedHealth) -> bool {
    health != FeedHealth::Subscribed
}

/// Both timers of one open conversation
pub struct Poller {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Poller {
    pub fn start(
        store: Arc<dyn MessageStore>,
        conversation_id: String,
        shared: SharedReconciler,
        health: watch::Receiver<FeedHealth>,
        config: &Config,
    ) -> Self {
        let target = PollTarget {
            store,
            conversation_id,
            shared,
        };

        let safety = tokio::spawn(run_safety(target.clone(), config.safety_poll_interval));
        let fallback = tokio::spawn(run_fallback(
            target,
            health,
            config.fallback_poll_interval,
        ));

        Self {
            tasks: Mutex::new(vec![safety, fallback]),
        }
    }

    /// Cancel both timers. Idempotent.
    pub fn stop(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in &tasks {
            task.abort();
        }
        if !tasks.is_empty() {
            debug!("Poll timers cancelled");
        }
    }

    pub fn is_running(&self) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|t| !t.is_finished())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Clone)]
struct PollTarget {
    store: Arc<dyn MessageStore>,
    conversation_id: String,
    shared: SharedReconciler,
}

impl PollTarget {
    async fn refresh(&self, timer: &str) {
        match self.store.list_messages(&self.conversation_id).await {
            Ok(messages) => {
                let applied = self
                    .shared
                    .apply(SyncEvent::ConfirmedSnapshot {
                        messages,
                        complete: false,
                    })
                    .await;
                if applied.changed {
                    debug!("{} poll picked up changes in {}", timer, self.conversation_id);
                }
            }
            // retried on the next tick
            Err(e) => warn!("{} poll for {} failed: {}", timer, self.conversation_id, e),
        }
    }
}

async fn run_safety(target: PollTarget, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        target.refresh("Safety").await;
    }
}

async fn run_fallback(
    target: PollTarget,
    mut health: watch::Receiver<FeedHealth>,
    period: Duration,
) {
    loop {
        while !fallback_active(*health.borrow_and_update()) {
            if health.changed().await.is_err() {
                return;
            }
        }

        let current = *health.borrow();
        info!(
            "Feed {} for {}, fallback polling every {:?}",
            current, target.conversation_id, period
        );
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => target.refresh("Fallback").await,
                changed = health.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !fallback_active(*health.borrow_and_update()) {
                        info!("Feed recovered for {}, fallback polling stopped", target.conversation_id);
                        break;
                    }
                }
            }
        }
    }
}
