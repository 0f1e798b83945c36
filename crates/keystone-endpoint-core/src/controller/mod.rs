//! Controller loop
//!
//! The Controller is responsible for:
//! - Watching the resource store for changed objects
//! - Running reconcile passes, at most one per object at a time
//! - Requeueing objects when a pass asks for it or fails
//! - Flushing the store on shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐
//! │ ResourceStore │─── watch (ObjectKey) ───┐
//! └───────────────┘                         │
//!                                           ▼
//!                                   ┌──────────────┐
//!            requeue schedule ────► │  Controller  │ ───► ControllerEvent
//!                                   └──────────────┘
//!                                           │
//!                                           ▼ JoinSet (one task per object)
//!                                   ┌──────────────┐
//!                                   │  Reconciler  │
//!                                   └──────────────┘
//! ```
//!
//! ## Error Policy
//!
//! - Transient failures: exponential backoff per object, reset on success
//! - Failures an operator must fix (configuration, ambiguous endpoints):
//!   fixed long interval
//! - Panics inside a pass: logged and re-raised

use crate::config::ReconcileSettings;
use crate::error::{Error, Result};
use crate::reconciler::{Action, Outcome, Phase, Reconciler};
use crate::resource::{ObjectKey, ResourceKind};
use crate::traits::{IdentityConnector, ResourceStore};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Events emitted by the Controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Controller started
    Started {
        namespace: Option<String>,
        objects_count: usize,
    },

    /// A pass finished
    ReconcileSucceeded { key: ObjectKey, phase: Phase },

    /// A pass failed
    ReconcileFailed {
        key: ObjectKey,
        error: String,
        needs_manual_intervention: bool,
    },

    /// An object was scheduled to run again
    Requeued { key: ObjectKey, after: Duration },

    /// Controller stopped
    Stopped { reason: String },
}

/// Drives [`Reconciler`] passes from store changes and requeue requests
///
/// ## Lifecycle
///
/// 1. Create with [`Controller::new()`]
/// 2. Start with [`Controller::run()`] or [`Controller::run_until()`]
/// 3. Controller runs until the shutdown future resolves
///
/// ## Concurrency
///
/// Different objects are reconciled in parallel, up to
/// `max_concurrent_reconciles`. A change to an object whose pass is running
/// marks it dirty; it runs again right after the current pass.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    store: Arc<dyn ResourceStore>,
    settings: ReconcileSettings,
    namespace: Option<String>,
    event_tx: mpsc::Sender<ControllerEvent>,
}

impl Controller {
    /// Create a new controller
    ///
    /// # Returns
    ///
    /// A tuple of (controller, event_receiver) where event_receiver yields controller events
    pub fn new(
        store: Arc<dyn ResourceStore>,
        connector: Arc<dyn IdentityConnector>,
        settings: ReconcileSettings,
    ) -> Result<(Self, mpsc::Receiver<ControllerEvent>)> {
        settings.validate()?;

        let (tx, rx) = mpsc::channel(settings.event_channel_capacity);
        let reconciler = Arc::new(Reconciler::new(store.clone(), connector, settings.clone()));

        let controller = Self {
            reconciler,
            store,
            settings,
            namespace: None,
            event_tx: tx,
        };

        Ok((controller, rx))
    }

    /// Only reconcile objects in `namespace`
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Run until SIGINT
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run with a controlled shutdown signal
    ///
    /// `None` waits for SIGINT like [`Controller::run()`]. A dropped sender
    /// counts as a shutdown signal.
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        match shutdown_rx {
            Some(rx) => {
                self.run_until(async {
                    let _ = rx.await;
                })
                .await
            }
            None => self.run().await,
        }
    }

    /// Run until `shutdown` resolves
    ///
    /// On shutdown, running passes are aborted (dropping their in-flight
    /// remote calls) and the store is flushed.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from inside a reconcile pass.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        // Subscribe before listing so no change falls between the two
        let mut watch = self.store.watch();
        let mut state = LoopState::default();
        let mut passes: JoinSet<(ObjectKey, Result<Outcome>)> = JoinSet::new();

        for key in self.store.list(ResourceKind::KeystoneEndpoint).await? {
            if self.watches(&key) {
                state.enqueue(key);
            }
        }

        info!(
            namespace = self.namespace.as_deref().unwrap_or("*"),
            "Controller started with {} object(s)",
            state.pending.len()
        );
        self.emit_event(ControllerEvent::Started {
            namespace: self.namespace.clone(),
            objects_count: state.pending.len(),
        });

        loop {
            self.dispatch(&mut state, &mut passes);
            let next_due = state.next_due();

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                Some(key) = watch.next() => {
                    self.on_change(&mut state, key).await;
                }

                Some(joined) = passes.join_next(), if !passes.is_empty() => {
                    match joined {
                        Ok((key, result)) => self.complete(&mut state, key, result),
                        Err(e) if e.is_panic() => {
                            error!("Reconcile pass panicked");
                            std::panic::resume_unwind(e.into_panic());
                        }
                        Err(e) => warn!("Reconcile task ended unexpectedly: {}", e),
                    }
                }

                _ = tokio::time::sleep_until(
                    next_due.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))
                ), if next_due.is_some() => {
                    state.promote_due(Instant::now());
                }
            }
        }

        let aborted = passes.len();
        passes.abort_all();
        while passes.join_next().await.is_some() {}
        if aborted > 0 {
            info!("Aborted {} running pass(es)", aborted);
        }

        self.emit_event(ControllerEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });

        self.store.flush().await?;
        info!("Store flushed, controller stopped");

        Ok(())
    }

    fn watches(&self, key: &ObjectKey) -> bool {
        self.namespace
            .as_deref()
            .is_none_or(|namespace| namespace == key.namespace)
    }

    /// Map a changed object to the endpoint objects it affects
    async fn on_change(&self, state: &mut LoopState, key: ObjectKey) {
        if !self.watches(&key) {
            return;
        }

        match key.kind {
            ResourceKind::KeystoneEndpoint => state.enqueue(key),
            ResourceKind::KeystoneApi | ResourceKind::KeystoneService => {
                match self.store.list(ResourceKind::KeystoneEndpoint).await {
                    Ok(keys) => keys
                        .into_iter()
                        .filter(|endpoint| endpoint.namespace == key.namespace)
                        .for_each(|endpoint| state.enqueue(endpoint)),
                    Err(e) => warn!("Failed to list endpoints after change to {}: {}", key, e),
                }
            }
        }
    }

    /// Start queued passes while below the concurrency limit
    fn dispatch(&self, state: &mut LoopState, passes: &mut JoinSet<(ObjectKey, Result<Outcome>)>) {
        while passes.len() < self.settings.max_concurrent_reconciles {
            let Some(key) = state.pending.pop_front() else {
                break;
            };
            state.queued.remove(&key);
            state.schedule.remove(&key);
            state.running.insert(key.clone());

            let span = info_span!(
                "reconcile",
                kind = %key.kind,
                namespace = %key.namespace,
                name = %key.name,
                phase = tracing::field::Empty,
            );
            let reconciler = self.reconciler.clone();
            let deadline = self.settings.pass_timeout();

            passes.spawn(
                async move {
                    let pass = reconciler.reconcile(&key.namespace, &key.name);
                    let result = match tokio::time::timeout(deadline, pass).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::timeout(format!(
                            "reconcile of {} exceeded {:?}",
                            key, deadline
                        ))),
                    };
                    (key, result)
                }
                .instrument(span),
            );
        }
    }

    /// Apply the error policy and schedule the next pass
    fn complete(&self, state: &mut LoopState, key: ObjectKey, result: Result<Outcome>) {
        state.running.remove(&key);

        match result {
            Ok(outcome) => {
                state.failures.remove(&key);
                debug!(object = %key, phase = %outcome.phase, "Reconcile pass finished");
                self.emit_event(ControllerEvent::ReconcileSucceeded {
                    key: key.clone(),
                    phase: outcome.phase,
                });

                if let Action::RequeueAfter(delay) = outcome.action {
                    self.requeue(state, key.clone(), delay);
                }
            }
            Err(e) => {
                let manual = e.needs_manual_intervention();
                let delay = if manual {
                    self.settings.manual_intervention()
                } else {
                    let failures = state.failures.entry(key.clone()).or_insert(0);
                    *failures = failures.saturating_add(1);
                    self.settings.backoff(*failures)
                };

                if manual {
                    error!(object = %key, "Reconcile failed, needs manual intervention: {}", e);
                } else {
                    warn!(object = %key, retry_in = ?delay, "Reconcile failed: {}", e);
                }
                self.emit_event(ControllerEvent::ReconcileFailed {
                    key: key.clone(),
                    error: e.to_string(),
                    needs_manual_intervention: manual,
                });
                self.requeue(state, key.clone(), delay);
            }
        }

        if state.dirty.remove(&key) {
            state.enqueue(key);
        }
    }

    fn requeue(&self, state: &mut LoopState, key: ObjectKey, delay: Duration) {
        state.schedule_at(key.clone(), Instant::now() + delay);
        self.emit_event(ControllerEvent::Requeued { key, after: delay });
    }

    /// Emit a controller event, dropping it when the channel is full
    fn emit_event(&self, event: ControllerEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Bookkeeping of the controller loop
#[derive(Debug, Default)]
struct LoopState {
    /// Ready to run, in arrival order
    pending: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    running: HashSet<ObjectKey>,
    /// Changed while running; run again once the current pass finishes
    dirty: HashSet<ObjectKey>,
    /// Due time of delayed passes
    schedule: BTreeMap<ObjectKey, Instant>,
    /// Consecutive transient failures per object
    failures: HashMap<ObjectKey, u32>,
}

impl LoopState {
    fn enqueue(&mut self, key: ObjectKey) {
        if self.running.contains(&key) {
            self.dirty.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.pending.push_back(key);
        }
    }

    /// Keep the earlier of an existing and a new due time
    fn schedule_at(&mut self, key: ObjectKey, due: Instant) {
        self.schedule
            .entry(key)
            .and_modify(|existing| *existing = (*existing).min(due))
            .or_insert(due);
    }

    fn next_due(&self) -> Option<Instant> {
        self.schedule.values().min().copied()
    }

    fn promote_due(&mut self, now: Instant) {
        let due: Vec<ObjectKey> = self
            .schedule
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in due {
            self.schedule.remove(&key);
            self.enqueue(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new(ResourceKind::KeystoneEndpoint, "openstack", name)
    }

    #[test]
    fn test_enqueue_deduplicates_and_marks_running_dirty() {
        let mut state = LoopState::default();
        state.enqueue(key("nova"));
        state.enqueue(key("nova"));
        assert_eq!(state.pending.len(), 1);

        state.pending.clear();
        state.queued.clear();
        state.running.insert(key("nova"));
        state.enqueue(key("nova"));
        assert!(state.pending.is_empty());
        assert!(state.dirty.contains(&key("nova")));
    }

    #[test]
    fn test_schedule_keeps_earliest_due_time() {
        let mut state = LoopState::default();
        let now = Instant::now();
        state.schedule_at(key("nova"), now + Duration::from_secs(10));
        state.schedule_at(key("nova"), now + Duration::from_secs(5));
        state.schedule_at(key("nova"), now + Duration::from_secs(20));

        assert_eq!(state.next_due(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_promote_due_moves_only_expired_entries() {
        let mut state = LoopState::default();
        let now = Instant::now();
        state.schedule_at(key("glance"), now);
        state.schedule_at(key("nova"), now + Duration::from_secs(60));

        state.promote_due(now);

        assert_eq!(state.pending, VecDeque::from([key("glance")]));
        assert!(state.schedule.contains_key(&key("nova")));
    }
}
