//! # Boxoffice Runtime
//!
//! Runtime implementation for the reducer architecture used by the booking engine.
//!
//! ## Core Components
//!
//! - **Store**: The runtime that manages state and executes effects
//! - **Retry**: Exponential backoff for transient failures of external calls
//! - **Keyed locks**: At most one in-flight operation per key (order id, user id)
//!
//! ## Example
//!
//! ```ignore
//! use boxoffice_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//!
//! // Send an action
//! store.send(Action::DoSomething).await?;
//!
//! // Read state
//! let value = store.state(|s| s.some_field).await;
//! ```

use boxoffice_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, watch};

/// Retry logic with exponential backoff
pub mod retry;

/// Per-key async mutual exclusion
pub mod keyed;

pub use keyed::KeyedLocks;
pub use retry::{RetryPolicy, retry_with_predicate};

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),
    }
}

pub use error::StoreError;

/// Handle for tracking effect completion
///
/// Returned by [`Store::send()`] to allow waiting for the effects spawned by
/// that action. Delayed effects count as pending until their timer fires and
/// the resulting action has been reduced.
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };

        let tracking = EffectTracking {
            counter,
            notifier: Arc::new(tx),
        };

        (handle, tracking)
    }

    /// Wait for all effects to complete
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                break;
            }
        }
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.effects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Internal: effect tracking context passed through effect execution
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: Arc<watch::Sender<()>>,
}

impl EffectTracking {
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Internal: RAII guard that decrements both effect counters on drop
///
/// Ensures the counters are always decremented, even if the effect panics.
struct EffectGuard {
    tracking: EffectTracking,
    pending: Arc<AtomicUsize>,
}

impl EffectGuard {
    fn new(tracking: EffectTracking, pending: &Arc<AtomicUsize>) -> Self {
        tracking.increment();
        pending.fetch_add(1, Ordering::SeqCst);
        Self {
            tracking,
            pending: Arc::clone(pending),
        }
    }
}

impl Drop for EffectGuard {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.tracking.decrement();
    }
}

/// Store module - The runtime for reducers
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicUsize, Duration, Effect, EffectGuard, EffectHandle,
        EffectTracking, Ordering, Reducer, RwLock, StoreError, broadcast,
    };

    /// Feedback actions buffered per observer before it lags
    const BROADCAST_CAPACITY: usize = 64;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock`; concurrent `send()` calls serialize at the reducer)
    /// 2. Reducer (business logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: Arc<R>,
        environment: Arc<E>,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        /// Actions produced by effects are broadcast to observers before
        /// being fed back into the reducer.
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: Arc::clone(&self.reducer),
                environment: Arc::clone(&self.environment),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            let (action_broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer: Arc::new(reducer),
                environment: Arc::new(environment),
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
            }
        }

        /// Subscribe to actions produced by effects
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Send an action to the store
        ///
        /// 1. Acquires write lock on state
        /// 2. Calls reducer with (state, action, environment)
        /// 3. Starts the returned effects asynchronously
        ///
        /// `send()` returns after starting effect execution, not after completion.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                metrics::counter!("store.shutdown.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            Ok(self.dispatch(action).await)
        }

        /// Reduce an action and start its effects, even during shutdown
        ///
        /// Actions produced by running effects go through here so in-flight
        /// work can finish while the store drains.
        async fn dispatch(&self, action: A) -> EffectHandle {
            metrics::counter!("store.commands.total").increment(1);

            let (handle, tracking) = EffectHandle::new();

            let effects = {
                let mut state = self.state.write().await;
                self.reducer.reduce(&mut state, action, &self.environment)
            };

            tracing::trace!("Executing {} effects", effects.len());
            for effect in effects {
                self.execute_effect(effect, tracking.clone());
            }

            handle
        }

        /// Read state via a closure
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&state)
        }

        /// Initiate graceful shutdown of the store
        ///
        /// Rejects new actions, then waits for running effects. Delayed
        /// effects whose timers have not fired yet count as running.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if the timeout expires before all
        /// pending effects complete.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Initiating graceful shutdown");
            self.shutdown.store(true, Ordering::Release);

            let start = tokio::time::Instant::now();
            let poll_interval = Duration::from_millis(50);

            loop {
                let pending = self.pending_effects.load(Ordering::Acquire);
                if pending == 0 {
                    tracing::info!("All effects completed, shutdown successful");
                    return Ok(());
                }

                if start.elapsed() >= timeout {
                    tracing::warn!(pending_effects = pending, "Shutdown timeout");
                    return Err(StoreError::ShutdownTimeout(pending));
                }

                tokio::time::sleep(poll_interval).await;
            }
        }

        fn feed_back(&self, action: A) -> impl std::future::Future<Output = ()> + Send + 'static {
            let store = self.clone();
            async move {
                let _ = store.action_broadcast.send(action.clone());
                store.dispatch(action).await;
            }
        }

        fn execute_effect(&self, effect: Effect<A>, tracking: EffectTracking) {
            match effect {
                Effect::None => {
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Future(fut) => {
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                    let guard = EffectGuard::new(tracking, &self.pending_effects);
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = guard;
                        if let Some(action) = fut.await {
                            store.feed_back(action).await;
                        }
                    });
                },
                Effect::Delay { duration, action } => {
                    metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                    let guard = EffectGuard::new(tracking, &self.pending_effects);
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = guard;
                        tokio::time::sleep(duration).await;
                        tracing::trace!("Effect::Delay elapsed, sending action");
                        store.feed_back(*action).await;
                    });
                },
                Effect::Parallel(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                    for effect in effects {
                        self.execute_effect(effect, tracking.clone());
                    }
                },
                Effect::Sequential(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "sequential")
                        .increment(1);
                    let guard = EffectGuard::new(tracking, &self.pending_effects);
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = guard;
                        for effect in effects {
                            let (mut step, step_tracking) = EffectHandle::new();
                            store.execute_effect(effect, step_tracking);
                            step.wait().await;
                        }
                    });
                },
            }
        }
    }
}

pub use store::Store;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use boxoffice_core::{SmallVec, smallvec};

    #[derive(Clone, Debug, PartialEq)]
    enum TickAction {
        Tick,
        TickLater(u64),
        TickTwiceInOrder,
        TickFromFuture,
    }

    #[derive(Default)]
    struct TickState {
        ticks: u32,
    }

    struct TickReducer;

    impl Reducer for TickReducer {
        type State = TickState;
        type Action = TickAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut TickState,
            action: TickAction,
            _env: &(),
        ) -> SmallVec<[Effect<TickAction>; 4]> {
            match action {
                TickAction::Tick => {
                    state.ticks += 1;
                    SmallVec::new()
                },
                TickAction::TickLater(secs) => {
                    smallvec![Effect::delay(Duration::from_secs(secs), TickAction::Tick)]
                },
                TickAction::TickTwiceInOrder => smallvec![Effect::chain(vec![
                    Effect::delay(Duration::from_secs(1), TickAction::Tick),
                    Effect::delay(Duration::from_secs(1), TickAction::Tick),
                ])],
                TickAction::TickFromFuture => {
                    smallvec![Effect::future(async { Some(TickAction::Tick) })]
                },
            }
        }
    }

    fn store() -> Store<TickState, TickAction, (), TickReducer> {
        Store::new(TickState::default(), TickReducer, ())
    }

    #[tokio::test]
    async fn send_reduces_synchronously() {
        let store = store();
        store.send(TickAction::Tick).await.unwrap();
        assert_eq!(store.state(|s| s.ticks).await, 1);
    }

    #[tokio::test]
    async fn future_effect_feeds_action_back() {
        let store = store();
        let mut handle = store.send(TickAction::TickFromFuture).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle.wait())
            .await
            .unwrap();
        assert_eq!(store.state(|s| s.ticks).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_effect_fires_after_duration() {
        let store = store();
        let mut handle = store.send(TickAction::TickLater(3600)).await.unwrap();
        assert_eq!(store.state(|s| s.ticks).await, 0);

        handle.wait().await;
        assert_eq!(store.state(|s| s.ticks).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_effects_complete_in_order() {
        let store = store();
        let mut handle = store.send(TickAction::TickTwiceInOrder).await.unwrap();
        handle.wait().await;
        assert_eq!(store.state(|s| s.ticks).await, 2);
    }

    #[tokio::test]
    async fn observers_see_feedback_actions() {
        let store = store();
        let mut actions = store.subscribe_actions();
        store.send(TickAction::TickFromFuture).await.unwrap();
        let observed = actions.recv().await.unwrap();
        assert_eq!(observed, TickAction::Tick);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_new_actions() {
        let store = store();
        store.shutdown(Duration::from_secs(1)).await.unwrap();
        let result = store.send(TickAction::Tick).await;
        assert!(matches!(result, Err(StoreError::ShutdownInProgress)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_times_out_with_pending_timers() {
        let store = store();
        store.send(TickAction::TickLater(3600)).await.unwrap();
        let result = store.shutdown(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(StoreError::ShutdownTimeout(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_lets_running_timers_finish() {
        let store = store();
        store.send(TickAction::TickLater(60)).await.unwrap();
        store.shutdown(Duration::from_secs(120)).await.unwrap();
        assert_eq!(store.state(|s| s.ticks).await, 1);
    }
}
