// Periodic and delayed market tasks
pub mod events;
pub mod price;
pub mod volume;

pub use events::MarketEventScheduler;
pub use price::PriceFluctuationScheduler;
pub use volume::VolumeDriftScheduler;

use crate::market::{MarketDataStore, RandomSource};
use crate::notify::MarketListener;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Everything a scheduler needs to touch the market
#[derive(Clone)]
pub struct MarketContext {
    pub store: MarketDataStore,
    pub listener: Arc<dyn MarketListener>,
    pub rng: Arc<dyn RandomSource>,
}

impl MarketContext {
    pub fn new(
        store: MarketDataStore,
        listener: Arc<dyn MarketListener>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            store,
            listener,
            rng,
        }
    }
}

/// A spawned timer task plus the token that cancels it
///
/// Never reused: every `start()` builds a fresh handle and `cancel()`
/// consumes it.
pub(crate) struct TaskHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub(crate) fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(task(cancel.clone()));
        Self { cancel, join }
    }

    pub(crate) fn cancel(self) {
        self.cancel.cancel();
        self.join.abort();
    }
}

/// Lifecycle state shared between a scheduler and its running task
#[derive(Default)]
pub(crate) struct SchedulerState {
    pub running: bool,
    pub started_at: Option<Instant>,
    pub next_fire_at: Option<Instant>,
    pub task: Option<TaskHandle>,
    /// Bumped on every start so a superseded task can tell it is stale
    pub generation: u64,
}

impl SchedulerState {
    /// Mark running and hand out the generation for the new task
    pub fn begin(&mut self, now: Instant) -> u64 {
        self.generation += 1;
        self.running = true;
        self.started_at = Some(now);
        self.generation
    }

    /// Cancel the task (if any) and reset to idle
    pub fn halt(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
        self.running = false;
        self.started_at = None;
        self.next_fire_at = None;
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.running && self.generation == generation
    }

    pub fn seconds_running(&self) -> u64 {
        match (self.running, self.started_at) {
            (true, Some(started)) => started.elapsed().as_secs(),
            _ => 0,
        }
    }

    pub fn seconds_to_next_fire(&self) -> u64 {
        match (self.running, self.next_fire_at) {
            (true, Some(next)) => next.saturating_duration_since(Instant::now()).as_secs(),
            _ => 0,
        }
    }
}

pub(crate) type SharedState = Arc<Mutex<SchedulerState>>;

pub(crate) fn lock_state(state: &SharedState) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
