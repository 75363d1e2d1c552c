use super::{lock_state, MarketContext, SchedulerState, SharedState, TaskHandle};
use crate::models::{MarketRecord, SchedulerKind};
use crate::settings::PriceSettings;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Nudges every symbol's price by a normally distributed percentage on a
/// fixed interval, first tick immediately on start
#[derive(Clone)]
pub struct PriceFluctuationScheduler {
    ctx: MarketContext,
    settings: PriceSettings,
    state: SharedState,
    ticks: Arc<AtomicU64>,
}

impl PriceFluctuationScheduler {
    pub fn new(ctx: MarketContext, settings: PriceSettings) -> Self {
        Self {
            ctx,
            settings,
            state: Arc::new(Mutex::new(SchedulerState::default())),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Arm the periodic task
    ///
    /// Returns false (and does nothing) if already running.
    pub fn start(&self) -> bool {
        let mut state = lock_state(&self.state);
        if state.running {
            tracing::warn!("PriceFluctuationScheduler already running - stop it first");
            return false;
        }

        let now = Instant::now();
        let generation = state.begin(now);
        state.next_fire_at = Some(now);

        let scheduler = self.clone();
        state.task = Some(TaskHandle::spawn(move |cancel| async move {
            scheduler.run(generation, cancel).await;
        }));
        drop(state);

        tracing::info!(
            "PriceFluctuationScheduler started - updates every {}s",
            self.settings.interval_secs
        );
        self.ctx.listener.status(
            SchedulerKind::Price,
            &format!("RUNNING (every {}s)", self.settings.interval_secs),
        );
        true
    }

    /// Cancel the periodic task; idempotent
    pub fn stop(&self) -> bool {
        let mut state = lock_state(&self.state);
        if !state.running {
            return false;
        }
        state.halt();
        drop(state);

        tracing::info!("PriceFluctuationScheduler stopped");
        self.ctx.listener.status(SchedulerKind::Price, "STOPPED");
        true
    }

    pub fn is_running(&self) -> bool {
        lock_state(&self.state).running
    }

    pub fn seconds_running(&self) -> u64 {
        lock_state(&self.state).seconds_running()
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    async fn run(&self, generation: u64, cancel: CancellationToken) {
        let interval = self.settings.interval();
        let mut ticker = interval_at(Instant::now(), interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Tick under the state lock so nothing lands after stop() returns
            let mut state = lock_state(&self.state);
            if !state.is_current(generation) {
                break;
            }
            state.next_fire_at = Some(Instant::now() + interval);
            self.tick();
        }
    }

    /// One fluctuation pass over every symbol
    pub fn tick(&self) -> Vec<MarketRecord> {
        let volatility = self.settings.volatility;
        let rng = &self.ctx.rng;

        let updated = self.ctx.store.update_all(|symbol, draft| {
            let change = rng.gaussian() * volatility;
            draft.price *= 1.0 + change;
            tracing::debug!(
                symbol,
                change_pct = change * 100.0,
                price = draft.price,
                "Price fluctuation"
            );
        });

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            "📈 [PRICE] Tick {} at {} ({} symbols)",
            tick,
            Utc::now().format("%H:%M:%S"),
            updated.len()
        );

        self.ctx.listener.display_changed();
        updated
    }
}
