use super::{lock_state, MarketContext, SchedulerState, SharedState, TaskHandle};
use crate::models::{clamp_volume, MarketRecord, SchedulerKind};
use crate::settings::VolumeSettings;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Skew of the volume change draw: (u - 0.3) * 0.5 spans -15%..+35%
const DRIFT_SKEW: f64 = 0.3;
const DRIFT_SCALE: f64 = 0.5;
/// Shares per unit of volume impact on price
const IMPACT_DIVISOR: f64 = 100_000.0;
const IMPACT_SCALE: f64 = 0.5;

/// Drifts every symbol's volume on a fixed-rate schedule and feeds the
/// volume change back into price
#[derive(Clone)]
pub struct VolumeDriftScheduler {
    ctx: MarketContext,
    settings: VolumeSettings,
    state: SharedState,
    ticks: Arc<AtomicU64>,
}

impl VolumeDriftScheduler {
    pub fn new(ctx: MarketContext, settings: VolumeSettings) -> Self {
        Self {
            ctx,
            settings,
            state: Arc::new(Mutex::new(SchedulerState::default())),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start(&self) -> bool {
        let mut state = lock_state(&self.state);
        if state.running {
            tracing::warn!("VolumeDriftScheduler already running - stop it first");
            return false;
        }

        let now = Instant::now();
        let first = now + self.settings.initial_delay();
        let generation = state.begin(now);
        state.next_fire_at = Some(first);

        let scheduler = self.clone();
        state.task = Some(TaskHandle::spawn(move |cancel| async move {
            scheduler.run(generation, first, cancel).await;
        }));
        drop(state);

        tracing::info!(
            "VolumeDriftScheduler started - updates every {}s",
            self.settings.interval_secs
        );
        self.ctx.listener.status(
            SchedulerKind::Volume,
            &format!("RUNNING (every {}s)", self.settings.interval_secs),
        );
        true
    }

    pub fn stop(&self) -> bool {
        let mut state = lock_state(&self.state);
        if !state.running {
            return false;
        }
        state.halt();
        drop(state);

        tracing::info!("VolumeDriftScheduler stopped");
        self.ctx.listener.status(SchedulerKind::Volume, "STOPPED");
        true
    }

    pub fn is_running(&self) -> bool {
        lock_state(&self.state).running
    }

    pub fn seconds_to_next_update(&self) -> u64 {
        lock_state(&self.state).seconds_to_next_fire()
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    async fn run(&self, generation: u64, first: Instant, cancel: CancellationToken) {
        let interval = self.settings.interval();
        // Fixed rate from the anchor, not re-armed per fire
        let mut ticker = interval_at(first, interval);
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

    /// One drift pass over every symbol
    pub fn tick(&self) -> Vec<MarketRecord> {
        let rng = &self.ctx.rng;
        tracing::info!("=== VOLUME UPDATE at {} ===", Utc::now().format("%H:%M:%S"));

        let updated = self.ctx.store.update_all(|symbol, draft| {
            let old_volume = draft.volume;
            let change_percent = (rng.uniform() - DRIFT_SKEW) * DRIFT_SCALE;
            let new_volume = clamp_volume((old_volume as f64 * (1.0 + change_percent)) as i64);
            draft.volume = new_volume;

            let volume_impact = (new_volume - old_volume) as f64 / IMPACT_DIVISOR;
            let price_change = volume_impact * rng.gaussian() * IMPACT_SCALE;
            draft.price += price_change;

            tracing::info!(
                "Volume {}: {} shares ({:.1}% change), price impact {:+.2}",
                symbol,
                new_volume,
                change_percent * 100.0,
                price_change
            );
        });

        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.ctx.listener.display_changed();
        updated
    }
}
