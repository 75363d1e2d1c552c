use super::{lock_state, MarketContext, SchedulerState, SharedState, TaskHandle};
use crate::models::{EventDirection, MarketEvent, SchedulerKind, EVENT_CATALOG};
use crate::settings::EventSettings;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Fires a fixed batch of one-shot market events after `start()`
///
/// Event `i` (1-based) fires at `i * spacing` from the start call, plus an
/// optional random jitter. Each event shifts volume on every symbol.
#[derive(Clone)]
pub struct MarketEventScheduler {
    ctx: MarketContext,
    settings: EventSettings,
    state: SharedState,
    progress: Arc<Mutex<EventProgress>>,
}

#[derive(Default)]
struct EventProgress {
    pending: VecDeque<Instant>,
    fired: u32,
    last_event: Option<MarketEvent>,
}

impl MarketEventScheduler {
    pub fn new(ctx: MarketContext, settings: EventSettings) -> Self {
        Self {
            ctx,
            settings,
            state: Arc::new(Mutex::new(SchedulerState::default())),
            progress: Arc::new(Mutex::new(EventProgress::default())),
        }
    }

    fn progress(&self) -> std::sync::MutexGuard<'_, EventProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule the batch of events
    ///
    /// Returns false (and does nothing) if a batch is still pending or there
    /// is nothing to schedule.
    pub fn start(&self) -> bool {
        let mut state = lock_state(&self.state);
        if state.running {
            tracing::warn!("MarketEventScheduler already running - stop it first");
            return false;
        }

        let now = Instant::now();
        let fire_times = self.fire_times(now);
        if fire_times.is_empty() {
            drop(state);
            tracing::warn!("MarketEventScheduler has no events to schedule");
            self.ctx
                .listener
                .status(SchedulerKind::Events, "All events completed");
            return false;
        }

        let generation = state.begin(now);
        state.next_fire_at = fire_times.first().copied();

        {
            let mut progress = self.progress();
            progress.pending = fire_times.iter().copied().collect();
            progress.fired = 0;
        }

        let scheduler = self.clone();
        state.task = Some(TaskHandle::spawn(move |cancel| async move {
            scheduler.run(generation, fire_times, cancel).await;
        }));
        drop(state);

        tracing::info!(
            "MarketEventScheduler started - {} events every {}s",
            self.settings.count,
            self.settings.spacing_secs
        );
        self.ctx.listener.status(
            SchedulerKind::Events,
            &format!("SCHEDULED ({} events)", self.settings.count),
        );
        true
    }

    /// Cancel all pending events; idempotent
    pub fn stop(&self) -> bool {
        let mut state = lock_state(&self.state);
        if !state.running {
            return false;
        }
        state.halt();
        self.progress().pending.clear();
        drop(state);

        tracing::info!("MarketEventScheduler stopped");
        self.ctx.listener.status(SchedulerKind::Events, "Events stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        lock_state(&self.state).running
    }

    pub fn seconds_to_next_event(&self) -> u64 {
        lock_state(&self.state).seconds_to_next_fire()
    }

    /// Events fired since the last `start()`
    pub fn events_fired(&self) -> u32 {
        self.progress().fired
    }

    pub fn last_event(&self) -> Option<MarketEvent> {
        self.progress().last_event.clone()
    }

    fn fire_times(&self, now: Instant) -> Vec<Instant> {
        let mut times: Vec<Instant> = (1..=self.settings.count)
            .map(|i| {
                let mut offset = self.settings.spacing() * i;
                if self.settings.jitter_secs > 0 {
                    let jitter = self.ctx.rng.index(self.settings.jitter_secs as usize);
                    offset += Duration::from_secs(jitter as u64);
                }
                now + offset
            })
            .collect();
        times.sort();
        times
    }

    async fn run(&self, generation: u64, fire_times: Vec<Instant>, cancel: CancellationToken) {
        let total = fire_times.len();

        for (index, at) in fire_times.into_iter().enumerate() {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = sleep_until(at) => {}
            }

            let mut state = lock_state(&self.state);
            if !state.is_current(generation) {
                return;
            }

            let sequence = (index + 1) as u32;
            let event = self.trigger(sequence);

            let next = {
                let mut progress = self.progress();
                progress.pending.pop_front();
                progress.fired = sequence;
                progress.last_event = Some(event.clone());
                progress.pending.front().copied()
            };
            state.next_fire_at = next;

            let sign = match event.direction {
                EventDirection::Positive => "positive",
                EventDirection::Negative => "negative",
            };
            self.ctx.listener.status(
                SchedulerKind::Events,
                &format!("EVENT {}/{}: {} ({})", sequence, total, event.kind.name, sign),
            );

            if sequence as usize == total {
                state.running = false;
                state.started_at = None;
                state.next_fire_at = None;
                // Detach our own handle; we are about to return anyway
                state.task = None;
                drop(state);

                tracing::info!("MarketEventScheduler finished - all {} events fired", total);
                self.ctx
                    .listener
                    .status(SchedulerKind::Events, "All events completed");
                return;
            }
        }
    }

    /// Pick a random event and apply its volume shift to every symbol
    fn trigger(&self, sequence: u32) -> MarketEvent {
        let kind = EVENT_CATALOG[self.ctx.rng.index(EVENT_CATALOG.len())];
        let (direction, volume_delta) = if self.ctx.rng.coin() {
            (EventDirection::Positive, self.settings.positive_volume)
        } else {
            (EventDirection::Negative, self.settings.negative_volume)
        };

        tracing::info!("=== MARKET EVENT {} ===", sequence);
        tracing::info!("Event: {} - {}", kind.name, kind.rationale);

        let updated = self.ctx.store.update_all(|_, draft| {
            draft.volume = draft.volume.saturating_add(volume_delta);
        });
        for record in &updated {
            tracing::info!(
                "  {} volume {:+} -> {} shares",
                record.symbol(),
                volume_delta,
                record.volume()
            );
        }

        self.ctx.listener.display_changed();

        MarketEvent {
            sequence,
            kind,
            direction,
            volume_delta,
            fired_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::random::testing::FixedRandom;
    use crate::scheduler::testing::{assert_invariants, fixed_context, seeded_context};
    use tokio::time::sleep;

    fn scheduler(ctx: MarketContext) -> MarketEventScheduler {
        MarketEventScheduler::new(ctx, EventSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_five_times_at_fixed_offsets() {
        let (ctx, listener) = seeded_context();
        let scheduler = scheduler(ctx.clone());

        assert!(scheduler.start());
        assert_eq!(scheduler.seconds_to_next_event(), 20);

        sleep(Duration::from_millis(19_900)).await;
        assert_eq!(scheduler.events_fired(), 0);

        for expected in 1..=5 {
            sleep(Duration::from_secs(20)).await;
            assert_eq!(scheduler.events_fired(), expected);
        }

        assert!(!scheduler.is_running());
        assert_eq!(scheduler.seconds_to_next_event(), 0);
        assert_eq!(listener.display_count(), 5);

        let statuses = listener.statuses(SchedulerKind::Events);
        let completed = statuses
            .iter()
            .filter(|s| s.as_str() == "All events completed")
            .count();
        assert_eq!(completed, 1);
        assert_eq!(statuses.last().map(String::as_str), Some("All events completed"));

        // Nothing else fires later
        sleep(Duration::from_secs(200)).await;
        assert_eq!(scheduler.events_fired(), 5);
        assert_invariants(&ctx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_positive_event_adds_volume() {
        let (ctx, _) = fixed_context(FixedRandom {
            coin: true,
            index: 1,
            ..FixedRandom::neutral()
        });
        let scheduler = scheduler(ctx.clone());

        scheduler.start();
        sleep(Duration::from_millis(20_100)).await;

        assert_eq!(ctx.store.get("AAPL").unwrap().volume(), 120_000);
        assert_eq!(ctx.store.get("GOOGL").unwrap().volume(), 95_000);
        assert_eq!(ctx.store.get("MSFT").unwrap().volume(), 140_000);

        let event = scheduler.last_event().unwrap();
        assert_eq!(event.kind.name, "Major earnings report");
        assert_eq!(event.direction, EventDirection::Positive);
        assert_eq!(event.volume_delta, 20_000);

        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_events_clamp_at_floor() {
        let (ctx, _) = fixed_context(FixedRandom {
            coin: false,
            ..FixedRandom::neutral()
        });
        let scheduler = scheduler(ctx.clone());

        scheduler.start();
        sleep(Duration::from_secs(101)).await;

        // GOOGL: 75k - 5 * 15k would be 0, clamped to 10k
        assert_eq!(ctx.store.get("GOOGL").unwrap().volume(), 10_000);
        assert_eq!(ctx.store.get("AAPL").unwrap().volume(), 25_000);
        assert_eq!(ctx.store.get("MSFT").unwrap().volume(), 45_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_events() {
        let (ctx, listener) = seeded_context();
        let scheduler = scheduler(ctx);

        scheduler.start();
        sleep(Duration::from_secs(45)).await;
        assert_eq!(scheduler.events_fired(), 2);

        assert!(scheduler.stop());
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.seconds_to_next_event(), 0);

        sleep(Duration::from_secs(100)).await;
        assert_eq!(scheduler.events_fired(), 2);
        assert!(listener
            .statuses(SchedulerKind::Events)
            .contains(&"Events stopped".to_string()));
        assert!(!scheduler.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_is_noop() {
        let (ctx, _) = seeded_context();
        let scheduler = scheduler(ctx);

        assert!(scheduler.start());
        sleep(Duration::from_secs(10)).await;
        assert!(!scheduler.start());

        // Offsets still anchored at the first start
        assert_eq!(scheduler.seconds_to_next_event(), 10);
        sleep(Duration::from_secs(95)).await;
        assert_eq!(scheduler.events_fired(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_completion_schedules_new_batch() {
        let (ctx, _) = seeded_context();
        let scheduler = scheduler(ctx);

        scheduler.start();
        sleep(Duration::from_secs(101)).await;
        assert!(!scheduler.is_running());

        assert!(scheduler.start());
        assert_eq!(scheduler.events_fired(), 0);
        sleep(Duration::from_secs(41)).await;
        assert_eq!(scheduler.events_fired(), 2);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch_completes_immediately() {
        let (ctx, listener) = seeded_context();
        let settings = EventSettings {
            count: 0,
            ..EventSettings::default()
        };
        let scheduler = MarketEventScheduler::new(ctx, settings);

        assert!(!scheduler.start());
        assert!(!scheduler.is_running());
        assert_eq!(
            listener.statuses(SchedulerKind::Events),
            vec!["All events completed"]
        );

        sleep(Duration::from_secs(300)).await;
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.events_fired(), 0);
        assert!(!scheduler.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_stays_within_window() {
        let (ctx, _) = seeded_context();
        let settings = EventSettings {
            jitter_secs: 10,
            ..EventSettings::default()
        };
        let scheduler = MarketEventScheduler::new(ctx, settings);

        scheduler.start();
        let next = scheduler.seconds_to_next_event();
        assert!((20..30).contains(&next));

        sleep(Duration::from_secs(110)).await;
        assert_eq!(scheduler.events_fired(), 5);
    }
}
