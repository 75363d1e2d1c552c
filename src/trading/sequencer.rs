use crate::Result;
use crate::error::MarketError;
use crate::models::{MarketRecord, SchedulerKind};
use crate::scheduler::{MarketContext, PriceFluctuationScheduler, TaskHandle};
use crate::settings::TradeSettings;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shares of requested volume per unit of price impact
const IMPACT_DIVISOR: f64 = 100_000.0;
/// Cap on the per-trade price move, either direction
const MAX_PRICE_IMPACT: f64 = 0.05;

/// Phases of a trade session, in order
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum TradePhase {
    /// Price updates suspended (synchronous, at submission)
    Halt,
    /// Requested volume spread across symbols
    ApplyVolume,
    /// Price moved by the volume impact
    PriceImpact,
    /// Price updates resumed and cooldown started
    Resume,
}

impl TradePhase {
    pub fn next(self) -> Option<TradePhase> {
        match self {
            TradePhase::Halt => Some(TradePhase::ApplyVolume),
            TradePhase::ApplyVolume => Some(TradePhase::PriceImpact),
            TradePhase::PriceImpact => Some(TradePhase::Resume),
            TradePhase::Resume => None,
        }
    }

    /// Delay from submission at which this phase runs
    pub fn offset(self, settings: &TradeSettings) -> Duration {
        match self {
            TradePhase::Halt => Duration::ZERO,
            TradePhase::ApplyVolume => settings.volume_delay(),
            TradePhase::PriceImpact => settings.impact_delay(),
            TradePhase::Resume => settings.resume_delay(),
        }
    }
}

/// How the most recent session ended
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Aborted,
}

/// One in-flight trade
struct TradeSession {
    id: Uuid,
    requested_volume_change: i64,
    /// Last phase that finished
    phase: TradePhase,
    task: Option<TaskHandle>,
}

#[derive(Default)]
struct SequencerState {
    session: Option<TradeSession>,
    completed_at: Option<Instant>,
    last_outcome: Option<SessionOutcome>,
}

/// Runs the halt → volume → impact → resume chain for one trade at a time
#[derive(Clone)]
pub struct TradeSequencer {
    ctx: MarketContext,
    price: PriceFluctuationScheduler,
    settings: TradeSettings,
    state: Arc<Mutex<SequencerState>>,
}

impl TradeSequencer {
    pub fn new(
        ctx: MarketContext,
        price: PriceFluctuationScheduler,
        settings: TradeSettings,
    ) -> Self {
        Self {
            ctx,
            price,
            settings,
            state: Arc::new(Mutex::new(SequencerState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SequencerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a trade session
    ///
    /// The halt phase runs before this returns; the remaining phases run on
    /// a timer task. Fails with `TradeInProgress` if a session is active.
    pub fn execute(&self, requested_volume_change: i64) -> Result<Uuid> {
        let mut state = self.lock();
        if state.session.is_some() {
            tracing::warn!("Trade rejected - another session is in progress");
            return Err(MarketError::TradeInProgress);
        }

        let id = Uuid::new_v4();
        let started_at = Instant::now();
        tracing::info!(
            session = %id,
            volume = requested_volume_change,
            "💹 [TRADE] Session started"
        );

        self.halt();

        let sequencer = self.clone();
        let task = TaskHandle::spawn(move |cancel| async move {
            sequencer.run(id, started_at, cancel).await;
        });

        state.session = Some(TradeSession {
            id,
            requested_volume_change,
            phase: TradePhase::Halt,
            task: Some(task),
        });
        Ok(id)
    }

    /// Abort the current session without resuming price updates
    ///
    /// Returns false if no session was active.
    pub fn stop(&self) -> bool {
        let mut state = self.lock();
        let Some(mut session) = state.session.take() else {
            return false;
        };

        if let Some(task) = session.task.take() {
            task.cancel();
        }
        state.last_outcome = Some(SessionOutcome::Aborted);
        drop(state);

        tracing::warn!(
            session = %session.id,
            phase = ?session.phase,
            "Trade session aborted"
        );
        self.ctx.listener.status(SchedulerKind::Trading, "Trade aborted");
        true
    }

    pub fn is_active(&self) -> bool {
        self.lock().session.is_some()
    }

    /// Last finished phase of the active session
    pub fn phase(&self) -> Option<TradePhase> {
        self.lock().session.as_ref().map(|s| s.phase)
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.lock().session.as_ref().map(|s| s.id)
    }

    /// When the most recent session reached its resume phase
    pub fn completed_at(&self) -> Option<Instant> {
        self.lock().completed_at
    }

    pub fn last_outcome(&self) -> Option<SessionOutcome> {
        self.lock().last_outcome
    }

    pub fn settings(&self) -> &TradeSettings {
        &self.settings
    }

    pub fn price_scheduler(&self) -> &PriceFluctuationScheduler {
        &self.price
    }

    async fn run(&self, id: Uuid, started_at: Instant, cancel: CancellationToken) {
        let mut phase = TradePhase::Halt;

        while let Some(next) = phase.next() {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = sleep_until(started_at + next.offset(&self.settings)) => {}
            }

            // Phases run under the session lock so an abort either lands
            // before a phase or after it, never in the middle.
            let mut state = self.lock();
            let Some(session) = state.session.as_mut().filter(|s| s.id == id) else {
                return;
            };
            if cancel.is_cancelled() {
                return;
            }
            let volume = session.requested_volume_change;

            match next {
                TradePhase::Halt => {}
                TradePhase::ApplyVolume => {
                    self.apply_volume(volume);
                    session.phase = next;
                }
                TradePhase::PriceImpact => {
                    self.apply_price_impact(volume);
                    session.phase = next;
                }
                TradePhase::Resume => {
                    state.session = None;
                    state.completed_at = Some(Instant::now());
                    state.last_outcome = Some(SessionOutcome::Completed);
                    // Resume before releasing the lock so a new session
                    // cannot halt prices in between.
                    self.resume();
                    drop(state);

                    tracing::info!(session = %id, "💹 [TRADE] Session completed");
                    return;
                }
            }
            phase = next;
        }
    }

    fn halt(&self) {
        if self.price.is_running() {
            self.price.stop();
        }
        self.ctx
            .listener
            .status(SchedulerKind::Price, "PAUSED (Trading)");
        self.ctx
            .listener
            .status(SchedulerKind::Trading, "Trade in progress");
    }

    /// Spread the requested volume across symbols, each share jittered by
    /// a factor in [0.8, 1.2)
    pub(crate) fn apply_volume(&self, requested_volume_change: i64) -> Vec<MarketRecord> {
        let count = self.ctx.store.len().max(1);
        let per_symbol = requested_volume_change as f64 / count as f64;
        let rng = &self.ctx.rng;

        let updated = self.ctx.store.update_all(|symbol, draft| {
            // The cast saturates for huge requests; the add must too
            let delta = (per_symbol * rng.uniform_range(0.8, 1.2)).round() as i64;
            draft.volume = draft.volume.saturating_add(delta);
            tracing::info!("  Trade volume {}: {:+} shares", symbol, delta);
        });

        self.ctx.listener.display_changed();
        updated
    }

    /// Move prices by the trade's volume impact, capped at ±5%
    pub(crate) fn apply_price_impact(&self, requested_volume_change: i64) -> Vec<MarketRecord> {
        let volume_impact = requested_volume_change as f64 / IMPACT_DIVISOR;
        let rng = &self.ctx.rng;

        let updated = self.ctx.store.update_all(|symbol, draft| {
            let change = (volume_impact * rng.uniform_range(0.5, 1.0))
                .clamp(-MAX_PRICE_IMPACT, MAX_PRICE_IMPACT);
            draft.price *= 1.0 + change;
            tracing::info!("  Trade impact {}: {:+.2}%", symbol, change * 100.0);
        });

        self.ctx.listener.display_changed();
        updated
    }

    fn resume(&self) {
        if !self.price.is_running() {
            self.price.start();
        }
        self.ctx.listener.start_cooldown(self.settings.cooldown());
        self.ctx
            .listener
            .status(SchedulerKind::Trading, "Trade complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::random::testing::FixedRandom;
    use crate::market::MarketDataStore;
    use crate::models::{StockSeed, MAX_VOLUME, MIN_VOLUME};
    use crate::notify::listener::testing::RecordingListener;
    use crate::scheduler::testing::{assert_invariants, fixed_context, seeded_context};
    use crate::settings::PriceSettings;
    use tokio::time::sleep;

    fn sequencer(ctx: MarketContext) -> TradeSequencer {
        let price = PriceFluctuationScheduler::new(ctx.clone(), PriceSettings::default());
        TradeSequencer::new(ctx, price, TradeSettings::default())
    }

    fn volumes(ctx: &MarketContext) -> Vec<i64> {
        ctx.store.snapshot().iter().map(|r| r.volume()).collect()
    }

    fn prices(ctx: &MarketContext) -> Vec<f64> {
        ctx.store.snapshot().iter().map(|r| r.price()).collect()
    }

    #[test]
    fn test_phase_order_and_offsets() {
        let settings = TradeSettings::default();
        let phases: Vec<TradePhase> =
            std::iter::successors(Some(TradePhase::Halt), |p| p.next()).collect();

        assert_eq!(
            phases,
            vec![
                TradePhase::Halt,
                TradePhase::ApplyVolume,
                TradePhase::PriceImpact,
                TradePhase::Resume
            ]
        );
        let offsets: Vec<u64> = phases.iter().map(|p| p.offset(&settings).as_secs()).collect();
        assert_eq!(offsets, vec![0, 2, 5, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_session_with_positive_volume() {
        let (ctx, listener) = seeded_context();
        let sequencer = sequencer(ctx.clone());
        sequencer.price.start();
        sleep(Duration::from_millis(100)).await;

        let volumes_before = volumes(&ctx);
        sequencer.execute(9_000).unwrap();

        // Halt is synchronous
        assert!(!sequencer.price.is_running());
        assert_eq!(sequencer.phase(), Some(TradePhase::Halt));
        assert!(listener
            .statuses(SchedulerKind::Price)
            .contains(&"PAUSED (Trading)".to_string()));

        sleep(Duration::from_millis(2_100)).await;
        assert_eq!(sequencer.phase(), Some(TradePhase::ApplyVolume));
        for (before, after) in volumes_before.iter().zip(volumes(&ctx)) {
            let delta = after - before;
            assert!((2_400..=3_600).contains(&delta), "delta {delta}");
        }

        let prices_before = prices(&ctx);
        sleep(Duration::from_secs(3)).await;
        assert_eq!(sequencer.phase(), Some(TradePhase::PriceImpact));
        for (before, after) in prices_before.iter().zip(prices(&ctx)) {
            let change = (after - before) / before;
            assert!(change.abs() <= 0.05 + 1e-3, "change {change}");
        }

        sleep(Duration::from_secs(5)).await;
        assert!(!sequencer.is_active());
        assert!(sequencer.price.is_running());
        assert_eq!(listener.cooldowns(), vec![Duration::from_secs(20)]);
        assert_eq!(sequencer.last_outcome(), Some(SessionOutcome::Completed));
        assert!(sequencer.completed_at().is_some());
        assert_invariants(&ctx);

        sequencer.price.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_volume_trade_changes_nothing_but_completes() {
        let (ctx, listener) = seeded_context();
        let sequencer = sequencer(ctx.clone());
        let before = ctx.store.snapshot();

        sequencer.execute(0).unwrap();
        sleep(Duration::from_millis(5_100)).await;

        let after = ctx.store.snapshot();
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.volume(), a.volume());
            assert_eq!(b.price(), a.price());
        }

        sleep(Duration::from_secs(5)).await;
        assert!(!sequencer.is_active());
        // Resume starts the price scheduler even if it was idle at halt
        assert!(sequencer.price.is_running());
        assert_eq!(listener.cooldowns().len(), 1);

        sequencer.price.stop();
    }

    #[test]
    fn test_price_impact_is_capped() {
        // 1,000,000 shares => impact 10 * 0.75 = 750%, capped to 5%
        let (ctx, _) = fixed_context(FixedRandom::neutral());
        let sequencer = sequencer(ctx.clone());

        sequencer.apply_price_impact(1_000_000);
        assert_eq!(ctx.store.get("AAPL").unwrap().price(), 157.5);
        assert_eq!(ctx.store.get("MSFT").unwrap().price(), 315.0);

        sequencer.apply_price_impact(-1_000_000);
        assert_eq!(ctx.store.get("GOOGL").unwrap().price(), 2793.0);
    }

    #[test]
    fn test_apply_volume_uses_random_factor() {
        // uniform 0.5 => factor 1.0 exactly
        let (ctx, listener) = fixed_context(FixedRandom::neutral());
        let sequencer = TradeSequencer::new(
            ctx.clone(),
            PriceFluctuationScheduler::new(ctx.clone(), PriceSettings::default()),
            TradeSettings::default(),
        );

        sequencer.apply_volume(-9_000);

        assert_eq!(volumes(&ctx), vec![97_000, 72_000, 117_000]);
        assert_eq!(listener.display_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extreme_volume_on_single_symbol_completes() {
        let listener = Arc::new(RecordingListener::default());
        let store = MarketDataStore::new(&[StockSeed::new("TSLA", "Tesla", 250.0, 50_000)]).unwrap();
        let ctx = MarketContext::new(store, listener.clone(), Arc::new(FixedRandom::neutral()));
        let sequencer = sequencer(ctx.clone());

        sequencer.execute(i64::MAX).unwrap();
        sleep(Duration::from_secs(11)).await;

        // Volume clamps to the ceiling, impact caps at +5%
        let tsla = ctx.store.get("TSLA").unwrap();
        assert_eq!(tsla.volume(), MAX_VOLUME);
        assert_eq!(tsla.price(), 262.5);
        assert!(!sequencer.is_active());
        assert_eq!(sequencer.last_outcome(), Some(SessionOutcome::Completed));
        assert!(sequencer.price.is_running());
        assert_eq!(listener.cooldowns().len(), 1);

        // Saturates the other way as well
        sequencer.apply_volume(i64::MIN);
        assert_eq!(ctx.store.get("TSLA").unwrap().volume(), MIN_VOLUME);
        sequencer.price.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_trade_rejected_while_active() {
        let (ctx, _) = seeded_context();
        let sequencer = sequencer(ctx);

        let first = sequencer.execute(1_000).unwrap();
        assert!(matches!(
            sequencer.execute(2_000),
            Err(MarketError::TradeInProgress)
        ));
        assert_eq!(sequencer.session_id(), Some(first));

        sleep(Duration::from_secs(11)).await;
        assert!(sequencer.execute(2_000).is_ok());
        sequencer.stop();
        sequencer.price.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_without_resume() {
        let (ctx, listener) = seeded_context();
        let sequencer = sequencer(ctx.clone());
        sequencer.price.start();
        sleep(Duration::from_millis(100)).await;

        sequencer.execute(50_000).unwrap();
        sleep(Duration::from_secs(3)).await;
        assert_eq!(sequencer.phase(), Some(TradePhase::ApplyVolume));

        let prices_at_abort = prices(&ctx);
        assert!(sequencer.stop());
        assert!(!sequencer.is_active());
        assert!(!sequencer.stop());

        sleep(Duration::from_secs(20)).await;
        // No impact, no resume, no cooldown
        assert_eq!(prices(&ctx), prices_at_abort);
        assert!(!sequencer.price.is_running());
        assert!(listener.cooldowns().is_empty());
        assert_eq!(sequencer.last_outcome(), Some(SessionOutcome::Aborted));
        assert!(sequencer.completed_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_after_abort_is_independent() {
        let (ctx, listener) = seeded_context();
        let sequencer = sequencer(ctx);

        sequencer.execute(1_000).unwrap();
        sleep(Duration::from_secs(1)).await;
        sequencer.stop();

        sequencer.execute(1_000).unwrap();
        // The aborted session's timers must not advance the new one early
        sleep(Duration::from_millis(1_500)).await;
        assert_eq!(sequencer.phase(), Some(TradePhase::Halt));

        sleep(Duration::from_secs(9)).await;
        assert!(!sequencer.is_active());
        assert_eq!(listener.cooldowns().len(), 1);
        sequencer.price.stop();
    }
}
