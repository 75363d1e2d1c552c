use crate::market::{MarketDataStore, RandomSource, SeededRandom};
use crate::notify::MarketListener;
use crate::scheduler::{
    MarketContext, MarketEventScheduler, PriceFluctuationScheduler, VolumeDriftScheduler,
};
use crate::settings::SimulationConfig;
use crate::trading::{TradeSequencer, TradingDesk};
use crate::Result;
use std::sync::Arc;

/// Fully wired market: store, the three periodic schedulers and the
/// trading desk, all sharing one context
pub struct MarketSimulation {
    ctx: MarketContext,
    pub price: PriceFluctuationScheduler,
    pub events: MarketEventScheduler,
    pub volume: VolumeDriftScheduler,
    pub desk: TradingDesk,
}

impl MarketSimulation {
    pub fn new(config: &SimulationConfig, listener: Arc<dyn MarketListener>) -> Result<Self> {
        let rng: Arc<dyn RandomSource> = match config.seed {
            Some(seed) => {
                tracing::info!("Using fixed RNG seed {}", seed);
                Arc::new(SeededRandom::new(seed))
            }
            None => Arc::new(SeededRandom::from_entropy()),
        };
        Self::with_random(config, listener, rng)
    }

    /// Build with an explicit random source
    pub fn with_random(
        config: &SimulationConfig,
        listener: Arc<dyn MarketListener>,
        rng: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        config.validate()?;
        let store = MarketDataStore::new(&config.stocks)?;
        let ctx = MarketContext::new(store, listener, rng);

        let price = PriceFluctuationScheduler::new(ctx.clone(), config.price.clone());
        let events = MarketEventScheduler::new(ctx.clone(), config.events.clone());
        let volume = VolumeDriftScheduler::new(ctx.clone(), config.volume.clone());
        let sequencer = TradeSequencer::new(ctx.clone(), price.clone(), config.trading.clone());

        Ok(Self {
            ctx,
            price,
            events,
            volume,
            desk: TradingDesk::new(sequencer),
        })
    }

    pub fn store(&self) -> &MarketDataStore {
        &self.ctx.store
    }

    /// Start all periodic schedulers (must be called inside a tokio runtime)
    pub fn start_all(&self) {
        self.price.start();
        self.events.start();
        self.volume.start();
    }

    /// Abort any trade and stop every scheduler
    pub fn stop_all(&self) {
        self.desk.abort();
        self.price.stop();
        self.events.stop();
        self.volume.stop();
    }
}
