// User-triggered trade execution
pub mod desk;
pub mod sequencer;

pub use desk::{parse_trade_volume, TradingDesk};
pub use sequencer::{SessionOutcome, TradePhase, TradeSequencer};
