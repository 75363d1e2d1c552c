// Shared market state and randomness
pub mod random;
pub mod store;

pub use random::{RandomSource, SeededRandom};
pub use store::MarketDataStore;
