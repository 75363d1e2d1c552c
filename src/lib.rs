// Core modules
pub mod error;
pub mod market;
pub mod models;
pub mod notify;
pub mod scheduler;
pub mod settings;
pub mod simulation;
pub mod trading;

// Re-export commonly used types
pub use error::MarketError;
pub use market::MarketDataStore;
pub use models::*;
pub use notify::{ChannelListener, MarketListener, MarketNotification};
pub use settings::SimulationConfig;
pub use simulation::MarketSimulation;

// Error handling
pub type Result<T> = std::result::Result<T, MarketError>;
