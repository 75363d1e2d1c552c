use thiserror::Error;

/// Errors surfaced by the market core
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("invalid trade volume {0:?}: expected a signed integer")]
    InvalidInput(String),

    #[error("a trade is already in progress")]
    TradeInProgress,

    #[error("trading is cooling down ({remaining_secs}s remaining)")]
    CooldownActive { remaining_secs: u64 },

    #[error("market has no symbols")]
    EmptyMarket,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
