use crate::error::MarketError;
use crate::models::StockSeed;
use crate::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "market";
const ENV_PREFIX: &str = "MARKET";

/// Top-level simulation configuration
///
/// Layered as: built-in defaults, then an optional TOML file, then
/// `MARKET__SECTION__KEY` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fixed RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
    pub log_filter: String,
    pub stocks: Vec<StockSeed>,
    pub price: PriceSettings,
    pub events: EventSettings,
    pub volume: VolumeSettings,
    pub trading: TradeSettings,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            log_filter: "stockmarket=info".to_string(),
            stocks: vec![
                StockSeed::new("AAPL", "Apple", 150.0, 100_000),
                StockSeed::new("GOOGL", "Google", 2800.0, 75_000),
                StockSeed::new("MSFT", "Microsoft", 300.0, 120_000),
            ],
            price: PriceSettings::default(),
            events: EventSettings::default(),
            volume: VolumeSettings::default(),
            trading: TradeSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PriceSettings {
    pub interval_secs: u64,
    /// Standard deviation of the per-tick percentage change
    pub volatility: f64,
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            volatility: 0.03,
        }
    }
}

impl PriceSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventSettings {
    pub spacing_secs: u64,
    pub count: u32,
    /// Extra random delay (0..jitter) added to each offset
    pub jitter_secs: u64,
    pub positive_volume: i64,
    pub negative_volume: i64,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            spacing_secs: 20,
            count: 5,
            jitter_secs: 0,
            positive_volume: 20_000,
            negative_volume: -15_000,
        }
    }
}

impl EventSettings {
    pub fn spacing(&self) -> Duration {
        Duration::from_secs(self.spacing_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VolumeSettings {
    pub initial_delay_secs: u64,
    pub interval_secs: u64,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: 5,
            interval_secs: 15,
        }
    }
}

impl VolumeSettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Phase offsets of a trade session, relative to submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TradeSettings {
    pub volume_delay_secs: u64,
    pub impact_delay_secs: u64,
    pub resume_delay_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for TradeSettings {
    fn default() -> Self {
        Self {
            volume_delay_secs: 2,
            impact_delay_secs: 5,
            resume_delay_secs: 10,
            cooldown_secs: 20,
        }
    }
}

impl TradeSettings {
    pub fn volume_delay(&self) -> Duration {
        Duration::from_secs(self.volume_delay_secs)
    }

    pub fn impact_delay(&self) -> Duration {
        Duration::from_secs(self.impact_delay_secs)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_secs(self.resume_delay_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl SimulationConfig {
    /// Load configuration from defaults, file and environment
    ///
    /// # Arguments
    /// * `path` - Explicit config file (must exist). If None, `market.toml`
    ///   in the working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: SimulationConfig = Config::builder()
            .add_source(Config::try_from(&SimulationConfig::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the schedulers cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.stocks.is_empty() {
            return Err(MarketError::EmptyMarket);
        }

        let mut seen = HashSet::new();
        for stock in &self.stocks {
            if !seen.insert(stock.symbol.as_str()) {
                return Err(MarketError::InvalidConfig(format!(
                    "duplicate symbol {}",
                    stock.symbol
                )));
            }
            if stock.price.is_nan() || stock.price <= 0.0 {
                return Err(MarketError::InvalidConfig(format!(
                    "{} must have a positive price",
                    stock.symbol
                )));
            }
        }

        if self.price.interval_secs == 0 || self.volume.interval_secs == 0 {
            return Err(MarketError::InvalidConfig(
                "scheduler intervals must be non-zero".to_string(),
            ));
        }
        if self.events.spacing_secs == 0 {
            return Err(MarketError::InvalidConfig(
                "event spacing must be non-zero".to_string(),
            ));
        }
        if self.events.count == 0 {
            return Err(MarketError::InvalidConfig(
                "event count must be non-zero".to_string(),
            ));
        }

        let t = &self.trading;
        if !(t.volume_delay_secs < t.impact_delay_secs && t.impact_delay_secs < t.resume_delay_secs)
        {
            return Err(MarketError::InvalidConfig(
                "trade phase offsets must be strictly increasing".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = SimulationConfig::default();

        assert_eq!(config.price.interval(), Duration::from_secs(2));
        assert_eq!(config.price.volatility, 0.03);
        assert_eq!(config.events.count, 5);
        assert_eq!(config.events.spacing(), Duration::from_secs(20));
        assert_eq!(config.volume.initial_delay(), Duration::from_secs(5));
        assert_eq!(config.volume.interval(), Duration::from_secs(15));
        assert_eq!(config.trading.cooldown(), Duration::from_secs(20));
        assert_eq!(config.stocks.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = SimulationConfig::load(None).unwrap();
        assert_eq!(config.stocks[0].symbol, "AAPL");
        assert_eq!(config.trading.resume_delay_secs, 10);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let result = SimulationConfig::load(Some(Path::new("/nonexistent/market.toml")));
        assert!(matches!(result, Err(MarketError::Config(_))));
    }

    #[test]
    fn test_validate_duplicate_symbol() {
        let mut config = SimulationConfig::default();
        config.stocks.push(StockSeed::new("AAPL", "Apple again", 10.0, 20_000));

        assert!(matches!(config.validate(), Err(MarketError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_non_positive_price() {
        let mut config = SimulationConfig::default();
        config.stocks[1].price = 0.0;

        assert!(matches!(config.validate(), Err(MarketError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_zero_event_count() {
        let mut config = SimulationConfig::default();
        config.events.count = 0;

        assert!(matches!(config.validate(), Err(MarketError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_phase_order() {
        let mut config = SimulationConfig::default();
        config.trading.impact_delay_secs = 12;

        assert!(matches!(config.validate(), Err(MarketError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_empty_market() {
        let mut config = SimulationConfig::default();
        config.stocks.clear();

        assert!(matches!(config.validate(), Err(MarketError::EmptyMarket)));
    }
}
