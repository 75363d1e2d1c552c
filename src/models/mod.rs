use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_VOLUME: i64 = 10_000;
pub const MAX_VOLUME: i64 = 500_000;
pub const MIN_PRICE: f64 = 0.01;

/// Initial listing of a tradable instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockSeed {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub volume: i64,
}

impl StockSeed {
    pub fn new(symbol: &str, name: &str, price: f64, volume: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            price,
            volume,
        }
    }
}

/// Current market state of one symbol
///
/// Fields are read-only outside the store; every write goes through
/// `MarketDataStore::update`, which re-normalizes price and volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketRecord {
    symbol: String,
    name: String,
    price: f64,
    volume: i64,
    updated_at: DateTime<Utc>,
}

impl MarketRecord {
    pub(crate) fn from_seed(seed: &StockSeed) -> Self {
        Self {
            symbol: seed.symbol.clone(),
            name: seed.name.clone(),
            price: normalize_price(seed.price),
            volume: clamp_volume(seed.volume),
            updated_at: Utc::now(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn volume(&self) -> i64 {
        self.volume
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub(crate) fn draft(&self) -> RecordUpdate {
        RecordUpdate {
            price: self.price,
            volume: self.volume,
        }
    }

    pub(crate) fn apply(&mut self, update: RecordUpdate) {
        self.price = normalize_price(update.price);
        self.volume = clamp_volume(update.volume);
        self.updated_at = Utc::now();
    }
}

/// Mutable view handed to store mutators
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordUpdate {
    pub price: f64,
    pub volume: i64,
}

/// Round to cents and keep the price strictly positive
pub fn normalize_price(price: f64) -> f64 {
    if !price.is_finite() {
        return MIN_PRICE;
    }
    let rounded = (price * 100.0).round() / 100.0;
    rounded.max(MIN_PRICE)
}

pub fn clamp_volume(volume: i64) -> i64 {
    volume.clamp(MIN_VOLUME, MAX_VOLUME)
}

/// Which scheduler a status notification came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SchedulerKind {
    Price,
    Events,
    Volume,
    Trading,
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SchedulerKind::Price => "price",
            SchedulerKind::Events => "events",
            SchedulerKind::Volume => "volume",
            SchedulerKind::Trading => "trading",
        };
        f.write_str(label)
    }
}

/// Named market-wide event with its rationale
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct MarketEventKind {
    pub name: &'static str,
    pub rationale: &'static str,
}

pub const EVENT_CATALOG: [MarketEventKind; 5] = [
    MarketEventKind {
        name: "Federal Reserve announcement",
        rationale: "Rate guidance moves money in and out of equities",
    },
    MarketEventKind {
        name: "Major earnings report",
        rationale: "Results reprice large caps across the index",
    },
    MarketEventKind {
        name: "Geopolitical tensions",
        rationale: "Risk appetite shifts with headlines from abroad",
    },
    MarketEventKind {
        name: "Oil price surge",
        rationale: "Energy costs feed into margins sector-wide",
    },
    MarketEventKind {
        name: "Tech sector news",
        rationale: "Sentiment on tech spills over to the whole market",
    },
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventDirection {
    Positive,
    Negative,
}

/// One fired market event
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MarketEvent {
    pub sequence: u32,
    pub kind: MarketEventKind,
    pub direction: EventDirection,
    pub volume_delta: i64,
    pub fired_at: DateTime<Utc>,
}
