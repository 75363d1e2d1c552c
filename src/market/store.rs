use crate::error::MarketError;
use crate::models::{MarketRecord, RecordUpdate, StockSeed};
use crate::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Thread-safe owner of every symbol's market record
///
/// All writes funnel through [`MarketDataStore::update`] or
/// [`MarketDataStore::update_all`]; both hold the store lock for the whole
/// read-modify-write and re-normalize the record before releasing it.
#[derive(Clone)]
pub struct MarketDataStore {
    records: Arc<Mutex<HashMap<String, MarketRecord>>>,
}

impl MarketDataStore {
    /// Create a store from initial listings
    pub fn new(seeds: &[StockSeed]) -> Result<Self> {
        if seeds.is_empty() {
            return Err(MarketError::EmptyMarket);
        }

        let records = seeds
            .iter()
            .map(|seed| (seed.symbol.clone(), MarketRecord::from_seed(seed)))
            .collect();

        Ok(Self {
            records: Arc::new(Mutex::new(records)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MarketRecord>> {
        // A panicking mutator never leaves a half-written record behind:
        // the draft is only applied after the closure returns.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a copy of one symbol's record
    pub fn get(&self, symbol: &str) -> Result<MarketRecord> {
        self.lock()
            .get(symbol)
            .cloned()
            .ok_or_else(|| MarketError::UnknownSymbol(symbol.to_string()))
    }

    /// Atomically read-modify-write one symbol
    ///
    /// The mutator sees the current price and volume; the result is rounded
    /// and clamped before being stored and returned.
    pub fn update<F>(&self, symbol: &str, mutator: F) -> Result<MarketRecord>
    where
        F: FnOnce(&mut RecordUpdate),
    {
        let mut records = self.lock();
        let record = records
            .get_mut(symbol)
            .ok_or_else(|| MarketError::UnknownSymbol(symbol.to_string()))?;

        let mut draft = record.draft();
        mutator(&mut draft);
        record.apply(draft);

        Ok(record.clone())
    }

    /// Apply a mutator to every symbol in one critical section
    ///
    /// Iteration order across symbols is unspecified. Returns the updated
    /// records.
    pub fn update_all<F>(&self, mut mutator: F) -> Vec<MarketRecord>
    where
        F: FnMut(&str, &mut RecordUpdate),
    {
        let mut records = self.lock();
        let mut updated = Vec::with_capacity(records.len());

        for (symbol, record) in records.iter_mut() {
            let mut draft = record.draft();
            mutator(symbol, &mut draft);
            record.apply(draft);
            updated.push(record.clone());
        }

        updated
    }

    /// Visit every record without modifying it
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&MarketRecord),
    {
        for record in self.lock().values() {
            visit(record);
        }
    }

    /// All records sorted by symbol
    pub fn snapshot(&self) -> Vec<MarketRecord> {
        let mut records: Vec<MarketRecord> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| a.symbol().cmp(b.symbol()));
        records
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn volumes(&self) -> HashMap<String, i64> {
        self.lock()
            .iter()
            .map(|(symbol, record)| (symbol.clone(), record.volume()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
