// ===============================
// src/prices.rs (price table)
// ===============================
//
// Normalizes raw feed ticks into per-symbol PriceSnapshots. Trend and
// percentage change are computed against the previously stored price;
// a symbol with no prior observation (or a prior price of 0) reports
// change_percent = 0. Entries are overwritten, never deleted.

use ahash::AHashMap;
use std::collections::HashMap;

use crate::domain::{PriceSnapshot, PriceTick, Trend};

#[derive(Debug, Default)]
pub struct PriceBook {
    by_symbol: AHashMap<String, PriceSnapshot>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self { by_symbol: AHashMap::new() }
    }

    /// Ingest one tick: overwrite the stored snapshot and return the new one.
    pub fn ingest(&mut self, tick: &PriceTick) -> PriceSnapshot {
        let (trend, change_percent) = match self.by_symbol.get(&tick.symbol) {
            Some(prior) => {
                let trend = if tick.price > prior.price {
                    Trend::Up
                } else if tick.price < prior.price {
                    Trend::Down
                } else {
                    Trend::Neutral
                };
                let change = if prior.price > 0.0 {
                    (tick.price - prior.price) / prior.price * 100.0
                } else {
                    0.0
                };
                (trend, change)
            }
            None => (Trend::Neutral, 0.0),
        };

        let snap = PriceSnapshot {
            symbol: tick.symbol.clone(),
            price: tick.price,
            change_percent,
            trend,
            observed_at: tick.ts_ms,
        };
        self.by_symbol.insert(tick.symbol.clone(), snap.clone());
        snap
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.by_symbol.get(symbol).map(|s| s.price)
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    /// Clone the table into the wire representation.
    pub fn snapshot_map(&self) -> HashMap<String, PriceSnapshot> {
        self.by_symbol
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tick(symbol: &str, price: f64) -> PriceTick {
        PriceTick { symbol: symbol.to_string(), price, ts_ms: 1_700_000_000_000 }
    }

    #[test]
    fn first_tick_is_neutral_with_zero_change() {
        let mut book = PriceBook::new();
        let snap = book.ingest(&tick("BTCUSDT", 50_000.0));
        assert_eq!(snap.trend, Trend::Neutral);
        assert_relative_eq!(snap.change_percent, 0.0);
        assert_relative_eq!(book.last_price("BTCUSDT").unwrap(), 50_000.0);
    }

    #[test]
    fn rising_price_trends_up_with_percent_change() {
        let mut book = PriceBook::new();
        book.ingest(&tick("BTCUSDT", 50_000.0));
        let snap = book.ingest(&tick("BTCUSDT", 55_000.0));
        assert_eq!(snap.trend, Trend::Up);
        assert_relative_eq!(snap.change_percent, 10.0, max_relative = 1e-12);
    }

    #[test]
    fn falling_price_trends_down() {
        let mut book = PriceBook::new();
        book.ingest(&tick("ETHUSDT", 3_000.0));
        let snap = book.ingest(&tick("ETHUSDT", 2_850.0));
        assert_eq!(snap.trend, Trend::Down);
        assert_relative_eq!(snap.change_percent, -5.0, max_relative = 1e-12);
    }

    #[test]
    fn equal_price_is_neutral() {
        let mut book = PriceBook::new();
        book.ingest(&tick("ADAUSDT", 0.45));
        let snap = book.ingest(&tick("ADAUSDT", 0.45));
        assert_eq!(snap.trend, Trend::Neutral);
        assert_relative_eq!(snap.change_percent, 0.0);
    }

    #[test]
    fn zero_prior_price_guards_division() {
        let mut book = PriceBook::new();
        book.ingest(&tick("SOLUSDT", 0.0));
        let snap = book.ingest(&tick("SOLUSDT", 150.0));
        assert_eq!(snap.trend, Trend::Up);
        assert_relative_eq!(snap.change_percent, 0.0);
    }

    #[test]
    fn snapshot_overwrites_and_table_never_shrinks() {
        let mut book = PriceBook::new();
        book.ingest(&tick("BTCUSDT", 50_000.0));
        book.ingest(&tick("ETHUSDT", 3_000.0));
        book.ingest(&tick("BTCUSDT", 51_000.0));
        assert_eq!(book.len(), 2);
        assert_relative_eq!(book.last_price("BTCUSDT").unwrap(), 51_000.0);
    }
}
