// ===============================
// src/ledger.rs (cash, positions, order history)
// ===============================
//
// Single owner of the simulated account: cash balance, open positions with
// weighted-average cost basis, and a bounded FIFO order history. All checks
// happen before any mutation, so a rejected operation leaves the ledger
// untouched. Callers resolve the execution price before invoking buy/sell;
// the ledger itself never looks at the price table.

use chrono::Utc;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

use crate::domain::{Order, OrderStatus, Position, Side};

pub const DEFAULT_HISTORY_CAP: usize = 50;

#[derive(Debug, Error, PartialEq)]
pub enum TradeError {
    #[error("insufficient balance: order value {needed:.2} exceeds cash {available:.2}")]
    InsufficientBalance { needed: f64, available: f64 },
    #[error("insufficient position: requested {requested} {symbol}, holding {held}")]
    InsufficientPosition { symbol: String, requested: f64, held: f64 },
    #[error("no price observed yet for {0}")]
    NoPrice(String),
}

impl TradeError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            TradeError::InsufficientBalance { .. } => "insufficient_balance",
            TradeError::InsufficientPosition { .. } => "insufficient_position",
            TradeError::NoPrice(_) => "no_price",
        }
    }
}

#[derive(Debug)]
pub struct Ledger {
    cash_balance: f64,
    initial_balance: f64,
    positions: HashMap<String, Position>,
    order_history: VecDeque<Order>,
    history_cap: usize,
}

impl Ledger {
    pub fn new(initial_balance: f64, history_cap: usize) -> Self {
        Self {
            cash_balance: initial_balance,
            initial_balance,
            positions: HashMap::new(),
            order_history: VecDeque::new(),
            history_cap,
        }
    }

    pub fn cash_balance(&self) -> f64 {
        self.cash_balance
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn history_len(&self) -> usize {
        self.order_history.len()
    }

    /// Most recent `limit` orders, oldest of them first.
    pub fn recent_orders(&self, limit: usize) -> Vec<Order> {
        let skip = self.order_history.len().saturating_sub(limit);
        self.order_history.iter().skip(skip).cloned().collect()
    }

    /// Debit cash and open or grow a position at weighted-average cost.
    pub fn buy(&mut self, symbol: &str, quantity: f64, price: f64) -> Result<Order, TradeError> {
        let order_value = quantity * price;
        if order_value > self.cash_balance {
            return Err(TradeError::InsufficientBalance {
                needed: order_value,
                available: self.cash_balance,
            });
        }

        self.cash_balance -= order_value;
        match self.positions.get_mut(symbol) {
            Some(pos) => {
                pos.quantity += quantity;
                pos.cost_basis += order_value;
                pos.avg_price = pos.cost_basis / pos.quantity;
            }
            None => {
                self.positions.insert(
                    symbol.to_string(),
                    Position { quantity, cost_basis: order_value, avg_price: price },
                );
            }
        }

        Ok(self.record(symbol, Side::Buy, quantity, price))
    }

    /// Credit cash and shrink or close a position. Cost basis is reduced by
    /// the fraction of the quantity sold, so the average price of whatever
    /// remains is unchanged.
    pub fn sell(&mut self, symbol: &str, quantity: f64, price: f64) -> Result<Order, TradeError> {
        let held = self.positions.get(symbol).map(|p| p.quantity).unwrap_or(0.0);
        if held < quantity {
            return Err(TradeError::InsufficientPosition {
                symbol: symbol.to_string(),
                requested: quantity,
                held,
            });
        }

        self.cash_balance += quantity * price;
        if let Some(pos) = self.positions.get_mut(symbol) {
            let qty_before = pos.quantity;
            pos.cost_basis -= pos.cost_basis * quantity / qty_before;
            pos.quantity -= quantity;
            if pos.quantity <= 0.0 {
                self.positions.remove(symbol);
            }
        }

        Ok(self.record(symbol, Side::Sell, quantity, price))
    }

    fn record(&mut self, symbol: &str, side: Side, quantity: f64, price: f64) -> Order {
        let now_ms = Utc::now().timestamp_millis();
        let order = Order {
            id: format!("ORD-{}-{}", now_ms, rand::thread_rng().gen::<u32>()),
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            value: quantity * price,
            filled_at: now_ms,
            status: OrderStatus::Filled,
        };
        self.order_history.push_back(order.clone());
        while self.order_history.len() > self.history_cap {
            self.order_history.pop_front();
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ledger() -> Ledger {
        Ledger::new(10_000.0, DEFAULT_HISTORY_CAP)
    }

    #[test]
    fn buy_debits_cash_and_opens_position() {
        let mut l = ledger();
        let order = l.buy("BTCUSDT", 0.1, 50_000.0).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_relative_eq!(l.cash_balance(), 5_000.0);
        let pos = l.position("BTCUSDT").unwrap();
        assert_relative_eq!(pos.quantity, 0.1);
        assert_relative_eq!(pos.avg_price, 50_000.0);
        assert_relative_eq!(pos.cost_basis, 5_000.0);
    }

    #[test]
    fn buy_merges_at_weighted_average_cost() {
        let mut l = ledger();
        l.buy("BTCUSDT", 0.1, 50_000.0).unwrap();
        l.buy("BTCUSDT", 0.1, 40_000.0).unwrap();
        let pos = l.position("BTCUSDT").unwrap();
        assert_relative_eq!(pos.quantity, 0.2, max_relative = 1e-12);
        assert_relative_eq!(pos.cost_basis, 9_000.0, max_relative = 1e-12);
        assert_relative_eq!(pos.avg_price, 45_000.0, max_relative = 1e-12);
    }

    #[test]
    fn buy_rejected_when_value_exceeds_cash_leaves_state_unchanged() {
        let mut l = ledger();
        let err = l.buy("BTCUSDT", 1.0, 20_000.0).unwrap_err();
        assert_eq!(
            err,
            TradeError::InsufficientBalance { needed: 20_000.0, available: 10_000.0 }
        );
        assert_relative_eq!(l.cash_balance(), 10_000.0);
        assert!(l.position("BTCUSDT").is_none());
        assert_eq!(l.history_len(), 0);
    }

    #[test]
    fn sell_without_position_is_rejected() {
        let mut l = ledger();
        let err = l.sell("ETHUSDT", 1.0, 3_000.0).unwrap_err();
        assert_eq!(
            err,
            TradeError::InsufficientPosition {
                symbol: "ETHUSDT".to_string(),
                requested: 1.0,
                held: 0.0
            }
        );
        assert_relative_eq!(l.cash_balance(), 10_000.0);
    }

    #[test]
    fn oversell_is_rejected_and_state_unchanged() {
        let mut l = ledger();
        l.buy("ETHUSDT", 1.0, 3_000.0).unwrap();
        let cash_before = l.cash_balance();
        let err = l.sell("ETHUSDT", 2.0, 3_000.0).unwrap_err();
        assert!(matches!(err, TradeError::InsufficientPosition { .. }));
        assert_relative_eq!(l.cash_balance(), cash_before);
        assert_relative_eq!(l.position("ETHUSDT").unwrap().quantity, 1.0);
    }

    #[test]
    fn round_trip_restores_balance_and_closes_position() {
        let mut l = ledger();
        l.buy("BTCUSDT", 0.2, 48_000.0).unwrap();
        l.sell("BTCUSDT", 0.2, 48_000.0).unwrap();
        assert_relative_eq!(l.cash_balance(), 10_000.0, max_relative = 1e-12);
        assert!(l.position("BTCUSDT").is_none());
    }

    #[test]
    fn partial_sell_preserves_average_price() {
        let mut l = ledger();
        l.buy("BTCUSDT", 0.1, 50_000.0).unwrap();
        l.sell("BTCUSDT", 0.05, 55_000.0).unwrap();
        let pos = l.position("BTCUSDT").unwrap();
        assert_relative_eq!(pos.quantity, 0.05, max_relative = 1e-12);
        assert_relative_eq!(pos.avg_price, 50_000.0, max_relative = 1e-9);
        assert_relative_eq!(pos.cost_basis, 2_500.0, max_relative = 1e-9);
    }

    #[test]
    fn value_is_conserved_across_operations() {
        // cash + cost basis of holdings must always equal initial cash plus
        // realized proceeds minus realized cost, i.e. nothing leaks.
        let mut l = ledger();
        l.buy("BTCUSDT", 0.1, 50_000.0).unwrap();
        l.buy("ETHUSDT", 1.0, 3_000.0).unwrap();
        l.sell("BTCUSDT", 0.04, 52_000.0).unwrap();
        l.buy("BTCUSDT", 0.02, 51_000.0).unwrap();
        l.sell("ETHUSDT", 1.0, 2_900.0).unwrap();

        let signed_flow: f64 = l
            .recent_orders(DEFAULT_HISTORY_CAP)
            .iter()
            .map(|o| match o.side {
                Side::Buy => -o.value,
                Side::Sell => o.value,
            })
            .sum();
        let cost_held: f64 = l.positions().values().map(|p| p.cost_basis).sum();

        assert_relative_eq!(l.cash_balance(), 10_000.0 + signed_flow, max_relative = 1e-9);
        // remaining BTC: 0.1 - 0.04 + 0.02 at cost 5000*0.6 + 1020
        assert_relative_eq!(cost_held, 4_020.0, max_relative = 1e-9);
    }

    #[test]
    fn history_is_capped_fifo() {
        let mut l = Ledger::new(1_000_000.0, 5);
        for i in 0..8 {
            l.buy("ADAUSDT", 1.0, 1.0 + i as f64).unwrap();
        }
        assert_eq!(l.history_len(), 5);
        let recent = l.recent_orders(5);
        // oldest three evicted: prices 1..=3 gone, 4..=8 kept in order
        assert_relative_eq!(recent.first().unwrap().price, 4.0);
        assert_relative_eq!(recent.last().unwrap().price, 8.0);
    }

    #[test]
    fn recent_orders_returns_most_recent_last() {
        let mut l = ledger();
        l.buy("BTCUSDT", 0.01, 50_000.0).unwrap();
        l.buy("ETHUSDT", 0.1, 3_000.0).unwrap();
        l.sell("BTCUSDT", 0.01, 51_000.0).unwrap();
        let recent = l.recent_orders(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].symbol, "ETHUSDT");
        assert_eq!(recent[1].symbol, "BTCUSDT");
        assert_eq!(recent[1].side, Side::Sell);
    }

    #[test]
    fn reference_scenario_end_to_end() {
        // initial 10000; buy 0.1 BTC @ 50000; sell 0.05 @ 55000; then an
        // 8000-value buy must bounce off a 7750 balance.
        let mut l = ledger();
        l.buy("BTCUSDT", 0.1, 50_000.0).unwrap();
        assert_relative_eq!(l.cash_balance(), 5_000.0);
        assert_relative_eq!(l.position("BTCUSDT").unwrap().avg_price, 50_000.0);

        l.sell("BTCUSDT", 0.05, 55_000.0).unwrap();
        assert_relative_eq!(l.cash_balance(), 7_750.0, max_relative = 1e-12);
        let pos = l.position("BTCUSDT").unwrap();
        assert_relative_eq!(pos.quantity, 0.05, max_relative = 1e-12);
        assert_relative_eq!(pos.avg_price, 50_000.0, max_relative = 1e-9);

        let err = l.buy("BTCUSDT", 0.16, 50_000.0).unwrap_err();
        assert!(matches!(err, TradeError::InsufficientBalance { .. }));
        assert_relative_eq!(l.cash_balance(), 7_750.0, max_relative = 1e-12);
        assert_relative_eq!(l.position("BTCUSDT").unwrap().quantity, 0.05, max_relative = 1e-12);
    }

    #[test]
    fn tiny_remainder_keeps_average_price_stable() {
        // float drift check at very small remaining quantities
        let mut l = ledger();
        l.buy("BTCUSDT", 1.0, 30_000.0).unwrap();
        for _ in 0..9 {
            l.sell("BTCUSDT", 0.1, 31_000.0).unwrap();
        }
        let pos = l.position("BTCUSDT").unwrap();
        assert_relative_eq!(pos.avg_price, 30_000.0, max_relative = 1e-6);
    }
}
