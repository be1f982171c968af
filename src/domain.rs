// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side { Buy, Sell }

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self { Side::Buy => "BUY", Side::Sell => "SELL" }
    }
    pub fn opposite(&self) -> Side {
        match self { Side::Buy => Side::Sell, Side::Sell => Side::Buy }
    }
}

impl std::str::FromStr for Side {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            _ => Err(()),
        }
    }
}

/// Direction of the last observed price move for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend { Up, Down, Neutral }

/// One externally observed price update. Timestamps are unix millis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick { pub symbol: String, pub price: f64, pub ts_ms: i64 }

/// Latest normalized view of a symbol, overwritten on every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub price: f64,
    pub change_percent: f64,
    pub trend: Trend,
    pub observed_at: i64,
}

/// Open holding for one symbol. Exists only while quantity > 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub quantity: f64,
    pub cost_basis: f64,
    pub avg_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus { Filled, Rejected }

/// Immutable execution record, kept in a bounded FIFO history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub value: f64,
    pub filled_at: i64,
    pub status: OrderStatus,
}

/// Validated inbound order request (gateway -> engine).
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
}

/// Reply for an accepted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub order_id: String,
    pub execution_price: f64,
    pub new_balance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BroadcastStatus { Connected, Live, Error }

/// Wire form pushed to every subscriber: full portfolio state plus a
/// human-readable timestamp and a health tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub prices: HashMap<String, PriceSnapshot>,
    pub balance: f64,
    pub portfolio_value: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub positions: HashMap<String, Position>,
    pub timestamp: String,
    pub status: BroadcastStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SnapshotEnvelope {
    /// State of a freshly constructed session: no prices, no positions.
    pub fn initial(balance: f64) -> Self {
        Self {
            prices: HashMap::new(),
            balance,
            portfolio_value: balance,
            pnl: 0.0,
            pnl_percent: 0.0,
            positions: HashMap::new(),
            timestamp: String::new(),
            status: BroadcastStatus::Connected,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event { Tick(PriceSnapshot), Ord(Order), Note(String) }
