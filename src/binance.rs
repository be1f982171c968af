// ===============================
// src/binance.rs
// ===============================
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

pub fn sign_query(secret: &str, query: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC key");
    mac.update(query.as_bytes());
    let sig = mac.finalize().into_bytes();
    hex::encode(sig)
}

// ---- Minimal market data models ----

/// One row of GET /api/v3/ticker/price (prices arrive as strings).
#[derive(Debug, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: String,
}

/// `<symbol>@ticker` stream frame; we only need symbol and last price.
#[derive(Debug, Deserialize)]
pub struct WsTicker {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub last_price: String,
}

// ---- Minimal account/order models ----

/// Ack for POST /api/v3/order.
#[derive(Debug, Deserialize)]
pub struct OrderAck {
    #[serde(rename = "orderId")]
    pub order_id: u64,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: String,
}
