// ===============================
// src/exchange.rs (live venue capability)
// ===============================
//
// Abstract order-execution capability for real trading, kept fully
// separate from the simulated ledger. The Binance implementation signs
// requests with HMAC-SHA256 and talks to the Spot REST API; auth
// failures (401/403) and other API errors are surfaced to the caller
// and never retried here.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::binance::{sign_query, timestamp_ms, AccountInfo, OrderAck};
use crate::domain::Side;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("exchange authentication failed: {0}")]
    Auth(String),
    #[error("exchange api error: {0}")]
    Api(String),
}

/// Receipt for an order accepted by the venue.
#[derive(Debug, Clone, Serialize)]
pub struct VenueReceipt {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
}

#[allow(async_fn_in_trait)]
pub trait ExchangeClient {
    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
    ) -> Result<VenueReceipt, ExchangeError>;

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
    ) -> Result<VenueReceipt, ExchangeError>;

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        stop_price: f64,
        limit_price: f64,
    ) -> Result<VenueReceipt, ExchangeError>;

    async fn get_balance(&self) -> Result<f64, ExchangeError>;
}

pub struct BinanceExchange {
    http: reqwest::Client,
    rest_base: String,
    api_key: String,
    api_secret: String,
    recv_window: u64,
}

impl BinanceExchange {
    pub fn new(rest_base: String, api_key: String, api_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            rest_base,
            api_key,
            api_secret,
            recv_window: 5000,
        }
    }

    fn signed_url(&self, path: &str, params: &[(String, String)]) -> String {
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let sig = sign_query(&self.api_secret, &query);
        format!(
            "{}{}?{}&signature={}",
            self.rest_base.trim_end_matches('/'),
            path,
            query,
            sig
        )
    }

    async fn submit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        extra: Vec<(String, String)>,
    ) -> Result<VenueReceipt, ExchangeError> {
        let symbol_up = symbol.to_ascii_uppercase();
        let mut params = vec![
            ("symbol".to_string(), symbol_up.clone()),
            ("side".to_string(), side.as_str().to_string()),
            ("quantity".to_string(), format!("{quantity}")),
        ];
        params.extend(extra);
        params.push(("timestamp".to_string(), timestamp_ms().to_string()));
        params.push(("recvWindow".to_string(), self.recv_window.to_string()));

        let url = self.signed_url("/api/v3/order", &params);
        let resp = self
            .http
            .post(url)
            .header("X-MBX-APIKEY", &self.api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ExchangeError::Api(format!("order send failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            error!(%status, %body, "order auth failure");
            return Err(ExchangeError::Auth(body));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(%status, %body, "order rejected by venue");
            return Err(ExchangeError::Api(body));
        }

        let ack: OrderAck = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Api(format!("bad order ack: {e}")))?;
        info!(
            order_id = ack.order_id,
            status = ack.status.as_deref().unwrap_or("?"),
            %symbol_up,
            side = %side.as_str(),
            "venue order accepted"
        );

        Ok(VenueReceipt {
            order_id: ack.order_id.to_string(),
            symbol: symbol_up,
            side,
            quantity,
        })
    }
}

impl ExchangeClient for BinanceExchange {
    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
    ) -> Result<VenueReceipt, ExchangeError> {
        self.submit_order(
            symbol,
            side,
            quantity,
            vec![("type".to_string(), "MARKET".to_string())],
        )
        .await
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
    ) -> Result<VenueReceipt, ExchangeError> {
        self.submit_order(
            symbol,
            side,
            quantity,
            vec![
                ("type".to_string(), "LIMIT".to_string()),
                ("timeInForce".to_string(), "GTC".to_string()),
                ("price".to_string(), format!("{price}")),
            ],
        )
        .await
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        stop_price: f64,
        limit_price: f64,
    ) -> Result<VenueReceipt, ExchangeError> {
        self.submit_order(
            symbol,
            side,
            quantity,
            vec![
                ("type".to_string(), "STOP_LOSS_LIMIT".to_string()),
                ("timeInForce".to_string(), "GTC".to_string()),
                ("stopPrice".to_string(), format!("{stop_price}")),
                ("price".to_string(), format!("{limit_price}")),
            ],
        )
        .await
    }

    /// Free USDT balance of the spot account.
    async fn get_balance(&self) -> Result<f64, ExchangeError> {
        let params = vec![
            ("timestamp".to_string(), timestamp_ms().to_string()),
            ("recvWindow".to_string(), self.recv_window.to_string()),
        ];
        let url = self.signed_url("/api/v3/account", &params);
        let resp = self
            .http
            .get(url)
            .header("X-MBX-APIKEY", &self.api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ExchangeError::Api(format!("account request failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ExchangeError::Auth(resp.text().await.unwrap_or_default()));
        }
        if !status.is_success() {
            return Err(ExchangeError::Api(resp.text().await.unwrap_or_default()));
        }

        let account: AccountInfo = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Api(format!("bad account payload: {e}")))?;
        let usdt = account
            .balances
            .iter()
            .find(|b| b.asset == "USDT")
            .and_then(|b| b.free.parse::<f64>().ok())
            .unwrap_or(0.0);
        Ok(usdt)
    }
}
