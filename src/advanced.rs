// ===============================
// src/advanced.rs (TWAP / grid / OCO slicers)
// ===============================
//
// Chunking helpers over the ExchangeClient capability. Slices already
// accepted by the venue are NOT rolled back when a later slice fails;
// the error carries how far execution got and the caller decides what
// to do with the partial fill. This is a documented limitation of the
// slicing model, not something these helpers try to hide.

use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info};

use crate::domain::Side;
use crate::exchange::{ExchangeClient, ExchangeError, VenueReceipt};

#[derive(Debug, Error)]
#[error("slice {failed_slice} of {total_slices} failed after {completed} fills: {source}")]
pub struct SliceError {
    pub failed_slice: u32,
    pub total_slices: u32,
    pub completed: usize,
    #[source]
    pub source: ExchangeError,
}

/// Split one large order into `slices` equal market orders, one every
/// `interval`. No delay after the last slice.
pub async fn twap<E: ExchangeClient>(
    client: &E,
    symbol: &str,
    side: Side,
    total_quantity: f64,
    slices: u32,
    interval: Duration,
) -> Result<Vec<VenueReceipt>, SliceError> {
    let qty_per_slice = total_quantity / slices as f64;
    info!(%symbol, side = %side.as_str(), total_quantity, slices, "twap started");

    let mut receipts = Vec::with_capacity(slices as usize);
    for i in 0..slices {
        match client.place_market_order(symbol, side, qty_per_slice).await {
            Ok(r) => {
                info!(slice = i + 1, slices, order_id = %r.order_id, "twap slice filled");
                receipts.push(r);
            }
            Err(e) => {
                error!(slice = i + 1, slices, %e, "twap slice failed, stopping");
                return Err(SliceError {
                    failed_slice: i + 1,
                    total_slices: slices,
                    completed: receipts.len(),
                    source: e,
                });
            }
        }
        if i + 1 < slices {
            sleep(interval).await;
        }
    }
    Ok(receipts)
}

/// Ladder of limit orders evenly spaced across [price_low, price_high]:
/// the lower half of the levels buys, the upper half sells.
pub async fn grid<E: ExchangeClient>(
    client: &E,
    symbol: &str,
    quantity_per_level: f64,
    price_low: f64,
    price_high: f64,
    levels: u32,
) -> Result<Vec<VenueReceipt>, SliceError> {
    let price_step = (price_high - price_low) / (levels - 1) as f64;
    info!(%symbol, price_low, price_high, levels, "grid started");

    let mut receipts = Vec::with_capacity(levels as usize);
    for i in 0..levels {
        let price = price_low + i as f64 * price_step;
        let side = if i < levels / 2 { Side::Buy } else { Side::Sell };
        match client.place_limit_order(symbol, side, quantity_per_level, price).await {
            Ok(r) => receipts.push(r),
            Err(e) => {
                error!(level = i + 1, levels, %e, "grid level failed, stopping");
                return Err(SliceError {
                    failed_slice: i + 1,
                    total_slices: levels,
                    completed: receipts.len(),
                    source: e,
                });
            }
        }
    }
    Ok(receipts)
}

/// Simulated OCO: a take-profit limit order and a stop order, both on the
/// side opposite the entry. The pair is not linked at the venue.
pub async fn oco<E: ExchangeClient>(
    client: &E,
    symbol: &str,
    entry_side: Side,
    quantity: f64,
    take_profit_price: f64,
    stop_loss_price: f64,
) -> Result<(VenueReceipt, VenueReceipt), ExchangeError> {
    let exit_side = entry_side.opposite();
    let tp = client
        .place_limit_order(symbol, exit_side, quantity, take_profit_price)
        .await?;
    let sl = client
        .place_stop_order(symbol, exit_side, quantity, stop_loss_price, stop_loss_price)
        .await?;
    info!(%symbol, tp_id = %tp.order_id, sl_id = %sl.order_id, "oco pair placed");
    Ok((tp, sl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Market { side: Side, qty: f64 },
        Limit { side: Side, qty: f64, price: f64 },
        Stop { side: Side, qty: f64, stop: f64 },
    }

    #[derive(Default)]
    struct MockExchange {
        calls: Mutex<Vec<Call>>,
        fail_from_call: Option<usize>,
    }

    impl MockExchange {
        fn failing_from(call_index: usize) -> Self {
            Self { calls: Mutex::new(Vec::new()), fail_from_call: Some(call_index) }
        }

        fn push(&self, call: Call) -> Result<VenueReceipt, ExchangeError> {
            let mut calls = self.calls.lock().unwrap();
            if let Some(n) = self.fail_from_call {
                if calls.len() >= n {
                    return Err(ExchangeError::Api("venue down".to_string()));
                }
            }
            calls.push(call);
            Ok(VenueReceipt {
                order_id: format!("MOCK-{}", calls.len()),
                symbol: "BTCUSDT".to_string(),
                side: Side::Buy,
                quantity: 0.0,
            })
        }
    }

    impl ExchangeClient for MockExchange {
        async fn place_market_order(
            &self,
            _symbol: &str,
            side: Side,
            quantity: f64,
        ) -> Result<VenueReceipt, ExchangeError> {
            self.push(Call::Market { side, qty: quantity })
        }

        async fn place_limit_order(
            &self,
            _symbol: &str,
            side: Side,
            quantity: f64,
            price: f64,
        ) -> Result<VenueReceipt, ExchangeError> {
            self.push(Call::Limit { side, qty: quantity, price })
        }

        async fn place_stop_order(
            &self,
            _symbol: &str,
            side: Side,
            quantity: f64,
            stop_price: f64,
            _limit_price: f64,
        ) -> Result<VenueReceipt, ExchangeError> {
            self.push(Call::Stop { side, qty: quantity, stop: stop_price })
        }

        async fn get_balance(&self) -> Result<f64, ExchangeError> {
            Ok(10_000.0)
        }
    }

    #[tokio::test]
    async fn twap_splits_evenly_across_slices() {
        let mock = MockExchange::default();
        let receipts = twap(&mock, "BTCUSDT", Side::Buy, 1.0, 4, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(receipts.len(), 4);

        let calls = mock.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        for call in calls.iter() {
            match call {
                Call::Market { side, qty } => {
                    assert_eq!(*side, Side::Buy);
                    assert_relative_eq!(*qty, 0.25, max_relative = 1e-12);
                }
                other => panic!("unexpected call {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn twap_stops_on_failure_without_rollback() {
        let mock = MockExchange::failing_from(2);
        let err = twap(&mock, "BTCUSDT", Side::Sell, 1.0, 5, Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.failed_slice, 3);
        assert_eq!(err.completed, 2);
        // the two accepted slices stand
        assert_eq!(mock.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn grid_buys_low_half_sells_high_half() {
        let mock = MockExchange::default();
        grid(&mock, "ETHUSDT", 0.5, 100.0, 140.0, 5).await.unwrap();

        let calls = mock.calls.lock().unwrap();
        let expected = [
            (Side::Buy, 100.0),
            (Side::Buy, 110.0),
            (Side::Sell, 120.0),
            (Side::Sell, 130.0),
            (Side::Sell, 140.0),
        ];
        assert_eq!(calls.len(), expected.len());
        for (call, (side, price)) in calls.iter().zip(expected) {
            match call {
                Call::Limit { side: s, qty, price: p } => {
                    assert_eq!(*s, side);
                    assert_relative_eq!(*qty, 0.5);
                    assert_relative_eq!(*p, price, max_relative = 1e-12);
                }
                other => panic!("unexpected call {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn oco_places_opposite_side_pair() {
        let mock = MockExchange::default();
        let (tp, sl) = oco(&mock, "BTCUSDT", Side::Buy, 0.1, 60_000.0, 45_000.0)
            .await
            .unwrap();
        assert_ne!(tp.order_id, sl.order_id);

        let calls = mock.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            Call::Limit { side: Side::Sell, qty: 0.1, price: 60_000.0 }
        );
        assert_eq!(calls[1], Call::Stop { side: Side::Sell, qty: 0.1, stop: 45_000.0 });
    }
}
