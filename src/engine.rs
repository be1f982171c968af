// ===============================
// src/engine.rs (single-writer state task)
// ===============================
//
// One task owns the combined mutable state: price table + ledger. Feed
// ticks, order placements and query reads all arrive as commands on one
// mpsc channel, so no reader can ever observe a half-applied mutation.
// Every state change publishes a fresh SnapshotEnvelope on a watch
// channel; subscribers always see the latest consistent view and slow
// consumers simply skip intermediate frames.

use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::domain::{
    BroadcastStatus, Event, ExecutionReceipt, Order, OrderRequest, Position, PriceSnapshot,
    PriceTick, Side, SnapshotEnvelope,
};
use crate::ledger::{Ledger, TradeError};
use crate::metrics::{
    CASH_BALANCE, FEED_ERRORS, ORDERS_FILLED, ORDERS_REJECTED, PORTFOLIO_VALUE, POSITION_QTY,
    SNAPSHOTS, TICKS, TICKS_BY_SYMBOL, TOTAL_PNL,
};
use crate::prices::PriceBook;
use crate::valuation;

#[derive(Debug)]
pub enum Command {
    /// One feed cycle worth of ticks, applied together, broadcast once.
    Ticks(Vec<PriceTick>),
    /// Feed transport failure: broadcast a degraded envelope, keep prices.
    FeedFailure(String),
    PlaceOrder {
        req: OrderRequest,
        resp: oneshot::Sender<Result<ExecutionReceipt, TradeError>>,
    },
    Balance { resp: oneshot::Sender<BalanceReport> },
    Prices { resp: oneshot::Sender<HashMap<String, PriceSnapshot>> },
    Positions { resp: oneshot::Sender<HashMap<String, Position>> },
    RecentOrders { limit: usize, resp: oneshot::Sender<Vec<Order>> },
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BalanceReport {
    pub balance: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
}

pub struct Engine {
    prices: PriceBook,
    ledger: Ledger,
    snap_tx: watch::Sender<SnapshotEnvelope>,
    rec_tx: Option<mpsc::Sender<Event>>,
}

impl Engine {
    pub fn new(
        initial_balance: f64,
        history_cap: usize,
        snap_tx: watch::Sender<SnapshotEnvelope>,
        rec_tx: Option<mpsc::Sender<Event>>,
    ) -> Self {
        Self {
            prices: PriceBook::new(),
            ledger: Ledger::new(initial_balance, history_cap),
            snap_tx,
            rec_tx,
        }
    }

    pub fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Ticks(batch) => {
                for tick in &batch {
                    let snap = self.prices.ingest(tick);
                    TICKS.inc();
                    TICKS_BY_SYMBOL.with_label_values(&[&snap.symbol]).inc();
                    self.record(Event::Tick(snap));
                }
                if !batch.is_empty() {
                    debug!(tracked = self.prices.len(), "tick batch applied");
                    self.publish(BroadcastStatus::Live, None);
                }
            }
            Command::FeedFailure(reason) => {
                FEED_ERRORS.inc();
                warn!(%reason, "feed failure, broadcasting degraded snapshot");
                self.record(Event::Note(format!("feed failure: {reason}")));
                self.publish(BroadcastStatus::Error, Some(reason));
            }
            Command::PlaceOrder { req, resp } => {
                let result = self.execute(&req);
                match &result {
                    Ok(receipt) => {
                        ORDERS_FILLED.with_label_values(&[req.side.as_str()]).inc();
                        info!(
                            order_id = %receipt.order_id,
                            symbol = %req.symbol,
                            side = %req.side.as_str(),
                            qty = req.quantity,
                            px = receipt.execution_price,
                            "order filled"
                        );
                        self.publish(BroadcastStatus::Live, None);
                    }
                    Err(e) => {
                        ORDERS_REJECTED.with_label_values(&[e.metric_label()]).inc();
                        warn!(symbol = %req.symbol, reason = %e, "order rejected");
                    }
                }
                let _ = resp.send(result);
            }
            Command::Balance { resp } => {
                let v = valuation::assess(&self.ledger, &self.prices);
                let _ = resp.send(BalanceReport {
                    balance: self.ledger.cash_balance(),
                    pnl: v.total_pnl,
                    pnl_percent: v.pnl_percent,
                });
            }
            Command::Prices { resp } => {
                let _ = resp.send(self.prices.snapshot_map());
            }
            Command::Positions { resp } => {
                let _ = resp.send(self.ledger.positions().clone());
            }
            Command::RecentOrders { limit, resp } => {
                let _ = resp.send(self.ledger.recent_orders(limit));
            }
        }
    }

    fn execute(&mut self, req: &OrderRequest) -> Result<ExecutionReceipt, TradeError> {
        let price = self
            .prices
            .last_price(&req.symbol)
            .ok_or_else(|| TradeError::NoPrice(req.symbol.clone()))?;

        let order = match req.side {
            Side::Buy => self.ledger.buy(&req.symbol, req.quantity, price)?,
            Side::Sell => self.ledger.sell(&req.symbol, req.quantity, price)?,
        };
        if self.ledger.position(&req.symbol).is_none() {
            POSITION_QTY.with_label_values(&[&req.symbol]).set(0.0);
        }
        self.record(Event::Ord(order.clone()));

        Ok(ExecutionReceipt {
            order_id: order.id,
            execution_price: price,
            new_balance: self.ledger.cash_balance(),
        })
    }

    fn publish(&self, status: BroadcastStatus, error: Option<String>) {
        let v = valuation::assess(&self.ledger, &self.prices);

        CASH_BALANCE.set(self.ledger.cash_balance());
        PORTFOLIO_VALUE.set(v.portfolio_value);
        TOTAL_PNL.set(v.total_pnl);
        for (symbol, pos) in self.ledger.positions() {
            POSITION_QTY.with_label_values(&[symbol]).set(pos.quantity);
        }

        let envelope = SnapshotEnvelope {
            prices: self.prices.snapshot_map(),
            balance: self.ledger.cash_balance(),
            portfolio_value: v.portfolio_value,
            pnl: v.total_pnl,
            pnl_percent: v.pnl_percent,
            positions: self.ledger.positions().clone(),
            timestamp: Utc::now().format("%H:%M:%S").to_string(),
            status,
            error,
        };
        SNAPSHOTS.inc();
        let _ = self.snap_tx.send(envelope);
    }

    fn record(&self, event: Event) {
        if let Some(tx) = &self.rec_tx {
            let _ = tx.try_send(event);
        }
    }
}

pub async fn run(mut cmd_rx: mpsc::Receiver<Command>, mut engine: Engine) {
    info!("engine started");
    while let Some(cmd) = cmd_rx.recv().await {
        engine.handle(cmd);
    }
    info!("engine stopped: command channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tick(symbol: &str, price: f64) -> PriceTick {
        PriceTick { symbol: symbol.to_string(), price, ts_ms: 0 }
    }

    fn engine() -> (Engine, watch::Receiver<SnapshotEnvelope>) {
        let (snap_tx, snap_rx) = watch::channel(SnapshotEnvelope::initial(10_000.0));
        (Engine::new(10_000.0, 50, snap_tx, None), snap_rx)
    }

    fn place(engine: &mut Engine, symbol: &str, side: Side, quantity: f64)
        -> Result<ExecutionReceipt, TradeError>
    {
        let (tx, mut rx) = oneshot::channel();
        engine.handle(Command::PlaceOrder {
            req: OrderRequest { symbol: symbol.to_string(), side, quantity },
            resp: tx,
        });
        rx.try_recv().expect("engine always replies")
    }

    #[test]
    fn tick_batch_publishes_live_snapshot() {
        let (mut e, rx) = engine();
        e.handle(Command::Ticks(vec![tick("BTCUSDT", 50_000.0), tick("ETHUSDT", 3_000.0)]));
        let snap = rx.borrow().clone();
        assert_eq!(snap.status, BroadcastStatus::Live);
        assert_eq!(snap.prices.len(), 2);
        assert_relative_eq!(snap.portfolio_value, 10_000.0);
    }

    #[test]
    fn order_without_price_is_rejected_and_not_broadcast() {
        let (mut e, rx) = engine();
        let err = place(&mut e, "BTCUSDT", Side::Buy, 0.1).unwrap_err();
        assert_eq!(err, TradeError::NoPrice("BTCUSDT".to_string()));
        // envelope untouched: still the initial CONNECTED frame
        assert_eq!(rx.borrow().status, BroadcastStatus::Connected);
    }

    #[test]
    fn accepted_order_publishes_exactly_one_snapshot() {
        let (mut e, mut rx) = engine();
        e.handle(Command::Ticks(vec![tick("BTCUSDT", 50_000.0)]));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        let receipt = place(&mut e, "BTCUSDT", Side::Buy, 0.1).unwrap();
        assert_relative_eq!(receipt.execution_price, 50_000.0);
        assert_relative_eq!(receipt.new_balance, 5_000.0);

        assert!(rx.has_changed().unwrap());
        let snap = rx.borrow_and_update().clone();
        assert!(!rx.has_changed().unwrap());
        assert_relative_eq!(snap.balance, 5_000.0);
        assert_relative_eq!(snap.positions.get("BTCUSDT").unwrap().quantity, 0.1);
    }

    #[test]
    fn snapshot_value_tracks_price_moves() {
        let (mut e, rx) = engine();
        e.handle(Command::Ticks(vec![tick("BTCUSDT", 50_000.0)]));
        place(&mut e, "BTCUSDT", Side::Buy, 0.1).unwrap();
        e.handle(Command::Ticks(vec![tick("BTCUSDT", 55_000.0)]));

        let snap = rx.borrow().clone();
        assert_relative_eq!(snap.portfolio_value, 10_500.0, max_relative = 1e-12);
        assert_relative_eq!(snap.pnl, 500.0, max_relative = 1e-9);
        assert_relative_eq!(snap.pnl_percent, 5.0, max_relative = 1e-9);
    }

    #[test]
    fn feed_failure_degrades_status_but_keeps_prices() {
        let (mut e, rx) = engine();
        e.handle(Command::Ticks(vec![tick("BTCUSDT", 50_000.0)]));
        e.handle(Command::FeedFailure("connection reset".to_string()));

        let snap = rx.borrow().clone();
        assert_eq!(snap.status, BroadcastStatus::Error);
        assert_eq!(snap.error.as_deref(), Some("connection reset"));
        assert_relative_eq!(snap.prices.get("BTCUSDT").unwrap().price, 50_000.0);
    }

    #[test]
    fn queries_read_consistent_state() {
        let (mut e, _rx) = engine();
        e.handle(Command::Ticks(vec![tick("ETHUSDT", 3_000.0)]));
        place(&mut e, "ETHUSDT", Side::Buy, 2.0).unwrap();

        let (tx, mut rx) = oneshot::channel();
        e.handle(Command::Balance { resp: tx });
        let report = rx.try_recv().unwrap();
        assert_relative_eq!(report.balance, 4_000.0);
        assert_relative_eq!(report.pnl, 0.0, epsilon = 1e-9);

        let (tx, mut rx) = oneshot::channel();
        e.handle(Command::RecentOrders { limit: 20, resp: tx });
        let orders = rx.try_recv().unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].symbol, "ETHUSDT");
    }
}
