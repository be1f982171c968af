// ===============================
// src/main.rs
// ===============================
/*
=============================================================================
Project : paper_trader_rust — simulated live-trading portfolio engine
Module  : main.rs
Version : 0.3.0
License : MIT (see LICENSE)

Summary : Streams live or mock market data, maintains a cash ledger with
          cost-basis positions, values the portfolio mark-to-market, pushes
          state snapshots to WebSocket subscribers, serves an HTTP order
          gateway, exposes Prometheus metrics, and records JSONL events.
=============================================================================
*/
mod domain;
mod config;
mod metrics;
mod recorder;
mod prices;
mod ledger;
mod valuation;
mod engine;
mod feed;
mod broadcaster;
mod gateway;          // HTTP order gateway + query endpoints
mod binance;          // wire models + request signing for Binance
mod exchange;         // live venue capability (consumed by slicers)
mod advanced;         // TWAP / grid / OCO helpers over the capability

use std::time::Duration;
use tokio::{
    select,
    sync::{mpsc, watch},
};
use tracing::info;

use crate::domain::{Event, SnapshotEnvelope};

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    // ---- Load config ----
    let args = config::load();

    // One-shot live order placement (no engine, no servers)
    if let Some(config::CliCommand::Live(order)) = args.command.clone() {
        run_live_order(order, &args.binance_rest_url).await;
        return;
    }

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    // ---- Human-friendly startup info + export config to metrics ----
    info!(
        feed_mode = %args.feed_mode.as_str(),
        symbols = ?args.symbols,
        initial_balance = args.initial_balance,
        api_port = args.api_port,
        ws_port = args.ws_port,
        "startup config"
    );
    metrics::CONFIG_FEED_MODE
        .with_label_values(&[args.feed_mode.as_str()])
        .set(1);
    for s in &args.symbols {
        metrics::CONFIG_SYMBOL.with_label_values(&[s]).set(1);
    }

    // ---- Buses ----
    let (cmd_tx, cmd_rx) = mpsc::channel::<engine::Command>(2048);
    let (snap_tx, snap_rx) =
        watch::channel::<SnapshotEnvelope>(SnapshotEnvelope::initial(args.initial_balance));

    // ---- Recorder (optional) ----
    let rec_tx = args.record_file.clone().map(|path| {
        let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
        tokio::spawn(recorder::run(rec_rx, path));
        rec_tx
    });

    // ---- Engine (single owner of prices + ledger) ----
    let core = engine::Engine::new(
        args.initial_balance,
        args.order_history_cap,
        snap_tx,
        rec_tx,
    );
    tokio::spawn(engine::run(cmd_rx, core));

    // ---- FEED (Market Data) ----
    match args.feed_mode {
        config::FeedMode::Mock => {
            tokio::spawn(feed::run_mock(
                cmd_tx.clone(),
                args.symbols.clone(),
                Duration::from_secs(args.poll_secs),
            ));
        }
        config::FeedMode::BinancePoll => {
            tokio::spawn(feed::run_binance_poll(
                cmd_tx.clone(),
                args.symbols.clone(),
                args.binance_rest_url.clone(),
                Duration::from_secs(args.poll_secs),
                Duration::from_secs(args.error_backoff_secs),
            ));
        }
        config::FeedMode::BinanceStream => {
            for sym in args.symbols.iter().cloned() {
                let tx = cmd_tx.clone();
                let base = args.binance_ws_url.clone();
                tokio::spawn(async move {
                    feed::run_binance_stream(tx, sym, base).await;
                });
            }
        }
    }

    // ---- Snapshot broadcast (WS) ----
    tokio::spawn(broadcaster::serve(args.ws_port, snap_rx.clone()));

    // ---- Order gateway (HTTP) ----
    tokio::spawn(gateway::serve(args.api_port, cmd_tx.clone()));

    // ---- Heartbeat ----
    let mut snap_rx_hb = snap_rx;
    let mut published: u64 = 0;
    loop {
        select! {
            changed = snap_rx_hb.changed() => {
                if changed.is_err() {
                    tracing::error!("engine stopped publishing, shutting down");
                    break;
                }
                published += 1;
                snap_rx_hb.borrow_and_update();
            },
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                info!(snapshots = published, "heartbeat");
                published = 0;
            }
        }
    }
}

/// One-shot order against the live venue, then exit. Credentials come from
/// the environment; a missing flag for the chosen order type is a usage
/// error, not a venue error.
async fn run_live_order(order: config::LiveOrder, rest_base: &str) {
    use crate::domain::Side;
    use crate::exchange::{BinanceExchange, ExchangeClient};

    let api_key = match std::env::var("BINANCE_API_KEY") {
        Ok(k) => k,
        Err(_) => {
            tracing::error!("BINANCE_API_KEY missing");
            return;
        }
    };
    let api_secret = match std::env::var("BINANCE_API_SECRET") {
        Ok(s) => s,
        Err(_) => {
            tracing::error!("BINANCE_API_SECRET missing");
            return;
        }
    };
    let side: Side = match order.side.parse() {
        Ok(s) => s,
        Err(()) => {
            tracing::error!(side = %order.side, "side must be BUY or SELL");
            return;
        }
    };

    let client = BinanceExchange::new(rest_base.to_string(), api_key, api_secret);
    match client.get_balance().await {
        Ok(balance) => info!(balance, "venue balance"),
        Err(e) => {
            tracing::error!(%e, "balance check failed");
            return;
        }
    }

    let symbol = order.symbol.to_ascii_uppercase();
    match order.order_type.to_ascii_lowercase().as_str() {
        "market" => match client.place_market_order(&symbol, side, order.quantity).await {
            Ok(r) => info!(order_id = %r.order_id, "market order placed"),
            Err(e) => tracing::error!(%e, "market order failed"),
        },
        "limit" => {
            let Some(price) = order.price else {
                tracing::error!("--price required for limit orders");
                return;
            };
            match client.place_limit_order(&symbol, side, order.quantity, price).await {
                Ok(r) => info!(order_id = %r.order_id, "limit order placed"),
                Err(e) => tracing::error!(%e, "limit order failed"),
            }
        }
        "stop" => {
            let (Some(stop_price), Some(price)) = (order.stop_price, order.price) else {
                tracing::error!("--stop-price and --price required for stop orders");
                return;
            };
            match client
                .place_stop_order(&symbol, side, order.quantity, stop_price, price)
                .await
            {
                Ok(r) => info!(order_id = %r.order_id, "stop order placed"),
                Err(e) => tracing::error!(%e, "stop order failed"),
            }
        }
        "twap" => {
            let interval = Duration::from_secs(order.interval_secs);
            match advanced::twap(&client, &symbol, side, order.quantity, order.slices, interval)
                .await
            {
                Ok(rs) => info!(fills = rs.len(), "twap complete"),
                Err(e) => tracing::error!(%e, "twap aborted"),
            }
        }
        "grid" => {
            let (Some(low), Some(high)) = (order.price_low, order.price_high) else {
                tracing::error!("--price-low and --price-high required for grid orders");
                return;
            };
            match advanced::grid(&client, &symbol, order.quantity, low, high, order.levels).await {
                Ok(rs) => info!(levels = rs.len(), "grid placed"),
                Err(e) => tracing::error!(%e, "grid aborted"),
            }
        }
        "oco" => {
            let (Some(tp), Some(sl)) = (order.take_profit, order.stop_loss) else {
                tracing::error!("--take-profit and --stop-loss required for oco orders");
                return;
            };
            match advanced::oco(&client, &symbol, side, order.quantity, tp, sl).await {
                Ok((tp_r, sl_r)) => {
                    info!(tp_id = %tp_r.order_id, sl_id = %sl_r.order_id, "oco pair placed")
                }
                Err(e) => tracing::error!(%e, "oco failed"),
            }
        }
        other => tracing::error!(order_type = %other, "unknown order type"),
    }
}
