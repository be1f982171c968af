// ===============================
// src/feed.rs
// ===============================
//
// Market data transports, all normalizing into Command::Ticks batches:
// - run_mock           : random-walk generator, one batch per cycle
// - run_binance_poll   : REST snapshot of all tracked symbols per cycle
// - run_binance_stream : per-symbol @ticker WebSocket push
//
// Transport failures never kill the task: they are reported to the engine
// as Command::FeedFailure (so subscribers see an ERROR envelope) and the
// loop retries after a backoff, longer than the normal cycle delay.

use chrono::Utc;
use futures_util::StreamExt; // for .next()
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};
use url::Url;

use crate::binance::{TickerPrice, WsTicker};
use crate::domain::PriceTick;
use crate::engine::Command;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Mock market data: a gentle random walk per symbol, batched like a poll.
pub async fn run_mock(cmd_tx: mpsc::Sender<Command>, symbols: Vec<String>, cycle: Duration) {
    info!(?symbols, "mock feed started");
    let mut px: Vec<f64> = symbols
        .iter()
        .enumerate()
        .map(|(i, _)| 100.0 * (i as f64 + 1.0))
        .collect();

    loop {
        // don't keep ThreadRng across an .await
        let batch: Vec<PriceTick> = {
            let mut rng = rand::thread_rng();
            symbols
                .iter()
                .zip(px.iter_mut())
                .map(|(sym, p)| {
                    *p = (*p * (1.0 + rng.gen_range(-0.004..=0.004))).max(0.01);
                    PriceTick { symbol: sym.clone(), price: *p, ts_ms: now_ms() }
                })
                .collect()
        };
        if cmd_tx.send(Command::Ticks(batch)).await.is_err() {
            return; // engine gone
        }
        sleep(cycle).await;
    }
}

/// Poll the full Binance ticker snapshot and keep only tracked symbols.
pub async fn run_binance_poll(
    cmd_tx: mpsc::Sender<Command>,
    symbols: Vec<String>,
    rest_base: String,
    cycle: Duration,
    error_backoff: Duration,
) {
    let url = format!("{}/api/v3/ticker/price", rest_base.trim_end_matches('/'));
    info!(%url, ?symbols, "polling feed started");
    let http = reqwest::Client::new();

    loop {
        match fetch_snapshot(&http, &url, &symbols).await {
            Ok(batch) => {
                if cmd_tx.send(Command::Ticks(batch)).await.is_err() {
                    return;
                }
                sleep(cycle).await;
            }
            Err(e) => {
                error!(%e, "poll cycle failed");
                if cmd_tx.send(Command::FeedFailure(e)).await.is_err() {
                    return;
                }
                sleep(error_backoff).await;
            }
        }
    }
}

async fn fetch_snapshot(
    http: &reqwest::Client,
    url: &str,
    symbols: &[String],
) -> Result<Vec<PriceTick>, String> {
    let resp = http
        .get(url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    if !resp.status().is_success() {
        return Err(format!("ticker endpoint returned {}", resp.status()));
    }
    let tickers: Vec<TickerPrice> = resp
        .json()
        .await
        .map_err(|e| format!("bad ticker payload: {e}"))?;

    let ts = now_ms();
    let batch: Vec<PriceTick> = tickers
        .into_iter()
        .filter(|t| symbols.iter().any(|s| s == &t.symbol))
        .filter_map(|t| {
            let price = t.price.parse::<f64>().ok()?;
            Some(PriceTick { symbol: t.symbol, price, ts_ms: ts })
        })
        .collect();

    if batch.is_empty() {
        return Err("ticker snapshot contained none of the tracked symbols".to_string());
    }
    Ok(batch)
}

/// Streaming adapter for one symbol (`<sym>@ticker`), reconnecting forever
/// with exponential backoff + jitter.
pub async fn run_binance_stream(cmd_tx: mpsc::Sender<Command>, symbol: String, ws_base: String) {
    let topic = format!("{}@ticker", symbol.to_lowercase());
    let ws_url = format!("{}/{}", ws_base.trim_end_matches('/'), topic);

    let mut attempt: u32 = 0;
    loop {
        let url = match Url::parse(&ws_url) {
            Ok(u) => u,
            Err(e) => {
                error!(?e, %ws_url, "bad ws url");
                return;
            }
        };

        info!(%ws_url, "connecting ticker stream");
        match connect_async(url).await {
            Ok((mut ws, _resp)) => {
                info!(%symbol, "ticker stream connected");
                attempt = 0; // reset backoff

                while let Some(frame) = ws.next().await {
                    match frame {
                        Ok(m) if m.is_text() => {
                            let txt = match m.into_text() {
                                Ok(t) => t,
                                Err(e) => {
                                    warn!(?e, "failed to read text frame");
                                    continue;
                                }
                            };
                            if let Ok(t) = serde_json::from_str::<WsTicker>(&txt) {
                                if let Ok(price) = t.last_price.parse::<f64>() {
                                    if price > 0.0 {
                                        let tick = PriceTick {
                                            symbol: t.symbol,
                                            price,
                                            ts_ms: now_ms(),
                                        };
                                        if cmd_tx.send(Command::Ticks(vec![tick])).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                        Ok(_) => {
                            // ignore non-text frames
                        }
                        Err(e) => {
                            error!(?e, "ws read error");
                            break;
                        }
                    }
                }
                warn!(%symbol, "ticker stream disconnected, will reconnect");
            }
            Err(e) => {
                error!(?e, "connect failed");
            }
        }

        let _ = cmd_tx
            .send(Command::FeedFailure(format!("{symbol} stream disconnected")))
            .await;

        // Exponential backoff + jitter
        attempt = attempt.saturating_add(1);
        let shift = attempt.min(6);                  // 0..=6
        let factor = 1u64 << shift;                  // 1,2,4,...,64
        let base_ms = 500u64.saturating_mul(factor); // 0.5s..32s
        let jitter = rand::thread_rng().gen_range(0..=250);
        sleep(Duration::from_millis(base_ms + jitter)).await;
    }
}
