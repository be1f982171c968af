// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Feed --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "price feed ticks ingested").unwrap());

pub static TICKS_BY_SYMBOL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticks_total_by_symbol", "price feed ticks per symbol"),
        &["symbol"],
    )
    .unwrap()
});

pub static FEED_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("feed_errors_total", "feed transport failures (retried)").unwrap()
});

// -------- Orders --------
pub static ORDERS_FILLED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("orders_filled_total", "executed orders"), &["side"]).unwrap()
});

pub static ORDERS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orders_rejected_total", "rejected orders (label: reason)"),
        &["reason"],
    )
    .unwrap()
});

// -------- Portfolio --------
pub static CASH_BALANCE: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("cash_balance", "cash balance (quote currency)").unwrap());

pub static PORTFOLIO_VALUE: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new("portfolio_value", "cash plus mark-to-market position value").unwrap()
});

pub static TOTAL_PNL: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("total_pnl", "portfolio value minus initial balance").unwrap());

pub static POSITION_QTY: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("position_qty", "open quantity per symbol"), &["symbol"]).unwrap()
});

// -------- Broadcast --------
pub static SNAPSHOTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("snapshots_total", "snapshot envelopes published").unwrap());

pub static WS_SUBSCRIBERS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("ws_subscribers", "connected snapshot subscribers").unwrap());

// ---- Config visibility (feed mode / symbols) ----
pub static CONFIG_FEED_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_feed_mode", "feed mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_symbol", "configured symbols (label: symbol)"),
        &["symbol"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(TICKS_BY_SYMBOL.clone())),
        REGISTRY.register(Box::new(FEED_ERRORS.clone())),
        REGISTRY.register(Box::new(ORDERS_FILLED.clone())),
        REGISTRY.register(Box::new(ORDERS_REJECTED.clone())),
        REGISTRY.register(Box::new(CASH_BALANCE.clone())),
        REGISTRY.register(Box::new(PORTFOLIO_VALUE.clone())),
        REGISTRY.register(Box::new(TOTAL_PNL.clone())),
        REGISTRY.register(Box::new(POSITION_QTY.clone())),
        REGISTRY.register(Box::new(SNAPSHOTS.clone())),
        REGISTRY.register(Box::new(WS_SUBSCRIBERS.clone())),
        REGISTRY.register(Box::new(CONFIG_FEED_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_SYMBOL.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr)
            .unwrap_or_else(|e| panic!("metrics bind {} failed: {}", addr, e));
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {}", e),
            }
        }
    });
}
