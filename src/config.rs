// ===============================
// src/config.rs
// ===============================
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::env;

/// Market data transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedMode {
    Mock,
    BinancePoll,
    BinanceStream,
}

impl FeedMode {
    pub fn parse_one(s: &str) -> Option<FeedMode> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Some(FeedMode::Mock),
            "binance_poll" | "poll" => Some(FeedMode::BinancePoll),
            "binance_stream" | "stream" => Some(FeedMode::BinanceStream),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Mock => "mock",
            FeedMode::BinancePoll => "binance_poll",
            FeedMode::BinanceStream => "binance_stream",
        }
    }

    // Endpoint defaults (overridable via BINANCE_REST_URL / BINANCE_WS_URL)
    pub fn default_rest_url(&self) -> &'static str {
        "https://api.binance.com"
    }

    pub fn default_ws_url(&self) -> &'static str {
        "wss://stream.binance.com:9443/ws"
    }
}

#[derive(Parser, Debug)]
#[command(name = "paper_trader_rust", about = "simulated live-trading portfolio engine")]
struct Cli {
    /// Comma separated symbol list, e.g. BTCUSDT,ETHUSDT
    #[arg(long)]
    symbols: Option<String>,
    /// mock | binance_poll | binance_stream
    #[arg(long)]
    feed_mode: Option<String>,
    /// Starting cash balance (quote currency)
    #[arg(long)]
    initial_balance: Option<f64>,
    #[arg(long)]
    api_port: Option<u16>,
    #[arg(long)]
    ws_port: Option<u16>,
    #[arg(long)]
    metrics_port: Option<u16>,
    /// JSONL event log path (also via RECORD_FILE)
    #[arg(long)]
    record_file: Option<String>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// Place one order against the live venue and exit
    /// (needs BINANCE_API_KEY / BINANCE_API_SECRET)
    Live(LiveOrder),
}

#[derive(clap::Args, Debug, Clone)]
pub struct LiveOrder {
    #[arg(long)]
    pub symbol: String,
    /// BUY or SELL
    #[arg(long)]
    pub side: String,
    #[arg(long)]
    pub quantity: f64,
    /// market | limit | stop | twap | grid | oco
    #[arg(long, default_value = "market")]
    pub order_type: String,
    /// Limit price (limit/stop)
    #[arg(long)]
    pub price: Option<f64>,
    /// Trigger price (stop)
    #[arg(long)]
    pub stop_price: Option<f64>,
    /// TWAP slice count
    #[arg(long, default_value_t = 10)]
    pub slices: u32,
    /// TWAP inter-slice delay
    #[arg(long, default_value_t = 30)]
    pub interval_secs: u64,
    /// Grid level count
    #[arg(long, default_value_t = 5)]
    pub levels: u32,
    #[arg(long)]
    pub price_low: Option<f64>,
    #[arg(long)]
    pub price_high: Option<f64>,
    /// OCO take-profit price
    #[arg(long)]
    pub take_profit: Option<f64>,
    /// OCO stop-loss price
    #[arg(long)]
    pub stop_loss: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct Args {
    pub symbols: Vec<String>,
    pub initial_balance: f64,
    pub order_history_cap: usize,

    // ports
    pub api_port: u16,
    pub ws_port: u16,
    pub metrics_port: u16,

    // feed
    pub feed_mode: FeedMode,
    pub binance_rest_url: String,
    pub binance_ws_url: String,
    pub poll_secs: u64,
    pub error_backoff_secs: u64,

    pub record_file: Option<String>,

    pub command: Option<CliCommand>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

pub fn load() -> Args {
    // Read .env first so RECORD_FILE, SYMBOLS, etc. are visible
    let _ = dotenv();
    let cli = Cli::parse();

    // Symbols: CLI > SYMBOLS env > default tracked set
    let raw_symbols = cli
        .symbols
        .or_else(|| env::var("SYMBOLS").ok())
        .unwrap_or_else(|| "BTCUSDT,ETHUSDT,ADAUSDT,SOLUSDT".to_string());
    let mut symbols: Vec<String> = raw_symbols
        .split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(|x| x.to_ascii_uppercase())
        .collect();
    symbols.dedup();
    if symbols.is_empty() {
        symbols = vec!["BTCUSDT".to_string()];
    }

    let initial_balance = cli
        .initial_balance
        .or_else(|| env_parse("INITIAL_BALANCE"))
        .unwrap_or(10_000.0);
    let order_history_cap = env_parse("ORDER_HISTORY_CAP").unwrap_or(crate::ledger::DEFAULT_HISTORY_CAP);

    let api_port = cli.api_port.or_else(|| env_parse("API_PORT")).unwrap_or(8080);
    let ws_port = cli.ws_port.or_else(|| env_parse("WS_PORT")).unwrap_or(8081);
    let metrics_port = cli
        .metrics_port
        .or_else(|| env_parse("METRICS_PORT"))
        .unwrap_or(9898);

    let feed_mode = cli
        .feed_mode
        .or_else(|| env::var("FEED_MODE").ok())
        .and_then(|s| FeedMode::parse_one(&s))
        .unwrap_or(FeedMode::Mock);

    let binance_rest_url = env::var("BINANCE_REST_URL")
        .unwrap_or_else(|_| feed_mode.default_rest_url().to_string());
    let binance_ws_url = env::var("BINANCE_WS_URL")
        .unwrap_or_else(|_| feed_mode.default_ws_url().to_string());

    let poll_secs = env_parse("POLL_SECS").unwrap_or(3);
    let error_backoff_secs = env_parse("ERROR_BACKOFF_SECS").unwrap_or(10);

    let record_file = cli.record_file.or_else(|| env::var("RECORD_FILE").ok());

    Args {
        symbols,
        initial_balance,
        order_history_cap,
        api_port,
        ws_port,
        metrics_port,
        feed_mode,
        binance_rest_url,
        binance_ws_url,
        poll_secs,
        error_backoff_secs,
        record_file,
        command: cli.command,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_mode_parses_aliases() {
        assert_eq!(FeedMode::parse_one("mock"), Some(FeedMode::Mock));
        assert_eq!(FeedMode::parse_one("POLL"), Some(FeedMode::BinancePoll));
        assert_eq!(FeedMode::parse_one(" binance_stream "), Some(FeedMode::BinanceStream));
        assert_eq!(FeedMode::parse_one("ftp"), None);
    }
}
