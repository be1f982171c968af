// ===============================
// src/gateway.rs (HTTP order gateway + queries)
// ===============================
//
// Thin request/response layer in front of the engine:
//   POST /api/order      -> execution receipt or structured rejection
//   GET  /api/balance    -> cash, pnl, pnl percent
//   GET  /api/prices     -> latest snapshot per symbol
//   GET  /api/positions  -> open positions
//   GET  /api/orders     -> recent order history (most-recent-last)
//
// Requests are validated here (blank symbol, unknown side, non-positive
// quantity) before anything reaches the engine; ledger-level rejections
// come back as structured results, never as faults.

use chrono::Utc;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::domain::{OrderRequest, Side};
use crate::engine::Command;

/// How many history entries a query returns.
const RECENT_ORDERS_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid order request: {0}")]
    Invalid(String),
}

/// Raw wire form, before validation.
#[derive(Debug, Deserialize)]
pub struct OrderRequestWire {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub quantity: f64,
}

pub fn validate(wire: OrderRequestWire) -> Result<OrderRequest, RequestError> {
    let symbol = wire.symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(RequestError::Invalid("symbol is required".to_string()));
    }
    let side: Side = wire.side.parse().map_err(|_| {
        RequestError::Invalid(format!("side must be BUY or SELL, got {:?}", wire.side.trim()))
    })?;
    if !wire.quantity.is_finite() || wire.quantity <= 0.0 {
        return Err(RequestError::Invalid(format!(
            "quantity must be a positive number, got {}",
            wire.quantity
        )));
    }
    Ok(OrderRequest { symbol, side, quantity: wire.quantity })
}

pub async fn serve(port: u16, cmd_tx: mpsc::Sender<Command>) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(move |_conn| {
        let cmd_tx = cmd_tx.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle(req, cmd_tx.clone())))
        }
    });

    info!(%addr, "order gateway listening");
    if let Err(e) = Server::bind(&addr).serve(make_svc).await {
        error!(?e, "order gateway stopped");
    }
}

async fn handle(req: Request<Body>, cmd_tx: mpsc::Sender<Command>) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, "/api/order") => place_order(req, cmd_tx).await,
        (&Method::GET, "/api/balance") => get_balance(cmd_tx).await,
        (&Method::GET, "/api/prices") => get_prices(cmd_tx).await,
        (&Method::GET, "/api/positions") => get_positions(cmd_tx).await,
        (&Method::GET, "/api/orders") => get_orders(cmd_tx).await,
        _ => json_response(
            StatusCode::NOT_FOUND,
            &json!({"status": "error", "message": "not found"}),
        ),
    };
    Ok(response)
}

async fn place_order(req: Request<Body>, cmd_tx: mpsc::Sender<Command>) -> Response<Body> {
    let bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("unreadable body: {e}")),
    };
    let wire: OrderRequestWire = match serde_json::from_slice(&bytes) {
        Ok(w) => w,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("bad json: {e}")),
    };
    let request = match validate(wire) {
        Ok(r) => r,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let (resp_tx, resp_rx) = oneshot::channel();
    let cmd = Command::PlaceOrder { req: request.clone(), resp: resp_tx };
    if cmd_tx.send(cmd).await.is_err() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "engine unavailable");
    }
    match resp_rx.await {
        Ok(Ok(receipt)) => json_response(
            StatusCode::OK,
            &json!({
                "status": "success",
                "message": format!(
                    "EXECUTED: {} {} {} @ {:.2}",
                    request.side.as_str(), request.quantity, request.symbol,
                    receipt.execution_price
                ),
                "order_id": receipt.order_id,
                "execution_price": receipt.execution_price,
                "new_balance": receipt.new_balance,
            }),
        ),
        Ok(Err(reject)) => json_response(
            StatusCode::OK,
            &json!({"status": "error", "message": reject.to_string()}),
        ),
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, "engine unavailable"),
    }
}

async fn get_balance(cmd_tx: mpsc::Sender<Command>) -> Response<Body> {
    let (resp_tx, resp_rx) = oneshot::channel();
    if cmd_tx.send(Command::Balance { resp: resp_tx }).await.is_err() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "engine unavailable");
    }
    match resp_rx.await {
        Ok(report) => json_response(
            StatusCode::OK,
            &json!({
                "balance": report.balance,
                "pnl": report.pnl,
                "pnl_percent": report.pnl_percent,
                "timestamp": Utc::now().format("%H:%M:%S").to_string(),
            }),
        ),
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, "engine unavailable"),
    }
}

async fn get_prices(cmd_tx: mpsc::Sender<Command>) -> Response<Body> {
    let (resp_tx, resp_rx) = oneshot::channel();
    if cmd_tx.send(Command::Prices { resp: resp_tx }).await.is_err() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "engine unavailable");
    }
    match resp_rx.await {
        Ok(prices) => json_response(StatusCode::OK, &json!(prices)),
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, "engine unavailable"),
    }
}

async fn get_positions(cmd_tx: mpsc::Sender<Command>) -> Response<Body> {
    let (resp_tx, resp_rx) = oneshot::channel();
    if cmd_tx.send(Command::Positions { resp: resp_tx }).await.is_err() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "engine unavailable");
    }
    match resp_rx.await {
        Ok(positions) => json_response(StatusCode::OK, &json!(positions)),
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, "engine unavailable"),
    }
}

async fn get_orders(cmd_tx: mpsc::Sender<Command>) -> Response<Body> {
    let (resp_tx, resp_rx) = oneshot::channel();
    let cmd = Command::RecentOrders { limit: RECENT_ORDERS_LIMIT, resp: resp_tx };
    if cmd_tx.send(cmd).await.is_err() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "engine unavailable");
    }
    match resp_rx.await {
        Ok(orders) => json_response(StatusCode::OK, &json!(orders)),
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, "engine unavailable"),
    }
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<Body> {
    let body = value.to_string();
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    json_response(status, &json!({"status": "error", "message": message}))
}
