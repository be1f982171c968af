// ===============================
// src/valuation.rs (mark-to-market)
// ===============================
//
// Pure functions over (ledger state, price table). A position whose symbol
// has no stored price yet is valued at its own average price; the feed may
// lag the ledger and a lagging symbol must not vanish from the total.

use crate::ledger::Ledger;
use crate::prices::PriceBook;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Valuation {
    pub portfolio_value: f64,
    pub total_pnl: f64,
    pub pnl_percent: f64,
}

pub fn assess(ledger: &Ledger, prices: &PriceBook) -> Valuation {
    let mut portfolio_value = ledger.cash_balance();
    for (symbol, pos) in ledger.positions() {
        let mark = prices.last_price(symbol).unwrap_or(pos.avg_price);
        portfolio_value += pos.quantity * mark;
    }

    let initial = ledger.initial_balance();
    let total_pnl = portfolio_value - initial;
    let pnl_percent = if initial != 0.0 { total_pnl / initial * 100.0 } else { 0.0 };

    Valuation { portfolio_value, total_pnl, pnl_percent }
}
