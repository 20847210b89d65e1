//! Per-window wallet performance math.
//!
//! PnL counts realized flows (sells plus redemptions minus buys) and adds
//! unrealized PnL only on the all-time window, where open positions are
//! meaningful. Win rate is per market, not per fill: a market counts once
//! it has ended (a redemption row exists for it), and it is a win when the
//! money out exceeded the money in.

use polytrade_exchange::models::{ActivityRecord, Side};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Classification windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricWindow {
    H24,
    D7,
    D30,
    All,
}

impl MetricWindow {
    /// All windows, smallest first.
    #[must_use]
    pub fn all() -> &'static [MetricWindow] {
        &[Self::H24, Self::D7, Self::D30, Self::All]
    }

    /// Window length in milliseconds; `None` for all-time.
    #[must_use]
    pub fn duration_ms(self) -> Option<i64> {
        match self {
            Self::H24 => Some(24 * 3_600_000),
            Self::D7 => Some(7 * 24 * 3_600_000),
            Self::D30 => Some(30 * 24 * 3_600_000),
            Self::All => None,
        }
    }
}

/// Metrics for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub pnl: Decimal,
    pub volume: Decimal,
    pub trade_count: u32,
    /// `None` until at least one market has ended in the window.
    pub win_rate: Option<f64>,
    /// 0-100 composite.
    pub smart_score: f64,
}

/// Computes metrics for the rows inside one window.
///
/// `rows` must already be filtered to the window. `unrealized_pnl` is
/// added only when `window` is [`MetricWindow::All`].
#[must_use]
pub fn classify_window(
    rows: &[ActivityRecord],
    window: MetricWindow,
    unrealized_pnl: Decimal,
) -> WindowMetrics {
    let mut buy_volume = Decimal::ZERO;
    let mut sell_volume = Decimal::ZERO;
    let mut redemption_value = Decimal::ZERO;
    let mut trade_count = 0u32;

    // Per-market flows for the win-rate pass.
    #[derive(Default)]
    struct Flows {
        spent: Decimal,
        received: Decimal,
        ended: bool,
    }
    let mut by_market: HashMap<&str, Flows> = HashMap::new();

    for row in rows {
        let usdc = row
            .usdc_size
            .or_else(|| Some(row.price? * row.size?))
            .unwrap_or(Decimal::ZERO);
        let flows = by_market.entry(row.condition_id.as_str()).or_default();

        match row.activity_type.to_ascii_uppercase().as_str() {
            "TRADE" => {
                trade_count += 1;
                match row.side {
                    Some(Side::Buy) => {
                        buy_volume += usdc;
                        flows.spent += usdc;
                    }
                    Some(Side::Sell) => {
                        sell_volume += usdc;
                        flows.received += usdc;
                    }
                    None => {}
                }
            }
            "REDEEM" => {
                redemption_value += usdc;
                flows.received += usdc;
                flows.ended = true;
            }
            // Splits and merges move value between forms; net flow zero.
            _ => {}
        }
    }

    let unrealized = if window == MetricWindow::All {
        unrealized_pnl
    } else {
        Decimal::ZERO
    };
    let pnl = sell_volume + redemption_value - buy_volume + unrealized;
    let volume = buy_volume + sell_volume;

    let ended_markets = by_market.values().filter(|f| f.ended).count() as u32;
    let wins = by_market
        .values()
        .filter(|f| f.ended && f.received > f.spent)
        .count() as u32;
    let win_rate = (ended_markets > 0).then(|| f64::from(wins) / f64::from(ended_markets));

    WindowMetrics {
        pnl,
        volume,
        trade_count,
        win_rate,
        smart_score: smart_score(pnl, buy_volume, trade_count),
    }
}

/// `clamp(0, 100, 50 + 3 * ROI% + min(20, trades / 10))`.
#[must_use]
pub fn smart_score(pnl: Decimal, buy_volume: Decimal, trade_count: u32) -> f64 {
    let roi_pct = if buy_volume > Decimal::ZERO {
        (pnl / buy_volume * Decimal::from(100))
            .to_f64()
            .unwrap_or(0.0)
    } else {
        0.0
    };
    let activity = (f64::from(trade_count) / 10.0).min(20.0);
    (50.0 + 3.0 * roi_pct + activity).clamp(0.0, 100.0)
}

/// Filters `rows` down to one window ending at `now_ms`.
#[must_use]
pub fn rows_in_window(
    rows: &[ActivityRecord],
    window: MetricWindow,
    now_ms: i64,
) -> Vec<ActivityRecord> {
    match window.duration_ms() {
        None => rows.to_vec(),
        Some(len) => {
            let start = now_ms - len;
            rows.iter()
                .filter(|r| r.timestamp >= start)
                .cloned()
                .collect()
        }
    }
}
