//! Wire models for exchange REST and WebSocket payloads.
//!
//! Upstream payloads are duck-typed: numbers arrive as strings or floats
//! and field names flip between camelCase and snake_case depending on the
//! endpoint. Parsing is lenient on names (serde aliases) and on numeric
//! encodings (flexible deserializers), then strict: everything downstream
//! of this module works with `Decimal` and typed enums.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

// =============================================================================
// Flexible deserializers
// =============================================================================

/// Accepts a JSON string or number and yields a `Decimal`.
pub fn de_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(f64),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Str(s) => Decimal::from_str(s.trim()).map_err(serde::de::Error::custom),
        Raw::Num(n) => Decimal::from_f64_retain(n)
            .ok_or_else(|| serde::de::Error::custom(format!("non-finite number {n}"))),
    }
}

/// Optional variant of [`de_decimal`]; missing and null both map to `None`.
pub fn de_opt_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(f64),
        None,
    }
    match Option::<Raw>::deserialize(deserializer)? {
        None | Some(Raw::None) => Ok(None),
        Some(Raw::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Str(s)) => Decimal::from_str(s.trim())
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(Raw::Num(n)) => Ok(Decimal::from_f64_retain(n)),
    }
}

/// Accepts seconds or milliseconds since epoch, as string or number.
pub fn de_timestamp_ms<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(i64),
        Float(f64),
    }
    let n = match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s.trim().parse::<i64>().map_err(serde::de::Error::custom)?,
        Raw::Num(n) => n,
        Raw::Float(f) => f as i64,
    };
    // Anything before ~2001 in ms is actually seconds.
    Ok(if n < 1_000_000_000_000 { n * 1_000 } else { n })
}

// =============================================================================
// Markets
// =============================================================================

/// One outcome token of a binary market.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeToken {
    /// Opaque large-integer asset id, kept as a string.
    #[serde(alias = "token_id", alias = "tokenId", alias = "assetId")]
    pub asset_id: String,
    /// Outcome label ("Yes"/"No").
    pub outcome: String,
    /// Last known price.
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub price: Option<Decimal>,
}

/// A binary market and its immutable YES/NO token pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// 32-byte condition id, hex string.
    #[serde(alias = "conditionId")]
    pub condition_id: String,
    /// Market question text.
    pub question: String,
    /// URL slug.
    #[serde(default)]
    pub slug: Option<String>,
    /// 24h traded volume in USD.
    #[serde(
        default,
        alias = "volume24hr",
        alias = "volume_24hr",
        alias = "volume24h",
        deserialize_with = "de_opt_decimal"
    )]
    pub volume_24h: Option<Decimal>,
    /// Whether the market accepts orders.
    #[serde(default)]
    pub active: bool,
    /// Settles through the negative-risk adapter when true.
    #[serde(default, alias = "negRisk", alias = "neg_risk")]
    pub is_neg_risk: bool,
    /// Outcome tokens; a valid market has exactly YES and NO.
    #[serde(default)]
    pub tokens: Vec<OutcomeToken>,
}

impl Market {
    /// The YES token, if present.
    #[must_use]
    pub fn yes_token(&self) -> Option<&OutcomeToken> {
        self.tokens
            .iter()
            .find(|t| t.outcome.eq_ignore_ascii_case("yes"))
    }

    /// The NO token, if present.
    #[must_use]
    pub fn no_token(&self) -> Option<&OutcomeToken> {
        self.tokens
            .iter()
            .find(|t| t.outcome.eq_ignore_ascii_case("no"))
    }

    /// True when both outcome tokens are present and distinct.
    #[must_use]
    pub fn has_valid_pair(&self) -> bool {
        match (self.yes_token(), self.no_token()) {
            (Some(yes), Some(no)) => yes.asset_id != no.asset_id,
            _ => false,
        }
    }
}

// =============================================================================
// Order books
// =============================================================================

/// One raw depth level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawLevel {
    #[serde(deserialize_with = "de_decimal")]
    pub price: Decimal,
    #[serde(deserialize_with = "de_decimal")]
    pub size: Decimal,
}

/// Raw order book as returned by the book endpoint or WS snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawOrderbook {
    #[serde(default, alias = "asset_id", alias = "assetId")]
    pub asset_id: String,
    #[serde(default)]
    pub bids: Vec<RawLevel>,
    #[serde(default)]
    pub asks: Vec<RawLevel>,
    /// Exchange-side timestamp, milliseconds.
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub timestamp: Option<i64>,
    /// Exchange book hash (sequence surrogate).
    #[serde(default)]
    pub hash: Option<String>,
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrap(#[serde(deserialize_with = "de_timestamp_ms")] i64);
    Ok(Option::<Wrap>::deserialize(deserializer)?.map(|w| w.0))
}

// =============================================================================
// Trades and activity
// =============================================================================

/// Trade side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Wire representation used by the CLOB ("BUY"/"SELL").
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// A public trade print.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(default, alias = "transactionHash", alias = "transaction_hash")]
    pub transaction_hash: Option<String>,
    #[serde(alias = "conditionId", alias = "condition_id", default)]
    pub condition_id: String,
    #[serde(default, alias = "asset_id", alias = "assetId", alias = "asset")]
    pub asset_id: String,
    pub side: Side,
    #[serde(deserialize_with = "de_decimal")]
    pub price: Decimal,
    #[serde(deserialize_with = "de_decimal")]
    pub size: Decimal,
    #[serde(deserialize_with = "de_timestamp_ms")]
    pub timestamp: i64,
    /// Trader wallet, when the endpoint includes it.
    #[serde(default, alias = "proxyWallet", alias = "proxy_wallet", alias = "maker")]
    pub wallet: Option<String>,
}

/// Raw user-activity row: trades, splits, merges, redeems, conversions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    #[serde(default, alias = "transactionHash", alias = "transaction_hash")]
    pub transaction_hash: Option<String>,
    /// Activity type string as sent by the exchange (e.g. "TRADE", "SPLIT").
    #[serde(default, alias = "type")]
    pub activity_type: String,
    #[serde(default)]
    pub side: Option<Side>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub size: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub price: Option<Decimal>,
    #[serde(
        default,
        alias = "usdcSize",
        alias = "usdc_size",
        deserialize_with = "de_opt_decimal"
    )]
    pub usdc_size: Option<Decimal>,
    #[serde(default, alias = "conditionId", alias = "condition_id")]
    pub condition_id: String,
    #[serde(default, alias = "asset_id", alias = "assetId")]
    pub asset: String,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "de_timestamp_ms")]
    pub timestamp: i64,
}

/// An open position from the data API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    #[serde(alias = "conditionId", alias = "condition_id", default)]
    pub condition_id: String,
    #[serde(default, alias = "asset_id", alias = "assetId", alias = "asset")]
    pub asset_id: String,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub size: Option<Decimal>,
    #[serde(
        default,
        alias = "avgPrice",
        alias = "avg_price",
        deserialize_with = "de_opt_decimal"
    )]
    pub avg_price: Option<Decimal>,
    #[serde(
        default,
        alias = "currentValue",
        alias = "current_value",
        deserialize_with = "de_opt_decimal"
    )]
    pub current_value: Option<Decimal>,
    #[serde(
        default,
        alias = "cashPnl",
        alias = "cash_pnl",
        deserialize_with = "de_opt_decimal"
    )]
    pub cash_pnl: Option<Decimal>,
}

/// Leaderboard row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    #[serde(default, alias = "proxyWallet", alias = "proxy_wallet", alias = "address")]
    pub wallet: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub amount: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub pnl: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub volume: Option<Decimal>,
}

/// Reward configuration for a market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    #[serde(alias = "conditionId", alias = "condition_id", default)]
    pub condition_id: String,
    #[serde(
        default,
        alias = "rewardsDailyRate",
        alias = "rewards_daily_rate",
        deserialize_with = "de_opt_decimal"
    )]
    pub daily_rate: Option<Decimal>,
    #[serde(
        default,
        alias = "rewardsMinSize",
        alias = "rewards_min_size",
        deserialize_with = "de_opt_decimal"
    )]
    pub min_size: Option<Decimal>,
    #[serde(
        default,
        alias = "rewardsMaxSpread",
        alias = "rewards_max_spread",
        deserialize_with = "de_opt_decimal"
    )]
    pub max_spread: Option<Decimal>,
}

/// Utility: parse an ISO timestamp the way upstream formats them.
#[must_use]
pub fn parse_iso_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn market_parses_camel_case() {
        let json = r#"{
            "conditionId": "0xabc",
            "question": "Will it?",
            "slug": "will-it",
            "volume24hr": "1234.5",
            "active": true,
            "negRisk": true,
            "tokens": [
                {"token_id": "111", "outcome": "Yes", "price": "0.42"},
                {"token_id": "222", "outcome": "No", "price": 0.58}
            ]
        }"#;
        let market: Market = serde_json::from_str(json).unwrap();
        assert_eq!(market.condition_id, "0xabc");
        assert!(market.is_neg_risk);
        assert!(market.has_valid_pair());
        assert_eq!(market.yes_token().unwrap().price, Some(dec!(0.42)));
        assert_eq!(market.no_token().unwrap().asset_id, "222");
        assert_eq!(market.volume_24h, Some(dec!(1234.5)));
    }

    #[test]
    fn market_pair_invalid_when_ids_collide() {
        let market = Market {
            condition_id: "0x1".into(),
            question: "q".into(),
            slug: None,
            volume_24h: None,
            active: true,
            is_neg_risk: false,
            tokens: vec![
                OutcomeToken {
                    asset_id: "1".into(),
                    outcome: "Yes".into(),
                    price: None,
                },
                OutcomeToken {
                    asset_id: "1".into(),
                    outcome: "No".into(),
                    price: None,
                },
            ],
        };
        assert!(!market.has_valid_pair());
    }

    #[test]
    fn raw_book_parses_string_levels() {
        let json = r#"{
            "asset_id": "999",
            "bids": [{"price": ".48", "size": "30"}],
            "asks": [{"price": "0.52", "size": 25}],
            "timestamp": "1700000000"
        }"#;
        let book: RawOrderbook = serde_json::from_str(json).unwrap();
        assert_eq!(book.bids[0].price, dec!(0.48));
        assert_eq!(book.asks[0].size, dec!(25));
        // Seconds promoted to milliseconds.
        assert_eq!(book.timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn activity_accepts_both_namings() {
        let camel = r#"{
            "transactionHash": "0xdead",
            "type": "TRADE",
            "side": "BUY",
            "size": "10",
            "price": "0.5",
            "usdcSize": "5",
            "conditionId": "0xc",
            "asset": "1",
            "timestamp": 1700000000
        }"#;
        let snake = r#"{
            "transaction_hash": "0xdead",
            "type": "TRADE",
            "side": "BUY",
            "size": 10,
            "price": 0.5,
            "usdc_size": 5,
            "condition_id": "0xc",
            "asset": "1",
            "timestamp": 1700000000000
        }"#;
        let a: ActivityRecord = serde_json::from_str(camel).unwrap();
        let b: ActivityRecord = serde_json::from_str(snake).unwrap();
        assert_eq!(a.transaction_hash, b.transaction_hash);
        assert_eq!(a.usdc_size, b.usdc_size);
        assert_eq!(a.timestamp, b.timestamp);
    }

    #[test]
    fn empty_string_decimal_is_none() {
        let json = r#"{"conditionId": "0xc", "question": "q", "volume24hr": ""}"#;
        let market: Market = serde_json::from_str(json).unwrap();
        assert_eq!(market.volume_24h, None);
    }

    #[test]
    fn side_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Side::Buy).unwrap(), "\"BUY\"");
        assert_eq!(Side::Sell.as_str(), "SELL");
    }
}
