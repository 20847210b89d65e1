//! Multiplexed market-channel WebSocket client.
//!
//! One socket carries every subscribed asset. The reader task demuxes the
//! four upstream event types, applies updates to the shared [`PriceCache`]
//! under its sequence gate, and fans typed [`MarketEvent`]s out to the
//! consumer channel. Disconnects reconnect with exponential backoff
//! (500ms doubling to 30s) and re-subscribe the full asset set.

use crate::models::{RawOrderbook, Side};
use crate::orderbook::NormalizedBook;
use crate::price_cache::PriceCache;
use futures_util::{SinkExt, StreamExt};
use polytrade_core::now_ms;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Production market-channel URL.
pub const WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

/// Errors from the WebSocket layer.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("manager is shut down")]
    Closed,
}

/// Demuxed market events.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    /// Full book snapshot for one asset.
    BookSnapshot {
        asset_id: String,
        book: NormalizedBook,
    },
    /// Single-level change.
    BookDelta {
        asset_id: String,
        side: Side,
        price: Decimal,
        size: Decimal,
    },
    /// Tick size changed for one asset.
    TickSizeChange { asset_id: String, tick_size: String },
    /// Last trade print.
    LastTrade {
        asset_id: String,
        price: Decimal,
        size: Option<Decimal>,
        side: Option<Side>,
    },
    /// Socket (re)connected; book state should be treated as resetting.
    Connected,
    /// Socket lost; a reconnect attempt follows.
    Disconnected { reason: String },
}

/// Connection tuning.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub ping_interval: Duration,
    pub channel_capacity: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: WS_URL.to_string(),
            initial_reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(30),
            ping_interval: Duration::from_secs(30),
            channel_capacity: 1_024,
        }
    }
}

enum Command {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Shutdown,
}

/// Handle to the running connection task.
///
/// Cloning shares the same connection; dropping all clones does not stop
/// the task; call [`WebSocketManager::shutdown`] for a clean close.
#[derive(Clone)]
pub struct WebSocketManager {
    commands: mpsc::Sender<Command>,
    cache: PriceCache,
}

impl WebSocketManager {
    /// Spawns the connection task and returns the handle plus the event
    /// stream. The socket connects lazily on the first subscription.
    #[must_use]
    pub fn start(config: WsConfig, cache: PriceCache) -> (Self, mpsc::Receiver<MarketEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let task_cache = cache.clone();
        tokio::spawn(async move {
            connection_task(config, task_cache, cmd_rx, event_tx).await;
        });

        (
            Self {
                commands: cmd_tx,
                cache,
            },
            event_rx,
        )
    }

    /// Subscribes to additional asset ids.
    pub async fn subscribe(&self, asset_ids: Vec<String>) -> Result<(), WsError> {
        self.commands
            .send(Command::Subscribe(asset_ids))
            .await
            .map_err(|_| WsError::Closed)
    }

    /// Unsubscribes asset ids and evicts their cache state.
    pub async fn unsubscribe(&self, asset_ids: Vec<String>) -> Result<(), WsError> {
        for id in &asset_ids {
            self.cache.evict(id);
        }
        self.commands
            .send(Command::Unsubscribe(asset_ids))
            .await
            .map_err(|_| WsError::Closed)
    }

    /// Stops the connection task.
    pub async fn shutdown(&self) -> Result<(), WsError> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| WsError::Closed)
    }

    /// The cache this manager writes into.
    #[must_use]
    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }
}

// =============================================================================
// Connection task
// =============================================================================

async fn connection_task(
    config: WsConfig,
    cache: PriceCache,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<MarketEvent>,
) {
    let mut subscribed: HashSet<String> = HashSet::new();
    let mut backoff = config.initial_reconnect_delay;

    'outer: loop {
        // Wait for something to subscribe to before dialing.
        while subscribed.is_empty() {
            match commands.recv().await {
                Some(Command::Subscribe(ids)) => subscribed.extend(ids),
                Some(Command::Unsubscribe(ids)) => {
                    for id in ids {
                        subscribed.remove(&id);
                    }
                }
                Some(Command::Shutdown) | None => return,
            }
        }

        let mut ws = match connect_async(&config.url).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                warn!(error = %e, delay = ?backoff, "websocket connect failed");
                let _ = events
                    .send(MarketEvent::Disconnected {
                        reason: e.to_string(),
                    })
                    .await;
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.max_reconnect_delay);
                continue;
            }
        };
        backoff = config.initial_reconnect_delay;

        let sub_msg = subscription_message(&subscribed);
        if let Err(e) = ws.send(Message::Text(sub_msg)).await {
            warn!(error = %e, "subscription send failed");
            continue;
        }
        info!(assets = subscribed.len(), "websocket connected");
        let _ = events.send(MarketEvent::Connected).await;

        let mut ping = tokio::time::interval(config.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Subscribe(ids)) => {
                        let fresh: Vec<String> = ids
                            .into_iter()
                            .filter(|id| subscribed.insert(id.clone()))
                            .collect();
                        if !fresh.is_empty() {
                            let fresh_set: HashSet<String> = fresh.into_iter().collect();
                            let msg = subscription_message(&fresh_set);
                            if ws.send(Message::Text(msg)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Command::Unsubscribe(ids)) => {
                        for id in &ids {
                            subscribed.remove(id);
                        }
                        // The market channel has no unsubscribe op; drop the
                        // socket and resubscribe the remaining set.
                        let _ = ws.close(None).await;
                        let _ = events.send(MarketEvent::Disconnected {
                            reason: "resubscribing after unsubscribe".to_string(),
                        }).await;
                        continue 'outer;
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = ws.close(None).await;
                        return;
                    }
                },
                _ = ping.tick() => {
                    if ws.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                },
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&text, &cache, &events).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed".to_string());
                        let _ = events.send(MarketEvent::Disconnected { reason }).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = events.send(MarketEvent::Disconnected {
                            reason: e.to_string(),
                        }).await;
                        break;
                    }
                    None => {
                        let _ = events.send(MarketEvent::Disconnected {
                            reason: "stream ended".to_string(),
                        }).await;
                        break;
                    }
                },
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.max_reconnect_delay);
    }
}

fn subscription_message(asset_ids: &HashSet<String>) -> String {
    let ids: Vec<&String> = asset_ids.iter().collect();
    serde_json::json!({
        "assets_ids": ids,
        "type": "market",
    })
    .to_string()
}

// =============================================================================
// Demux
// =============================================================================

#[derive(Deserialize)]
struct Envelope {
    event_type: String,
    #[serde(default)]
    asset_id: Option<String>,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct PriceChangePayload {
    #[serde(default)]
    price_changes: Vec<PriceChangeRow>,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct PriceChangeRow {
    asset_id: String,
    price: String,
    size: String,
    side: String,
}

#[derive(Deserialize)]
struct TickSizePayload {
    asset_id: String,
    #[serde(alias = "new_tick_size", alias = "tick_size")]
    tick_size: Option<String>,
}

#[derive(Deserialize)]
struct LastTradePayload {
    asset_id: String,
    price: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    side: Option<String>,
}

fn event_sequence(ts: Option<&serde_json::Value>) -> u64 {
    match ts {
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or_else(|_| now_ms() as u64),
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or_else(|| now_ms() as u64),
        _ => now_ms() as u64,
    }
}

async fn handle_text(text: &str, cache: &PriceCache, events: &mpsc::Sender<MarketEvent>) {
    // Messages arrive both bare and in one-element arrays.
    let values: Vec<serde_json::Value> = match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(v) => vec![v],
        Err(e) => {
            debug!(error = %e, "unparseable ws frame");
            return;
        }
    };

    for value in values {
        let Ok(envelope) = serde_json::from_value::<Envelope>(value.clone()) else {
            continue;
        };
        let sequence = event_sequence(envelope.timestamp.as_ref());

        match envelope.event_type.as_str() {
            "book" => {
                let Ok(raw) = serde_json::from_value::<RawOrderbook>(value) else {
                    continue;
                };
                let asset_id = if raw.asset_id.is_empty() {
                    envelope.asset_id.unwrap_or_default()
                } else {
                    raw.asset_id.clone()
                };
                if asset_id.is_empty() {
                    continue;
                }
                let book = NormalizedBook::from_raw(
                    &RawOrderbook {
                        asset_id: asset_id.clone(),
                        ..raw
                    },
                    now_ms(),
                );
                // Out-of-order snapshots are dropped at the cache gate.
                if cache.update_book(book.clone(), sequence) {
                    let _ = events
                        .send(MarketEvent::BookSnapshot { asset_id, book })
                        .await;
                }
            }
            "price_change" => {
                let Ok(payload) = serde_json::from_value::<PriceChangePayload>(value) else {
                    continue;
                };
                let sequence = event_sequence(payload.timestamp.as_ref());
                for row in payload.price_changes {
                    let (Ok(price), Ok(size)) =
                        (Decimal::from_str(&row.price), Decimal::from_str(&row.size))
                    else {
                        continue;
                    };
                    let side = if row.side.eq_ignore_ascii_case("buy") {
                        Side::Buy
                    } else {
                        Side::Sell
                    };
                    // Deltas older than the cached snapshot are stale.
                    if sequence < cache.book_sequence(&row.asset_id) {
                        continue;
                    }
                    if let Some(mut book) = cache.book(&row.asset_id) {
                        book.apply_delta(side == Side::Buy, price, size);
                        book.fetched_at_ms = now_ms();
                        cache.update_book(book, sequence.max(cache.book_sequence(&row.asset_id)) + 1);
                    }
                    let _ = events
                        .send(MarketEvent::BookDelta {
                            asset_id: row.asset_id.clone(),
                            side,
                            price,
                            size,
                        })
                        .await;
                }
            }
            "tick_size_change" => {
                let Ok(payload) = serde_json::from_value::<TickSizePayload>(value) else {
                    continue;
                };
                if let Some(tick_size) = payload.tick_size {
                    let _ = events
                        .send(MarketEvent::TickSizeChange {
                            asset_id: payload.asset_id,
                            tick_size,
                        })
                        .await;
                }
            }
            "last_trade_price" => {
                let Ok(payload) = serde_json::from_value::<LastTradePayload>(value) else {
                    continue;
                };
                let Ok(price) = Decimal::from_str(&payload.price) else {
                    continue;
                };
                cache.update_price(&payload.asset_id, price, sequence);
                let side = payload.side.as_deref().map(|s| {
                    if s.eq_ignore_ascii_case("buy") {
                        Side::Buy
                    } else {
                        Side::Sell
                    }
                });
                let size = payload.size.as_deref().and_then(|s| Decimal::from_str(s).ok());
                let _ = events
                    .send(MarketEvent::LastTrade {
                        asset_id: payload.asset_id,
                        price,
                        size,
                        side,
                    })
                    .await;
            }
            other => {
                debug!(event_type = other, "ignoring unknown ws event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn drain(rx: &mut mpsc::Receiver<MarketEvent>) -> Vec<MarketEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn book_frame_updates_cache_and_emits_snapshot() {
        let cache = PriceCache::new();
        let (tx, mut rx) = mpsc::channel(16);

        let frame = serde_json::json!({
            "event_type": "book",
            "asset_id": "a1",
            "bids": [{"price": "0.48", "size": "30"}],
            "asks": [{"price": "0.52", "size": "25"}],
            "timestamp": "1700000000100"
        })
        .to_string();
        handle_text(&frame, &cache, &tx).await;

        let events = drain(&mut rx).await;
        assert!(matches!(events.as_slice(), [MarketEvent::BookSnapshot { asset_id, .. }] if asset_id == "a1"));
        assert_eq!(cache.book("a1").unwrap().best_bid(), Some(dec!(0.48)));
    }

    #[tokio::test]
    async fn out_of_order_book_is_dropped() {
        let cache = PriceCache::new();
        let (tx, mut rx) = mpsc::channel(16);

        let newer = serde_json::json!({
            "event_type": "book", "asset_id": "a1",
            "bids": [{"price": "0.50", "size": "10"}], "asks": [],
            "timestamp": "2000"
        })
        .to_string();
        let older = serde_json::json!({
            "event_type": "book", "asset_id": "a1",
            "bids": [{"price": "0.40", "size": "10"}], "asks": [],
            "timestamp": "1000"
        })
        .to_string();

        handle_text(&newer, &cache, &tx).await;
        handle_text(&older, &cache, &tx).await;

        let events = drain(&mut rx).await;
        assert_eq!(events.len(), 1);
        assert_eq!(cache.book("a1").unwrap().best_bid(), Some(dec!(0.50)));
    }

    #[tokio::test]
    async fn price_change_applies_delta_to_cached_book() {
        let cache = PriceCache::new();
        let (tx, mut rx) = mpsc::channel(16);

        let snapshot = serde_json::json!({
            "event_type": "book", "asset_id": "a1",
            "bids": [{"price": "0.48", "size": "30"}],
            "asks": [{"price": "0.52", "size": "25"}],
            "timestamp": "1000"
        })
        .to_string();
        handle_text(&snapshot, &cache, &tx).await;

        let delta = serde_json::json!({
            "event_type": "price_change",
            "timestamp": "2000",
            "price_changes": [
                {"asset_id": "a1", "price": "0.49", "size": "5", "side": "BUY"}
            ]
        })
        .to_string();
        handle_text(&delta, &cache, &tx).await;

        assert_eq!(cache.book("a1").unwrap().best_bid(), Some(dec!(0.49)));
        let events = drain(&mut rx).await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn last_trade_updates_price_cache() {
        let cache = PriceCache::new();
        let (tx, mut rx) = mpsc::channel(16);

        let frame = serde_json::json!({
            "event_type": "last_trade_price",
            "asset_id": "a1",
            "price": "0.57",
            "size": "12",
            "side": "SELL",
            "timestamp": 1700000000123u64
        })
        .to_string();
        handle_text(&frame, &cache, &tx).await;

        assert_eq!(cache.price("a1"), Some(dec!(0.57)));
        let events = drain(&mut rx).await;
        assert!(
            matches!(events.as_slice(), [MarketEvent::LastTrade { side: Some(Side::Sell), .. }])
        );
    }

    #[tokio::test]
    async fn tick_size_change_is_forwarded() {
        let cache = PriceCache::new();
        let (tx, mut rx) = mpsc::channel(16);

        let frame = serde_json::json!({
            "event_type": "tick_size_change",
            "asset_id": "a1",
            "new_tick_size": "0.001"
        })
        .to_string();
        handle_text(&frame, &cache, &tx).await;

        let events = drain(&mut rx).await;
        assert!(matches!(
            events.as_slice(),
            [MarketEvent::TickSizeChange { tick_size, .. }] if tick_size == "0.001"
        ));
    }

    #[tokio::test]
    async fn unknown_and_garbage_frames_are_ignored() {
        let cache = PriceCache::new();
        let (tx, mut rx) = mpsc::channel(16);

        handle_text("not json", &cache, &tx).await;
        handle_text(r#"{"event_type": "mystery"}"#, &cache, &tx).await;

        assert!(drain(&mut rx).await.is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn array_framed_messages_are_demuxed() {
        let cache = PriceCache::new();
        let (tx, mut rx) = mpsc::channel(16);

        let frame = serde_json::json!([
            {
                "event_type": "book", "asset_id": "a1",
                "bids": [], "asks": [{"price": "0.52", "size": "25"}],
                "timestamp": "1000"
            },
            {
                "event_type": "last_trade_price", "asset_id": "a2",
                "price": "0.31", "timestamp": "1001"
            }
        ])
        .to_string();
        handle_text(&frame, &cache, &tx).await;

        assert_eq!(drain(&mut rx).await.len(), 2);
        assert_eq!(cache.price("a2"), Some(dec!(0.31)));
    }
}
