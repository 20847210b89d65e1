//! The UI-facing market stream.
//!
//! One socket per market: the handler subscribes the market's YES/NO
//! assets upstream, sends an `init` frame, then forwards typed frames as
//! events arrive. `pair` frames carry the derived effective prices so the
//! UI never recomputes the mirror locally.

use crate::state::SharedState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use polytrade_arbitrage::pricing::effective_prices;
use polytrade_exchange::websocket::MarketEvent;
use tracing::{debug, warn};

/// `GET /ws/market/:conditionId`
pub async fn market_stream(
    ws: WebSocketUpgrade,
    Path(condition_id): Path<String>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, condition_id, state))
}

async fn handle_socket(socket: WebSocket, condition_id: String, state: SharedState) {
    let (mut sink, mut stream) = socket.split();

    let market = match state.gateway.market(&condition_id).await {
        Ok(market) => market,
        Err(e) => {
            let _ = sink
                .send(frame(serde_json::json!({
                    "type": "error",
                    "message": format!("market fetch failed: {e}"),
                })))
                .await;
            return;
        }
    };
    let (Some(yes), Some(no)) = (market.yes_token(), market.no_token()) else {
        let _ = sink
            .send(frame(serde_json::json!({
                "type": "error",
                "message": "market has no YES/NO pair",
            })))
            .await;
        return;
    };
    let yes_asset = yes.asset_id.clone();
    let no_asset = no.asset_id.clone();

    if let Err(e) = state
        .ws_manager
        .subscribe(vec![yes_asset.clone(), no_asset.clone()])
        .await
    {
        warn!(error = %e, "upstream subscribe failed");
    }

    let init = serde_json::json!({
        "type": "init",
        "market": market,
        "yesBook": state.books.book(&yes_asset),
        "noBook": state.books.book(&no_asset),
    });
    if sink.send(frame(init)).await.is_err() {
        return;
    }

    let mut events = state.market_events.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let frames = frames_for(&state, &yes_asset, &no_asset, &event);
                    for payload in frames {
                        if sink.send(frame(payload)).await.is_err() {
                            cleanup(&state, yes_asset, no_asset).await;
                            return;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "client stream lagged");
                    let _ = sink
                        .send(frame(serde_json::json!({
                            "type": "error",
                            "message": format!("stream lagged, {skipped} events dropped"),
                        })))
                        .await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    cleanup(&state, yes_asset, no_asset).await;
}

async fn cleanup(state: &SharedState, yes_asset: String, no_asset: String) {
    let _ = state.ws_manager.unsubscribe(vec![yes_asset, no_asset]).await;
}

fn frame(value: serde_json::Value) -> Message {
    Message::Text(value.to_string())
}

/// Maps one upstream event to the UI frames it produces.
fn frames_for(
    state: &SharedState,
    yes_asset: &str,
    no_asset: &str,
    event: &MarketEvent,
) -> Vec<serde_json::Value> {
    let ours = |asset: &str| asset == yes_asset || asset == no_asset;
    match event {
        MarketEvent::BookSnapshot { asset_id, book } if ours(asset_id) => {
            let mut frames = vec![serde_json::json!({
                "type": "book",
                "assetId": asset_id,
                "book": book,
            })];
            frames.extend(pair_frame(state, yes_asset, no_asset));
            frames
        }
        MarketEvent::BookDelta {
            asset_id,
            side,
            price,
            size,
        } if ours(asset_id) => {
            let mut frames = vec![serde_json::json!({
                "type": "book",
                "assetId": asset_id,
                "delta": {"side": side, "price": price, "size": size},
                "book": state.books.book(asset_id),
            })];
            frames.extend(pair_frame(state, yes_asset, no_asset));
            frames
        }
        MarketEvent::LastTrade {
            asset_id,
            price,
            size,
            side,
        } if ours(asset_id) => vec![
            serde_json::json!({
                "type": "price",
                "assetId": asset_id,
                "price": price,
            }),
            serde_json::json!({
                "type": "trade",
                "assetId": asset_id,
                "price": price,
                "size": size,
                "side": side,
            }),
        ],
        MarketEvent::Disconnected { reason } => vec![serde_json::json!({
            "type": "error",
            "message": format!("upstream disconnected: {reason}"),
        })],
        _ => Vec::new(),
    }
}

/// The derived YES/NO pair frame, when both books are present.
fn pair_frame(state: &SharedState, yes_asset: &str, no_asset: &str) -> Option<serde_json::Value> {
    let yes = state.books.book(yes_asset)?;
    let no = state.books.book(no_asset)?;
    let prices = effective_prices(&yes, &no)?;
    Some(serde_json::json!({
        "type": "pair",
        "effective": prices,
        "yesBest": {"bid": yes.best_bid(), "ask": yes.best_ask()},
        "noBest": {"bid": no.best_bid(), "ask": no.best_ask()},
    }))
}
