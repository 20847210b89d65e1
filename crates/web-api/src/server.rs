use crate::handlers::{accounts, arbitrage, follow, markets, wallets, whale};
use crate::state::SharedState;
use crate::ws;
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// API server over the shared service state.
pub struct ApiServer {
    state: SharedState,
    cors_origin: String,
}

impl ApiServer {
    /// Creates a server.
    #[must_use]
    pub fn new(state: SharedState, cors_origin: impl Into<String>) -> Self {
        Self {
            state,
            cors_origin: cors_origin.into(),
        }
    }

    /// Builds the router with every route.
    #[must_use]
    pub fn router(&self) -> Router {
        let cors = if self.cors_origin == "*" {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            CorsLayer::new()
                .allow_origin(
                    self.cors_origin
                        .parse::<HeaderValue>()
                        .unwrap_or_else(|_| HeaderValue::from_static("*")),
                )
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                ])
                .allow_headers(Any)
        };

        Router::new()
            // Markets
            .route("/markets/trending", get(markets::trending))
            .route("/markets/:id", get(markets::detail))
            .route("/markets/:id/orderbook", get(markets::orderbook))
            .route("/markets/:id/klines", get(markets::klines))
            // Arbitrage
            .route("/arbitrage/scan", get(arbitrage::scan))
            .route("/arbitrage/execute", post(arbitrage::execute))
            .route("/arbitrage/status", get(arbitrage::status))
            // Wallets
            .route("/wallets/leaderboard", get(wallets::leaderboard))
            .route("/wallets/:addr/profile", get(wallets::profile))
            .route("/wallets/:addr/positions", get(wallets::positions))
            .route("/wallets/:addr/activity", get(wallets::activity))
            // Whale discovery
            .route("/whale/start", post(whale::start))
            .route("/whale/stop", post(whale::stop))
            .route("/whale/status", get(whale::status))
            .route("/whale/whales", get(whale::whales))
            .route("/whale/trades", get(whale::trades))
            .route("/whale/config", get(whale::get_config))
            .route("/whale/config", put(whale::put_config))
            .route("/whale/cache/refresh", post(whale::cache_refresh))
            .route("/whale/cache/bulk", get(whale::cache_bulk))
            // Follow activity
            .route("/follow-activity/start", post(follow::start))
            .route("/follow-activity/stop", post(follow::stop))
            .route("/follow-activity/status", get(follow::status))
            .route("/follow-activity/activities", get(follow::activities))
            .route("/follow-activity/suggestions", get(follow::suggestions))
            .route("/follow-activity/confirm", post(follow::confirm))
            .route(
                "/follow-activity/autotrade/config",
                post(follow::set_autotrade_config),
            )
            // Auto-trade views
            .route("/autotrade/status", get(follow::autotrade_status))
            .route("/autotrade/pending", get(follow::autotrade_pending))
            .route("/autotrade/history", get(follow::autotrade_history))
            .route("/autotrade/paper/status", get(follow::paper_status))
            .route("/autotrade/paper/history", get(follow::paper_history))
            .route("/autotrade/paper/summary", get(follow::paper_summary))
            // Accounts
            .route("/accounts", get(accounts::list))
            .route("/accounts", post(accounts::create))
            .route("/accounts/:id", patch(accounts::patch))
            .route("/accounts/:id", delete(accounts::delete))
            // Market stream
            .route("/ws/market/:condition_id", get(ws::market_stream))
            .with_state(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Binds and serves until the process exits.
    ///
    /// # Errors
    /// Fails when the address cannot be bound.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr, "web api listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}
