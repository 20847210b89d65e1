use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

/// Loads [`AppConfig`] by merging `Polytrade.toml`, `POLYTRADE_*` environment
/// variables, and the flat legacy variable names the deployment scripts use.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from the default locations.
    ///
    /// Merge order (later wins): defaults, `Polytrade.toml`,
    /// `POLYTRADE_SECTION__FIELD` variables, flat legacy variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a file or variable cannot be parsed into the
    /// expected type.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(Figment::new().merge(Toml::file("Polytrade.toml")))
    }

    /// Loads configuration from an explicit TOML path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or environment cannot be parsed.
    pub fn load_from_path(path: &str) -> Result<AppConfig> {
        Self::load_from(Figment::new().merge(Toml::file(path)))
    }

    fn load_from(base: Figment) -> Result<AppConfig> {
        let mut config: AppConfig = base
            .merge(Env::prefixed("POLYTRADE_").split("__"))
            .extract()?;

        apply_flat_env(&mut config)?;
        Ok(config)
    }
}

/// Applies the flat, historically-named environment variables on top of the
/// structured config. These names predate the TOML layout and remain the
/// interface the ops scripts export.
fn apply_flat_env(cfg: &mut AppConfig) -> Result<()> {
    if let Ok(v) = std::env::var("API_HOST") {
        cfg.server.host = v;
    }
    if let Ok(v) = std::env::var("API_PORT") {
        cfg.server.port = v.parse()?;
    }
    if let Ok(v) = std::env::var("CORS_ORIGIN") {
        cfg.server.cors_origin = v;
    }
    if let Ok(v) = std::env::var("POLY_PRIVKEY") {
        cfg.wallet.private_key = Some(v);
    }
    if let Ok(v) = std::env::var("POLY_PROXY_ADDRESS") {
        cfg.wallet.proxy_address = Some(v);
    }
    if let Ok(v) = std::env::var("POLY_STATE_DIR") {
        cfg.state.dir = v;
    }
    if let Ok(v) = std::env::var("POLYGON_RPC_URL") {
        cfg.rpc.polygon_rpc_url = v;
    }
    if let Ok(v) = std::env::var("INFURA_API_KEY") {
        cfg.rpc.infura_api_key = Some(v);
    }
    if let Ok(v) = std::env::var("ARB_PROFIT_THRESHOLD") {
        cfg.arbitrage.profit_threshold = v.parse()?;
    }
    if let Ok(v) = std::env::var("ARB_SCAN_INTERVAL") {
        cfg.arbitrage.scan_interval_secs = v.parse()?;
    }
    if let Ok(v) = std::env::var("ARB_MIN_VOLUME") {
        cfg.arbitrage.min_volume = v.parse()?;
    }
    if let Ok(v) = std::env::var("WHALE_MIN_TRADE") {
        cfg.whale.min_trade_usdc_value = v.parse()?;
    }
    if let Ok(v) = std::env::var("WHALE_MIN_TRADES") {
        cfg.whale.min_trades_observed = v.parse()?;
    }
    if let Ok(v) = std::env::var("WHALE_MIN_WINRATE") {
        cfg.whale.min_win_rate = v.parse()?;
    }
    if let Ok(v) = std::env::var("WHALE_MIN_PNL") {
        cfg.whale.min_pnl = v.parse()?;
    }
    if let Ok(v) = std::env::var("WHALE_MIN_VOLUME") {
        cfg.whale.min_volume = v.parse()?;
    }
    if let Ok(v) = std::env::var("WHALE_ANALYSIS_INTERVAL") {
        cfg.whale.analysis_interval_secs = v.parse()?;
    }
    if let Ok(v) = std::env::var("WHALE_MAX_BATCH") {
        cfg.whale.max_analysis_per_batch = v.parse()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Process environment is shared; serialize the tests that touch it.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn flat_env_overrides_structured_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut cfg = AppConfig::default();
        std::env::set_var("ARB_SCAN_INTERVAL", "7");
        std::env::set_var("WHALE_MIN_WINRATE", "0.61");
        let result = apply_flat_env(&mut cfg);
        std::env::remove_var("ARB_SCAN_INTERVAL");
        std::env::remove_var("WHALE_MIN_WINRATE");
        result.unwrap();

        assert_eq!(cfg.arbitrage.scan_interval_secs, 7);
        assert!((cfg.whale.min_win_rate - 0.61).abs() < f64::EPSILON);
    }

    #[test]
    fn bad_flat_env_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut cfg = AppConfig::default();
        std::env::set_var("API_PORT", "not-a-port");
        let result = apply_flat_env(&mut cfg);
        std::env::remove_var("API_PORT");
        assert!(result.is_err());
    }
}
