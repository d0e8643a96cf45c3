use std::collections::HashSet;
use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Paper,
    Live,
}

impl TradeMode {
    fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "live" => TradeMode::Live,
            _ => TradeMode::Paper,
        }
    }
}

/// Compute-unit price for aggregator swaps, in micro-lamports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityFee {
    /// p75 of recent prioritization fees reported by RPC.
    Auto,
    Fixed(u64),
}

impl PriorityFee {
    fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => PriorityFee::Auto,
            other => other
                .parse::<u64>()
                .map(PriorityFee::Fixed)
                .unwrap_or(PriorityFee::Auto),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // General
    pub log_level: String,
    pub port: u16,
    pub data_dir: String,

    // Trading
    pub trade_mode: TradeMode,
    pub buy_sol_amount: f64,
    pub take_profit_percent: f64,
    pub stop_loss_percent: f64,
    pub min_trade_interval_ms: u64,

    // Watcher
    pub price_poll_ms: u64,
    pub buy_settle_timeout_ms: u64,
    pub watcher_base_backoff_ms: u64,
    pub watcher_max_backoff_ms: u64,

    // Detection
    pub buy_debounce_minutes: u64,
    pub excluded_mints: HashSet<String>,
    pub min_token_amount: u128,

    // Jupiter
    pub jupiter_quote_url: String,
    pub jupiter_swap_url: String,
    pub jupiter_price_url: String,
    pub jup_slippage_bps: u16,
    pub jup_priority_fee: PriorityFee,

    // Venue fallback
    pub venue_fallback_enabled: bool,
    pub force_venue_fallback: bool,
    pub venue_trade_url: String,
    pub venue_slippage_bps: u16,
    pub venue_priority_fee_sol: f64,
    pub venue_pool: String,

    // RPC
    pub rpc_endpoints: Vec<String>,
    pub broadcast_max_wait_ms: u64,

    // Signer
    pub trader_secret_key: String,

    // Wallet tracking
    pub tracker_url: String,
    pub tracker_api_key: Option<String>,
    pub tracked_wallet_limit: usize,
    pub refresh_interval_secs: u64,
    pub helius_api_key: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,

    // Oracle
    pub birdeye_api_key: Option<String>,

    // Notifications
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn var_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_csv_set(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let trader_secret_key = env::var("TRADER_SECRET_KEY")
            .map_err(|_| AppError::Config("TRADER_SECRET_KEY must be set".into()))?;

        let rpc_raw = var_or("RPC_ENDPOINTS", "https://api.mainnet-beta.solana.com");
        let rpc_endpoints = crate::http::broadcaster::parse_endpoints(&rpc_raw);
        if rpc_endpoints.is_empty() {
            return Err(AppError::Config(
                "RPC_ENDPOINTS contained no usable http(s) endpoints".into(),
            ));
        }

        Ok(Self {
            log_level: var_or("LOG_LEVEL", "info"),
            port: parse_or("PORT", 8080),
            data_dir: var_or("DATA_DIR", "data"),

            trade_mode: TradeMode::parse(&var_or("TRADE_MODE", "paper")),
            buy_sol_amount: parse_or("BUY_SOL_AMOUNT", 0.05),
            take_profit_percent: parse_or("TAKE_PROFIT_PERCENT", 20.0),
            stop_loss_percent: parse_or("STOP_LOSS_PERCENT", 10.0),
            min_trade_interval_ms: parse_or("MIN_TRADE_INTERVAL_MS", 1500),

            price_poll_ms: parse_or("PRICE_POLL_MS", 3000u64).max(500),
            buy_settle_timeout_ms: parse_or("BUY_SETTLE_TIMEOUT_MS", 45_000),
            watcher_base_backoff_ms: parse_or("WATCHER_BASE_BACKOFF_MS", 1500),
            watcher_max_backoff_ms: parse_or("WATCHER_MAX_BACKOFF_MS", 60_000),

            buy_debounce_minutes: parse_or("BUY_DEBOUNCE_MINUTES", 10),
            excluded_mints: parse_csv_set(&var_or("EXCLUDED_MINTS", "")),
            min_token_amount: parse_or("MIN_TOKEN_AMOUNT", 0u128),

            jupiter_quote_url: var_or("JUPITER_QUOTE_URL", "https://api.jup.ag/swap/v1/quote"),
            jupiter_swap_url: var_or("JUPITER_SWAP_URL", "https://api.jup.ag/swap/v1/swap"),
            jupiter_price_url: var_or("JUPITER_PRICE_URL", "https://api.jup.ag/price/v2"),
            jup_slippage_bps: parse_or("JUP_SLIPPAGE_BPS", 300),
            jup_priority_fee: PriorityFee::parse(&var_or("JUP_PRIORITY_FEE_LAMPORTS", "auto")),

            venue_fallback_enabled: parse_or("VENUE_FALLBACK_ENABLED", true),
            force_venue_fallback: parse_or("FORCE_VENUE_FALLBACK", false),
            venue_trade_url: var_or("VENUE_TRADE_URL", "https://pumpportal.fun/api/trade-local"),
            venue_slippage_bps: parse_or("VENUE_SLIPPAGE_BPS", 500),
            venue_priority_fee_sol: parse_or("VENUE_PRIORITY_FEE_SOL", 0.0005),
            venue_pool: var_or("VENUE_POOL", "auto"),

            rpc_endpoints,
            broadcast_max_wait_ms: parse_or("BROADCAST_MAX_WAIT_MS", 30_000),

            trader_secret_key,

            tracker_url: var_or("TRACKER_URL", "https://api.solanatracker.io/top-traders/all"),
            tracker_api_key: var_opt("TRACKER_API_KEY"),
            tracked_wallet_limit: parse_or("TRACKED_WALLET_LIMIT", 25),
            refresh_interval_secs: parse_or("REFRESH_INTERVAL_SECS", 3600),
            helius_api_key: var_opt("HELIUS_API_KEY"),
            webhook_url: var_opt("WEBHOOK_URL"),
            webhook_secret: var_opt("WEBHOOK_SECRET"),

            birdeye_api_key: var_opt("BIRDEYE_API_KEY"),

            telegram_bot_token: var_opt("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: var_opt("TELEGRAM_CHAT_ID"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_csv_set_trims_and_drops_empties() {
        let set = parse_csv_set("So111, EPjF ,, USDC1\n");
        assert_eq!(set.len(), 3);
        assert!(set.contains("EPjF"));
    }

    #[test]
    fn priority_fee_parses_auto_and_fixed() {
        assert_eq!(PriorityFee::parse("auto"), PriorityFee::Auto);
        assert_eq!(PriorityFee::parse(""), PriorityFee::Auto);
        assert_eq!(PriorityFee::parse("250000"), PriorityFee::Fixed(250_000));
        assert_eq!(PriorityFee::parse("not-a-number"), PriorityFee::Auto);
    }

    #[test]
    fn trade_mode_defaults_to_paper() {
        assert_eq!(TradeMode::parse("live"), TradeMode::Live);
        assert_eq!(TradeMode::parse("LIVE"), TradeMode::Live);
        assert_eq!(TradeMode::parse("anything-else"), TradeMode::Paper);
    }
}
