use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use crate::config::TradeMode;
use crate::error::{AppError, Result};
use crate::oracle::price::{PriceHints, PriceSource};
use crate::trading::router::{FillReport, SwapRequest, SwapRouter};
use crate::trading::{is_venue_mint, LAMPORTS_PER_SOL, SOL_MINT};
use crate::utils::time::now_ms;
use crate::utils::token::{get_decimals, resolve_balance_with_ladder};

/// Decimals assumed for synthesized paper fills; paper PnL only depends on
/// prices, so the exact scale is cosmetic.
const PAPER_DECIMALS: u8 = 9;

const THROTTLE_JITTER_MS: u64 = 250;

#[derive(Debug, Clone, Default)]
pub struct SellRequest {
    pub mint: String,
    pub qty_atoms: Option<u128>,
    pub sell_all: bool,
    pub percent: Option<f64>,
}

#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute_buy(&self, mint: &str) -> Result<FillReport>;
    async fn execute_sell(&self, req: SellRequest) -> Result<FillReport>;
}

/// Process-wide minimum spacing between network-impacting trade calls.
/// The lock is held across the wait so all callers serialize through it.
pub struct TradeThrottle {
    last: tokio::sync::Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl TradeThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            last: tokio::sync::Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let jitter =
                Duration::from_millis(rand::thread_rng().gen_range(0..THROTTLE_JITTER_MS));
            let gate = self.min_interval + jitter;
            let elapsed = prev.elapsed();
            if elapsed < gate {
                tokio::time::sleep(gate - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

pub struct Executor {
    mode: TradeMode,
    router: SwapRouter,
    oracle: Arc<dyn PriceSource>,
    throttle: TradeThrottle,
    rpc: Arc<RpcClient>,
    owner: Pubkey,
    buy_sol_amount: f64,
    venue_enabled: bool,
    force_venue: bool,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mode: TradeMode,
        router: SwapRouter,
        oracle: Arc<dyn PriceSource>,
        rpc: Arc<RpcClient>,
        owner: Pubkey,
        buy_sol_amount: f64,
        min_trade_interval_ms: u64,
        venue_enabled: bool,
        force_venue: bool,
    ) -> Self {
        Self {
            mode,
            router,
            oracle,
            throttle: TradeThrottle::new(min_trade_interval_ms),
            rpc,
            owner,
            buy_sol_amount,
            venue_enabled,
            force_venue,
        }
    }

    async fn paper_buy(&self, mint: &str) -> Result<FillReport> {
        let quote = self.oracle.spot_price_usd(mint, PriceHints::default()).await;
        let native = self.oracle.native_usd().await;

        let (received_atoms, decimals) = match (&quote, native) {
            (Some(q), Some(native_usd)) if q.price_usd > 0.0 => {
                let ui = self.buy_sol_amount * native_usd / q.price_usd;
                (
                    Some((ui * 10f64.powi(PAPER_DECIMALS as i32)) as u128),
                    Some(PAPER_DECIMALS),
                )
            }
            _ => (None, None),
        };

        Ok(FillReport {
            signature: format!("paper-{}", now_ms()),
            received_atoms,
            decimals,
            price_usd: quote.map(|q| q.price_usd),
            strategy: "paper".to_string(),
            endpoint_used: "paper".to_string(),
        })
    }

    async fn paper_sell(&self, req: &SellRequest) -> Result<FillReport> {
        let quote = self.oracle.spot_price_usd(&req.mint, PriceHints::default()).await;
        Ok(FillReport {
            signature: format!("paper-{}", now_ms()),
            received_atoms: req.qty_atoms,
            decimals: None,
            price_usd: quote.map(|q| q.price_usd),
            strategy: "paper".to_string(),
            endpoint_used: "paper".to_string(),
        })
    }
}

#[async_trait]
impl TradeExecutor for Executor {
    async fn execute_buy(&self, mint: &str) -> Result<FillReport> {
        self.throttle.acquire().await;

        if self.mode == TradeMode::Paper {
            return self.paper_buy(mint).await;
        }

        let lamports = (self.buy_sol_amount * LAMPORTS_PER_SOL as f64) as u128;
        let mut fill = self
            .router
            .swap(&SwapRequest {
                input_mint: SOL_MINT.to_string(),
                output_mint: mint.to_string(),
                amount_atoms: lamports,
                is_buy: true,
            })
            .await?;

        if fill.decimals.is_none() {
            if let Ok(mint_pk) = Pubkey::from_str(mint) {
                fill.decimals = get_decimals(&self.rpc, &mint_pk).await.ok();
            }
        }
        if fill.price_usd.is_none() {
            let hints = PriceHints {
                amount_atoms: fill.received_atoms,
                decimals: fill.decimals,
                sol_spent: Some(self.buy_sol_amount),
            };
            fill.price_usd = self
                .oracle
                .spot_price_usd(mint, hints)
                .await
                .map(|q| q.price_usd);
        }

        info!(
            mint,
            signature = %fill.signature,
            strategy = %fill.strategy,
            "buy filled"
        );
        Ok(fill)
    }

    async fn execute_sell(&self, req: SellRequest) -> Result<FillReport> {
        self.throttle.acquire().await;

        if self.mode == TradeMode::Paper {
            return self.paper_sell(&req).await;
        }

        // Venue-marked mints sell through the venue first; the aggregator
        // frequently has no exit route for them either.
        if self.venue_enabled && (is_venue_mint(&req.mint) || self.force_venue) {
            match self.router.venue_sell_all(&req.mint).await {
                Ok(fill) => return Ok(fill),
                Err(e) => {
                    let e = e.annotate_rate_limit();
                    warn!(mint = %req.mint, "venue sell failed, falling back to aggregator: {}", e);
                }
            }
        }

        let qty = match req.qty_atoms {
            Some(qty) => qty,
            None => {
                let mint_pk = Pubkey::from_str(&req.mint)?;
                let (amount, _) =
                    resolve_balance_with_ladder(&self.rpc, &self.owner, &mint_pk).await;
                amount
            }
        };
        if qty == 0 {
            return Err(AppError::no_balance(format!("no holdings for {}", req.mint)));
        }

        let qty = match req.percent {
            Some(pct) if !req.sell_all && pct > 0.0 && pct < 100.0 => {
                qty.saturating_mul((pct * 100.0) as u128) / 10_000
            }
            _ => qty,
        };

        self.router
            .swap(&SwapRequest {
                input_mint: req.mint.clone(),
                output_mint: SOL_MINT.to_string(),
                amount_atoms: qty,
                is_buy: false,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PriorityFee};
    use crate::http::broadcaster::Broadcaster;
    use crate::oracle::price::PriceQuote;
    use crate::trading::signer::TransactionSigner;
    use solana_sdk::signature::Keypair;
    use std::collections::HashSet;

    struct FixedPrice {
        token_usd: f64,
        native_usd: f64,
    }

    #[async_trait]
    impl PriceSource for FixedPrice {
        async fn spot_price_usd(&self, _mint: &str, _hints: PriceHints) -> Option<PriceQuote> {
            Some(PriceQuote {
                price_usd: self.token_usd,
                source: "test",
            })
        }

        async fn native_usd(&self) -> Option<f64> {
            Some(self.native_usd)
        }
    }

    fn test_config() -> Config {
        Config {
            log_level: "info".into(),
            port: 0,
            data_dir: "data".into(),
            trade_mode: TradeMode::Paper,
            buy_sol_amount: 0.05,
            take_profit_percent: 20.0,
            stop_loss_percent: 10.0,
            min_trade_interval_ms: 0,
            price_poll_ms: 500,
            buy_settle_timeout_ms: 45_000,
            watcher_base_backoff_ms: 1500,
            watcher_max_backoff_ms: 60_000,
            buy_debounce_minutes: 10,
            excluded_mints: HashSet::new(),
            min_token_amount: 0,
            jupiter_quote_url: "http://127.0.0.1:1/quote".into(),
            jupiter_swap_url: "http://127.0.0.1:1/swap".into(),
            jupiter_price_url: "http://127.0.0.1:1/price".into(),
            jup_slippage_bps: 300,
            jup_priority_fee: PriorityFee::Auto,
            venue_fallback_enabled: true,
            force_venue_fallback: false,
            venue_trade_url: "http://127.0.0.1:1/trade-local".into(),
            venue_slippage_bps: 500,
            venue_priority_fee_sol: 0.0005,
            venue_pool: "auto".into(),
            rpc_endpoints: vec!["http://127.0.0.1:1".into()],
            broadcast_max_wait_ms: 1_000,
            trader_secret_key: String::new(),
            tracker_url: "http://127.0.0.1:1/top".into(),
            tracker_api_key: None,
            tracked_wallet_limit: 25,
            refresh_interval_secs: 3600,
            helius_api_key: None,
            webhook_url: None,
            webhook_secret: None,
            birdeye_api_key: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }

    fn paper_executor(oracle: Arc<dyn PriceSource>) -> Executor {
        let config = test_config();
        let keypair = Keypair::new();
        let signer = Arc::new(
            TransactionSigner::new(&bs58::encode(keypair.to_bytes()).into_string()).unwrap(),
        );
        let broadcaster = Arc::new(
            Broadcaster::new(config.rpc_endpoints.clone(), config.broadcast_max_wait_ms).unwrap(),
        );
        let router =
            SwapRouter::new(&config, signer.clone(), broadcaster, oracle.clone()).unwrap();
        let rpc = Arc::new(RpcClient::new("http://127.0.0.1:1".to_string()));

        Executor::new(
            TradeMode::Paper,
            router,
            oracle,
            rpc,
            signer.pubkey(),
            config.buy_sol_amount,
            config.min_trade_interval_ms,
            config.venue_fallback_enabled,
            config.force_venue_fallback,
        )
    }

    #[tokio::test]
    async fn paper_buy_synthesizes_fill_from_oracle() {
        let oracle = Arc::new(FixedPrice {
            token_usd: 0.01,
            native_usd: 200.0,
        });
        let executor = paper_executor(oracle);

        let fill = executor.execute_buy("MintA").await.unwrap();
        assert!(fill.signature.starts_with("paper-"));
        assert_eq!(fill.strategy, "paper");
        assert_eq!(fill.price_usd, Some(0.01));
        // 0.05 SOL * $200 / $0.01 = 1000 ui tokens at paper decimals.
        assert_eq!(fill.received_atoms, Some(1_000 * 10u128.pow(9)));
    }

    #[tokio::test]
    async fn paper_sell_echoes_quantity() {
        let oracle = Arc::new(FixedPrice {
            token_usd: 0.013,
            native_usd: 200.0,
        });
        let executor = paper_executor(oracle);

        let fill = executor
            .execute_sell(SellRequest {
                mint: "MintA".into(),
                qty_atoms: Some(42),
                sell_all: true,
                percent: None,
            })
            .await
            .unwrap();
        assert_eq!(fill.received_atoms, Some(42));
        assert_eq!(fill.price_usd, Some(0.013));
    }

    #[tokio::test]
    async fn throttle_spaces_consecutive_calls() {
        let throttle = TradeThrottle::new(120);
        let start = Instant::now();
        throttle.acquire().await;
        throttle.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(120));
    }
}
