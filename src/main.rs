use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use solana_client::nonblocking::rpc_client::RpcClient;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use solana_copy_trader::analytics::stats::Stats;
use solana_copy_trader::config::{Config, TradeMode};
use solana_copy_trader::detector::buy_detector::BuyDetector;
use solana_copy_trader::detector::seen_cache::SeenCache;
use solana_copy_trader::error::{AppError, Result};
use solana_copy_trader::http::broadcaster::Broadcaster;
use solana_copy_trader::notify::telegram::TelegramNotifier;
use solana_copy_trader::notify::{NoopNotifier, Notifier};
use solana_copy_trader::oracle::price::{PriceOracle, PriceSource};
use solana_copy_trader::pipeline::mint_state::MintStateMap;
use solana_copy_trader::pipeline::router::EventRouter;
use solana_copy_trader::pipeline::watcher::{WatcherConfig, WatcherManager};
use solana_copy_trader::server::routes::{build_router, AppContext};
use solana_copy_trader::store::positions::PositionStore;
use solana_copy_trader::trading::executor::{Executor, TradeExecutor};
use solana_copy_trader::trading::router::SwapRouter;
use solana_copy_trader::trading::signer::TransactionSigner;
use solana_copy_trader::utils::time::minutes;
use solana_copy_trader::utils::token::{BalanceSource, ChainBalanceSource, PaperBalanceSource};
use solana_copy_trader::wallets::registry::WalletRegistry;
use solana_copy_trader::wallets::tracker::{
    HeliusRegistrar, HttpWalletSource, NoopRegistrar, WalletSource, WebhookRegistrar,
};
use solana_copy_trader::wallets::WalletRefresher;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.log_level);
    info!(mode = ?config.trade_mode, "starting copy trader");

    let data_dir = PathBuf::from(&config.data_dir);
    let seen = SeenCache::load(
        data_dir.join("seen.json"),
        minutes(config.buy_debounce_minutes),
    );
    let positions = Arc::new(PositionStore::load(data_dir.join("positions.json")));

    let broadcaster = Arc::new(Broadcaster::new(
        config.rpc_endpoints.clone(),
        config.broadcast_max_wait_ms,
    )?);
    let oracle: Arc<dyn PriceSource> = Arc::new(PriceOracle::new(
        config.jupiter_price_url.clone(),
        config.birdeye_api_key.clone(),
    )?);
    let signer = Arc::new(TransactionSigner::new(&config.trader_secret_key)?);
    let rpc = Arc::new(RpcClient::new(broadcaster.primary_endpoint().to_string()));

    let swap_router = SwapRouter::new(&config, signer.clone(), broadcaster.clone(), oracle.clone())?;
    let executor: Arc<dyn TradeExecutor> = Arc::new(Executor::new(
        config.trade_mode,
        swap_router,
        oracle.clone(),
        rpc.clone(),
        signer.pubkey(),
        config.buy_sol_amount,
        config.min_trade_interval_ms,
        config.venue_fallback_enabled,
        config.force_venue_fallback,
    ));

    let balances: Arc<dyn BalanceSource> = match config.trade_mode {
        TradeMode::Live => Arc::new(ChainBalanceSource::new(rpc.clone(), signer.pubkey())),
        TradeMode::Paper => Arc::new(PaperBalanceSource::new(positions.clone())),
    };

    let notifier: Arc<dyn Notifier> =
        match (&config.telegram_bot_token, &config.telegram_chat_id) {
            (Some(token), Some(chat_id)) => {
                Arc::new(TelegramNotifier::new(token.clone(), chat_id.clone())?)
            }
            _ => {
                info!("no notification channel configured");
                Arc::new(NoopNotifier)
            }
        };

    let registry = Arc::new(WalletRegistry::new(Vec::new()));
    let source: Arc<dyn WalletSource> = Arc::new(HttpWalletSource::new(
        config.tracker_url.clone(),
        config.tracker_api_key.clone(),
        config.tracked_wallet_limit,
        Some(broadcaster.clone()),
    )?);
    let registrar: Arc<dyn WebhookRegistrar> =
        match (&config.helius_api_key, &config.webhook_url) {
            (Some(api_key), Some(webhook_url)) => Arc::new(HeliusRegistrar::new(
                api_key.clone(),
                webhook_url.clone(),
                config.webhook_secret.clone(),
            )?),
            _ => Arc::new(NoopRegistrar),
        };
    let refresher = Arc::new(WalletRefresher::new(
        source,
        registrar,
        registry.clone(),
        notifier.clone(),
    ));

    let stats = Arc::new(Stats::new());
    let mint_state = Arc::new(MintStateMap::new(
        config.watcher_base_backoff_ms,
        config.watcher_max_backoff_ms,
    ));
    let watchers = WatcherManager::new();

    let events = EventRouter::new(
        BuyDetector::new(config.excluded_mints.clone(), config.min_token_amount),
        seen.clone(),
        registry.clone(),
        positions.clone(),
        mint_state,
        executor,
        oracle,
        balances,
        notifier.clone(),
        watchers,
        WatcherConfig::from_config(&config),
        stats.clone(),
        config.trade_mode,
        config.buy_sol_amount,
    );
    events.resume_watchers();

    // Hourly refresh; the first interval tick fires immediately so the
    // tracked set is populated before traffic arrives.
    tokio::spawn(
        refresher
            .clone()
            .run_periodic(Duration::from_secs(config.refresh_interval_secs)),
    );

    // Housekeeping: dedup-cache pruning and a stats line.
    {
        let seen = seen.clone();
        let stats = stats.clone();
        let positions = positions.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                seen.prune();
                if let Err(e) = seen.persist() {
                    warn!("dedup snapshot write failed: {}", e);
                }
                stats.log_stats();
                info!(
                    open = positions.open_count(),
                    closed = positions.closed_count(),
                    "positions"
                );
            }
        });
    }

    let app = build_router(AppContext {
        events,
        refresher,
        registry,
        positions: positions.clone(),
        stats,
        webhook_secret: config.webhook_secret.clone(),
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Init(format!("failed to bind {}: {}", addr, e)))?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(AppError::Io)?;

    info!("shutting down, snapshotting state");
    if let Err(e) = seen.persist() {
        warn!("dedup snapshot write failed: {}", e);
    }
    positions.persist();
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
