use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::analytics::stats::Stats;
use crate::config::TradeMode;
use crate::detector::buy_detector::{BuyDetector, BuySignal};
use crate::detector::event::EnhancedTransaction;
use crate::detector::seen_cache::SeenCache;
use crate::notify::{messages, Notifier};
use crate::oracle::price::PriceSource;
use crate::pipeline::mint_state::MintStateMap;
use crate::pipeline::watcher::{Watcher, WatcherConfig, WatcherManager};
use crate::store::positions::{OpenPosition, PositionStore};
use crate::trading::executor::TradeExecutor;
use crate::utils::time::now_ms;
use crate::utils::token::BalanceSource;
use crate::wallets::registry::WalletRegistry;

/// Webhook fan-out: detection, gating, and the buy-open-watch sequence.
/// `handle_event` never blocks on trade execution; buys run in spawned
/// tasks guarded by the per-mint in-flight lock.
pub struct EventRouter {
    detector: BuyDetector,
    seen: SeenCache,
    registry: Arc<WalletRegistry>,
    positions: Arc<PositionStore>,
    mint_state: Arc<MintStateMap>,
    executor: Arc<dyn TradeExecutor>,
    oracle: Arc<dyn PriceSource>,
    balances: Arc<dyn BalanceSource>,
    notifier: Arc<dyn Notifier>,
    watchers: Arc<WatcherManager>,
    watcher_cfg: WatcherConfig,
    stats: Arc<Stats>,
    mode: TradeMode,
    buy_sol_amount: f64,
}

impl EventRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        detector: BuyDetector,
        seen: SeenCache,
        registry: Arc<WalletRegistry>,
        positions: Arc<PositionStore>,
        mint_state: Arc<MintStateMap>,
        executor: Arc<dyn TradeExecutor>,
        oracle: Arc<dyn PriceSource>,
        balances: Arc<dyn BalanceSource>,
        notifier: Arc<dyn Notifier>,
        watchers: Arc<WatcherManager>,
        watcher_cfg: WatcherConfig,
        stats: Arc<Stats>,
        mode: TradeMode,
        buy_sol_amount: f64,
    ) -> Arc<Self> {
        Arc::new(Self {
            detector,
            seen,
            registry,
            positions,
            mint_state,
            executor,
            oracle,
            balances,
            notifier,
            watchers,
            watcher_cfg,
            stats,
            mode,
            buy_sol_amount,
        })
    }

    /// Idempotent per mint: an open position or a pending buy short-circuits
    /// everything but the signal notification.
    pub async fn handle_event(self: Arc<Self>, tx: EnhancedTransaction) {
        let tracked = self.registry.snapshot();
        let signals = self.detector.detect(&tx, &tracked, &self.seen);

        for signal in signals {
            self.stats.inc_signals();
            info!(
                wallet = %signal.wallet,
                mint = %signal.mint,
                signature = %signal.signature,
                "buy signal detected"
            );

            if let Err(e) = self.notifier.send(messages::signal_detected(&signal)).await {
                warn!("signal notice failed: {}", e);
            }

            if self.positions.has_open(&signal.mint) {
                debug!(mint = %signal.mint, "position already open, skipping");
                continue;
            }
            if !self.mint_state.try_begin_buy(&signal.mint) {
                debug!(mint = %signal.mint, "buy already in flight, skipping");
                continue;
            }

            let router = Arc::clone(&self);
            tokio::spawn(async move {
                router.run_buy(signal).await;
            });
        }
    }

    /// Buy, persist, notify, start the watcher. The in-flight lock spans
    /// the whole sequence and is released on every path.
    async fn run_buy(self: Arc<Self>, signal: BuySignal) {
        let mint = signal.mint.clone();

        match self.executor.execute_buy(&mint).await {
            Ok(fill) => {
                let position = OpenPosition {
                    mint: mint.clone(),
                    origin_wallet: signal.wallet.clone(),
                    entry_price_usd: fill.price_usd,
                    qty_atoms: fill.received_atoms,
                    decimals: fill.decimals,
                    sol_spent: Some(self.buy_sol_amount),
                    ts_open: now_ms(),
                    source_tx: signal.signature.clone(),
                    mode: self.mode,
                    strategy: fill.strategy.clone(),
                };
                self.positions.open_position(position.clone());
                self.stats.inc_buys();
                info!(mint = %mint, signature = %fill.signature, strategy = %fill.strategy, "position opened");

                if let Err(e) = self.notifier.send(messages::position_opened(&position)).await {
                    warn!("entry notice failed: {}", e);
                }
                self.start_watcher(&mint);
            }
            Err(e) => {
                self.stats.inc_failed();
                warn!(mint = %mint, "buy failed: {}", e);
            }
        }

        self.mint_state.end_buy(&mint);
    }

    pub fn start_watcher(&self, mint: &str) {
        let watcher = Watcher::new(
            mint.to_string(),
            self.watcher_cfg,
            self.positions.clone(),
            self.oracle.clone(),
            self.balances.clone(),
            self.executor.clone(),
            self.mint_state.clone(),
            self.notifier.clone(),
        );
        self.watchers.start(watcher);
    }

    /// Respawn watchers for open positions restored from a snapshot.
    pub fn resume_watchers(&self) {
        for mint in self.positions.open_mints() {
            info!(mint = %mint, "resuming watcher for restored position");
            self.start_watcher(&mint);
        }
    }
}
