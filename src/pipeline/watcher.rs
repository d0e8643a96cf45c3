use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, Result, TradeErrorKind};
use crate::notify::{messages, Notifier};
use crate::oracle::price::{PriceHints, PriceSource};
use crate::pipeline::mint_state::MintStateMap;
use crate::store::positions::PositionStore;
use crate::trading::executor::{SellRequest, TradeExecutor};
use crate::trading::router::FillReport;
use crate::utils::time::now_ms;
use crate::utils::token::BalanceSource;

const SELL_ATTEMPTS: u32 = 4;
const MIN_POLL_MS: u64 = 500;

#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    pub poll_ms: u64,
    pub take_profit_percent: f64,
    pub stop_loss_percent: f64,
    pub settle_timeout_ms: u64,
}

impl WatcherConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_ms: config.price_poll_ms,
            take_profit_percent: config.take_profit_percent,
            stop_loss_percent: config.stop_loss_percent,
            settle_timeout_ms: config.buy_settle_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Position vanished; the loop ends.
    Stopped,
    /// Position was closed this tick; the loop ends.
    Closed,
    Holding,
    Cooldown,
    NoPrice,
    Backoff,
}

fn format_percent(p: f64) -> String {
    if p.fract().abs() < f64::EPSILON {
        format!("{}", p as i64)
    } else {
        format!("{}", p)
    }
}

/// One supervision loop per open mint. The tick body is serial per mint;
/// independent mints run in parallel tasks.
pub struct Watcher {
    pub mint: String,
    cfg: WatcherConfig,
    positions: Arc<PositionStore>,
    oracle: Arc<dyn PriceSource>,
    balances: Arc<dyn BalanceSource>,
    executor: Arc<dyn TradeExecutor>,
    mint_state: Arc<MintStateMap>,
    notifier: Arc<dyn Notifier>,
}

impl Watcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mint: String,
        cfg: WatcherConfig,
        positions: Arc<PositionStore>,
        oracle: Arc<dyn PriceSource>,
        balances: Arc<dyn BalanceSource>,
        executor: Arc<dyn TradeExecutor>,
        mint_state: Arc<MintStateMap>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            mint,
            cfg,
            positions,
            oracle,
            balances,
            executor,
            mint_state,
            notifier,
        }
    }

    pub async fn run(self) {
        let period = Duration::from_millis(self.cfg.poll_ms.max(MIN_POLL_MS));
        info!(mint = %self.mint, "watcher started");
        loop {
            tokio::time::sleep(period).await;
            match self.tick().await {
                TickOutcome::Stopped | TickOutcome::Closed => break,
                _ => {}
            }
        }
        info!(mint = %self.mint, "watcher stopped");
    }

    pub async fn tick(&self) -> TickOutcome {
        let Some(position) = self.positions.get_open(&self.mint) else {
            return TickOutcome::Stopped;
        };

        let now = now_ms();
        if self.mint_state.cooldown_active(&self.mint, now) {
            return TickOutcome::Cooldown;
        }

        let hints = PriceHints {
            amount_atoms: position.qty_atoms,
            decimals: position.decimals,
            sol_spent: position.sol_spent,
        };
        let Some(quote) = self.oracle.spot_price_usd(&self.mint, hints).await else {
            return TickOutcome::NoPrice;
        };
        let price = quote.price_usd;

        let change_pct = position
            .entry_price_usd
            .filter(|e| e.is_finite() && *e != 0.0)
            .map(|entry| (price - entry) / entry * 100.0);
        let hit_tp = change_pct
            .map(|c| c >= self.cfg.take_profit_percent)
            .unwrap_or(false);
        let hit_sl = change_pct
            .map(|c| c <= -self.cfg.stop_loss_percent.abs())
            .unwrap_or(false);

        // Balance resolution failure is not the same as a zero balance;
        // skip the tick entirely when the chain could not be read.
        let Some(balance) = self.balances.balance_atoms(&self.mint).await else {
            return TickOutcome::Holding;
        };

        if balance == 0 {
            if now.saturating_sub(position.ts_open) >= self.cfg.settle_timeout_ms {
                warn!(mint = %self.mint, "no balance after settle timeout, closing");
                self.close_position(None, None, "buy_failed_no_balance").await;
                return TickOutcome::Closed;
            }
            self.mint_state.next_backoff(&self.mint, now);
            return TickOutcome::Backoff;
        }

        if !hit_tp && !hit_sl {
            return TickOutcome::Holding;
        }

        if !self.mint_state.try_begin_exit(&self.mint) {
            return TickOutcome::Holding;
        }

        let outcome = match self.sell_with_retries(balance).await {
            Ok(fill) => {
                self.mint_state.clear_backoff(&self.mint);
                let reason = if hit_tp {
                    format!("take_profit_{}%", format_percent(self.cfg.take_profit_percent))
                } else {
                    format!("stop_loss_{}%", format_percent(self.cfg.stop_loss_percent))
                };
                let exit_price = fill.price_usd.or(Some(price));
                self.close_position(exit_price, Some(fill.signature), &reason)
                    .await;
                TickOutcome::Closed
            }
            Err(e) => {
                let delay = self.mint_state.next_backoff(&self.mint, now_ms());
                warn!(
                    mint = %self.mint,
                    backoff_ms = delay.as_millis() as u64,
                    "sell failed, keeping position open: {}",
                    e
                );
                TickOutcome::Backoff
            }
        };
        self.mint_state.end_exit(&self.mint);
        outcome
    }

    /// Up to 4 attempts with 600ms + 500ms*i waits. RateLimit, NoRoute and
    /// NoBalance are definitive for this tick; only transient errors are
    /// retried inside the loop.
    async fn sell_with_retries(&self, qty_atoms: u128) -> Result<FillReport> {
        let mut last_err = AppError::transient("sell not attempted");
        for attempt in 0..SELL_ATTEMPTS {
            match self
                .executor
                .execute_sell(SellRequest {
                    mint: self.mint.clone(),
                    qty_atoms: Some(qty_atoms),
                    sell_all: true,
                    percent: None,
                })
                .await
            {
                Ok(fill) => return Ok(fill),
                Err(e) => match e.trade_kind() {
                    TradeErrorKind::RateLimit
                    | TradeErrorKind::NoRoute
                    | TradeErrorKind::NoBalance => return Err(e),
                    TradeErrorKind::Transient => {
                        debug!(mint = %self.mint, attempt, "sell attempt failed: {}", e);
                        last_err = e;
                        if attempt + 1 < SELL_ATTEMPTS {
                            tokio::time::sleep(Duration::from_millis(600 + 500 * attempt as u64))
                                .await;
                        }
                    }
                },
            }
        }
        Err(last_err)
    }

    async fn close_position(
        &self,
        exit_price_usd: Option<f64>,
        exit_tx: Option<String>,
        reason: &str,
    ) {
        let closed = self
            .positions
            .close_position(&self.mint, exit_price_usd, exit_tx, reason);
        self.mint_state.forget(&self.mint);

        if let Some(closed) = closed {
            if let Err(e) = self.notifier.send(messages::position_closed(&closed)).await {
                warn!(mint = %self.mint, "close notice failed: {}", e);
            }
        }
    }
}

/// Owns the per-mint watcher tasks: one per open position, stopped on
/// close or disappearance.
pub struct WatcherManager {
    handles: Arc<DashMap<String, JoinHandle<()>>>,
}

impl WatcherManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handles: Arc::new(DashMap::new()),
        })
    }

    pub fn start(&self, watcher: Watcher) {
        let mint = watcher.mint.clone();
        if self.handles.contains_key(&mint) {
            return;
        }

        let handles = Arc::clone(&self.handles);
        let cleanup_mint = mint.clone();
        let handle = tokio::spawn(async move {
            watcher.run().await;
            handles.remove(&cleanup_mint);
        });
        self.handles.insert(mint, handle);
    }

    pub fn stop(&self, mint: &str) {
        if let Some((_, handle)) = self.handles.remove(mint) {
            handle.abort();
        }
    }

    pub fn active_count(&self) -> usize {
        self.handles.len()
    }
}
