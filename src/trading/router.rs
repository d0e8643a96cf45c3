use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info, warn};

use crate::config::{Config, PriorityFee};
use crate::error::{AppError, Result, TradeErrorKind};
use crate::http::broadcaster::Broadcaster;
use crate::oracle::price::PriceSource;
use crate::trading::jupiter::{JupiterClient, QuoteResponse, QuoteTier};
use crate::trading::signer::TransactionSigner;
use crate::trading::venue::VenueClient;
use crate::trading::{is_venue_mint, LAMPORTS_PER_SOL};
use crate::utils::token::resolve_balance_with_ladder;

const QUOTE_SWEEPS: u32 = 3;
const SWEEP_BACKOFF: Duration = Duration::from_millis(500);
const QUOTE_TIERS: [QuoteTier; 3] = [
    QuoteTier::DirectPreferred,
    QuoteTier::AnyRoute,
    QuoteTier::Bridge,
];

/// Outcome of one swap: the signature is authoritative once broadcast;
/// everything else may be reconstructed or absent.
#[derive(Debug, Clone)]
pub struct FillReport {
    pub signature: String,
    pub received_atoms: Option<u128>,
    pub decimals: Option<u8>,
    pub price_usd: Option<f64>,
    pub strategy: String,
    pub endpoint_used: String,
}

#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub input_mint: String,
    pub output_mint: String,
    pub amount_atoms: u128,
    pub is_buy: bool,
}

pub struct SwapRouter {
    jupiter: JupiterClient,
    venue: VenueClient,
    signer: Arc<TransactionSigner>,
    broadcaster: Arc<Broadcaster>,
    oracle: Arc<dyn PriceSource>,
    priority_fee: PriorityFee,
    venue_enabled: bool,
    force_venue: bool,
}

impl SwapRouter {
    pub fn new(
        config: &Config,
        signer: Arc<TransactionSigner>,
        broadcaster: Arc<Broadcaster>,
        oracle: Arc<dyn PriceSource>,
    ) -> Result<Self> {
        Ok(Self {
            jupiter: JupiterClient::new(
                config.jupiter_quote_url.clone(),
                config.jupiter_swap_url.clone(),
                config.jup_slippage_bps,
            )?,
            venue: VenueClient::new(
                config.venue_trade_url.clone(),
                config.venue_slippage_bps,
                config.venue_priority_fee_sol,
                config.venue_pool.clone(),
            )?,
            signer,
            broadcaster,
            oracle,
            priority_fee: config.jup_priority_fee,
            venue_enabled: config.venue_fallback_enabled,
            force_venue: config.force_venue_fallback,
        })
    }

    pub fn venue_eligible(&self, mint: &str) -> bool {
        self.venue_enabled && (is_venue_mint(mint) || self.force_venue)
    }

    /// Quote -> build -> sign -> broadcast -> confirm. Falls back to the
    /// venue path for unroutable buys of venue-marked mints.
    pub async fn swap(&self, req: &SwapRequest) -> Result<FillReport> {
        match self.quote_ladder(req).await {
            Ok((quote, tier)) => self.execute_aggregator(&quote, tier).await,
            Err(e)
                if e.trade_kind() == TradeErrorKind::NoRoute
                    && req.is_buy
                    && self.venue_eligible(&req.output_mint) =>
            {
                info!(mint = %req.output_mint, "no aggregator route, trying venue fallback");
                self.venue_buy(&req.output_mint, req.amount_atoms).await
            }
            Err(e) => Err(e),
        }
    }

    /// Sweep the tier ladder up to QUOTE_SWEEPS times with linear backoff
    /// between sweeps; fresh pools often index between sweeps.
    async fn quote_ladder(&self, req: &SwapRequest) -> Result<(QuoteResponse, QuoteTier)> {
        let mut last_err = None;

        for sweep in 0..QUOTE_SWEEPS {
            if sweep > 0 {
                tokio::time::sleep(SWEEP_BACKOFF * sweep).await;
            }

            for tier in QUOTE_TIERS {
                match self
                    .jupiter
                    .get_quote(&req.input_mint, &req.output_mint, req.amount_atoms, tier)
                    .await
                {
                    Ok(quote) => return Ok((quote, tier)),
                    Err(e) if e.trade_kind() == TradeErrorKind::RateLimit => return Err(e),
                    Err(e) => {
                        debug!(
                            tier = tier.strategy_tag(),
                            sweep,
                            "quote attempt failed: {}",
                            e
                        );
                        last_err = Some(e);
                    }
                }
            }
        }

        match last_err {
            Some(e) if e.trade_kind() == TradeErrorKind::NoRoute => Err(AppError::no_route(
                format!("no route for {} across all tiers", req.output_mint),
            )),
            Some(e) => Err(e),
            None => Err(AppError::no_route("quote ladder produced no result")),
        }
    }

    async fn execute_aggregator(
        &self,
        quote: &QuoteResponse,
        tier: QuoteTier,
    ) -> Result<FillReport> {
        let cu_price = self.resolve_priority_fee().await;
        let swap = self
            .jupiter
            .get_swap_tx(quote, &self.signer.pubkey_string(), cu_price)
            .await?;

        let signed = self.signer.sign_transaction_base64(&swap.swap_transaction)?;
        let broadcast = self.broadcaster.broadcast_and_confirm(&signed).await?;

        Ok(FillReport {
            signature: broadcast.signature,
            received_atoms: quote.out_atoms(),
            decimals: None,
            price_usd: None,
            strategy: tier.strategy_tag().to_string(),
            endpoint_used: broadcast.endpoint_used,
        })
    }

    async fn venue_buy(&self, mint: &str, lamports: u128) -> Result<FillReport> {
        let sol_amount = lamports as f64 / LAMPORTS_PER_SOL as f64;
        let tx_bytes = self
            .venue
            .build_buy_tx(&self.signer.pubkey_string(), mint, sol_amount)
            .await
            .map_err(AppError::annotate_rate_limit)?;

        let signed = self.signer.sign_transaction_bytes(&tx_bytes)?;
        let broadcast = self.broadcaster.broadcast_and_confirm(&signed).await?;

        let (received_atoms, decimals) = self
            .reconstruct_venue_fill(&broadcast.endpoint_used, &broadcast.signature, mint)
            .await;

        let price_usd = match (received_atoms, decimals, self.oracle.native_usd().await) {
            (Some(received), Some(dec), Some(native_usd)) if received > 0 => {
                let ui_received = received as f64 / 10f64.powi(dec as i32);
                let price = native_usd * sol_amount / ui_received;
                price.is_finite().then_some(price)
            }
            _ => None,
        };

        Ok(FillReport {
            signature: broadcast.signature,
            received_atoms,
            decimals,
            price_usd,
            strategy: "venue-fallback".to_string(),
            endpoint_used: broadcast.endpoint_used,
        })
    }

    /// Sell the full holding through the venue. Used when the aggregator
    /// has no route for a venue-marked mint.
    pub async fn venue_sell_all(&self, mint: &str) -> Result<FillReport> {
        let tx_bytes = self
            .venue
            .build_sell_all_tx(&self.signer.pubkey_string(), mint)
            .await
            .map_err(AppError::annotate_rate_limit)?;

        let signed = self.signer.sign_transaction_bytes(&tx_bytes)?;
        let broadcast = self.broadcaster.broadcast_and_confirm(&signed).await?;

        Ok(FillReport {
            signature: broadcast.signature,
            received_atoms: None,
            decimals: None,
            price_usd: None,
            strategy: "venue-fallback".to_string(),
            endpoint_used: broadcast.endpoint_used,
        })
    }

    /// Meta lookup on the confirming endpoint first (endpoint affinity),
    /// then the token-account ladder on the same endpoint. Reconstruction
    /// failures degrade to None; the signature already stands.
    async fn reconstruct_venue_fill(
        &self,
        endpoint: &str,
        signature: &str,
        mint: &str,
    ) -> (Option<u128>, Option<u8>) {
        let owner = self.signer.pubkey_string();

        match self.broadcaster.get_transaction_on(endpoint, signature).await {
            Ok(value) if !value.is_null() => {
                if let Some(found) = received_from_meta(&value, &owner, mint) {
                    return found;
                }
            }
            Ok(_) => debug!(signature, "transaction meta not yet indexed"),
            Err(e) => warn!(signature, "meta lookup failed: {}", e),
        }

        let Ok(mint_pk) = Pubkey::from_str(mint) else {
            return (None, None);
        };
        let rpc =
            RpcClient::new_with_commitment(endpoint.to_string(), CommitmentConfig::confirmed());
        let (amount, decimals) =
            resolve_balance_with_ladder(&rpc, &self.signer.pubkey(), &mint_pk).await;
        if amount > 0 {
            (Some(amount), decimals)
        } else {
            (None, None)
        }
    }

    async fn resolve_priority_fee(&self) -> Option<u64> {
        match self.priority_fee {
            PriorityFee::Fixed(v) => Some(v),
            PriorityFee::Auto => self.broadcaster.recent_priority_fee_p75().await,
        }
    }
}

/// Pick the (amount, decimals) entry for (owner, mint) out of a
/// pre/postTokenBalances array of a jsonParsed transaction meta.
fn token_balance_entry(balances: Option<&Value>, owner: &str, mint: &str) -> Option<(u128, u8)> {
    for entry in balances?.as_array()? {
        if entry.get("mint").and_then(Value::as_str) != Some(mint) {
            continue;
        }
        if entry.get("owner").and_then(Value::as_str) != Some(owner) {
            continue;
        }
        let token_amount = entry.get("uiTokenAmount")?;
        let amount = token_amount
            .get("amount")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u128>().ok())?;
        let decimals = token_amount.get("decimals").and_then(Value::as_u64).unwrap_or(0) as u8;
        return Some((amount, decimals));
    }
    None
}

/// `received = max(0, post - pre)` over the (owner, mint) token balances.
/// None when the post balance is not present in the meta.
fn received_from_meta(
    tx_value: &Value,
    owner: &str,
    mint: &str,
) -> Option<(Option<u128>, Option<u8>)> {
    let meta = tx_value.get("meta")?;

    let (post, decimals) = token_balance_entry(meta.get("postTokenBalances"), owner, mint)?;
    let pre = token_balance_entry(meta.get("preTokenBalances"), owner, mint)
        .map(|(amount, _)| amount)
        .unwrap_or(0);

    Some((Some(post.saturating_sub(pre)), Some(decimals)))
}
