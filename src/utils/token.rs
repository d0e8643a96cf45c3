use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_account_decoder::UiAccountData;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use spl_token::state::{Account as TokenAccount, Mint};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::store::positions::PositionStore;

const LADDER_ATTEMPTS: u32 = 3;
const LADDER_DELAY: Duration = Duration::from_millis(300);

/// Fast path: balance of the wallet's associated token account.
pub async fn get_ata_balance(rpc: &RpcClient, wallet: &Pubkey, mint: &Pubkey) -> Result<u64> {
    let ata = spl_associated_token_account::get_associated_token_address(wallet, mint);

    match rpc.get_account(&ata).await {
        Ok(account) => {
            let token_account = TokenAccount::unpack(&account.data)
                .map_err(|e| AppError::Parse(format!("Failed to unpack token account: {}", e)))?;
            Ok(token_account.amount)
        }
        Err(_) => {
            let balance = rpc
                .get_token_account_balance(&ata)
                .await
                .map_err(|e| AppError::Rpc(format!("token balance lookup: {}", e)))?;
            balance
                .amount
                .parse()
                .map_err(|e| AppError::Parse(format!("Invalid balance amount: {}", e)))
        }
    }
}

/// Largest parsed token account for (owner, mint) at the given commitment.
/// Returns None when the owner holds no account for the mint.
pub async fn largest_token_balance(
    rpc: &RpcClient,
    owner: &Pubkey,
    mint: &Pubkey,
    commitment: CommitmentConfig,
) -> Result<Option<(u128, u8)>> {
    let accounts = rpc
        .get_token_accounts_by_owner_with_commitment(
            owner,
            TokenAccountsFilter::Mint(*mint),
            commitment,
        )
        .await
        .map_err(|e| AppError::Rpc(format!("getTokenAccountsByOwner: {}", e)))?
        .value;

    let mut best: Option<(u128, u8)> = None;
    for keyed in accounts {
        let UiAccountData::Json(parsed) = keyed.account.data else {
            continue;
        };
        let token_amount = &parsed.parsed["info"]["tokenAmount"];
        let Some(amount) = token_amount["amount"]
            .as_str()
            .and_then(|s| s.parse::<u128>().ok())
        else {
            continue;
        };
        let decimals = token_amount["decimals"].as_u64().unwrap_or(0) as u8;

        if best.map(|(a, _)| amount > a).unwrap_or(true) {
            best = Some((amount, decimals));
        }
    }
    Ok(best)
}

/// Two-tier retry ladder: poll at `confirmed`, then `finalized`, to bridge
/// the gap between broadcast and account indexing. Returns the first
/// nonzero balance seen, or (0, None) when every attempt comes back empty.
pub async fn resolve_balance_with_ladder(
    rpc: &RpcClient,
    owner: &Pubkey,
    mint: &Pubkey,
) -> (u128, Option<u8>) {
    for commitment in [CommitmentConfig::confirmed(), CommitmentConfig::finalized()] {
        for attempt in 0..LADDER_ATTEMPTS {
            match largest_token_balance(rpc, owner, mint, commitment).await {
                Ok(Some((amount, decimals))) if amount > 0 => return (amount, Some(decimals)),
                Ok(_) => {}
                Err(e) => debug!(%mint, attempt, "balance ladder step failed: {}", e),
            }
            tokio::time::sleep(LADDER_DELAY).await;
        }
    }
    (0, None)
}

/// Mint decimals, fetched once per live buy. Aggregator fills report the
/// received amount in atoms but not the scale, and the watcher's PnL math
/// needs UI prices.
pub async fn get_decimals(rpc: &RpcClient, mint: &Pubkey) -> Result<u8> {
    let account = rpc
        .get_account(mint)
        .await
        .map_err(|e| AppError::Rpc(format!("mint account fetch for {}: {}", mint, e)))?;

    let state = Mint::unpack(&account.data)
        .map_err(|e| AppError::Parse(format!("mint {} did not unpack: {}", mint, e)))?;
    Ok(state.decimals)
}

/// Where the watcher reads current holdings from. Live mode asks the
/// chain; paper mode reads the synthesized position.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// None means the balance could not be determined this tick.
    async fn balance_atoms(&self, mint: &str) -> Option<u128>;
}

pub struct ChainBalanceSource {
    rpc: Arc<RpcClient>,
    owner: Pubkey,
}

impl ChainBalanceSource {
    pub fn new(rpc: Arc<RpcClient>, owner: Pubkey) -> Self {
        Self { rpc, owner }
    }
}

#[async_trait]
impl BalanceSource for ChainBalanceSource {
    async fn balance_atoms(&self, mint: &str) -> Option<u128> {
        let mint_pk = Pubkey::from_str(mint).ok()?;

        if let Ok(amount) = get_ata_balance(&self.rpc, &self.owner, &mint_pk).await {
            return Some(amount as u128);
        }
        match largest_token_balance(
            &self.rpc,
            &self.owner,
            &mint_pk,
            CommitmentConfig::confirmed(),
        )
        .await
        {
            Ok(Some((amount, _))) => Some(amount),
            Ok(None) => Some(0),
            Err(_) => None,
        }
    }
}

pub struct PaperBalanceSource {
    positions: Arc<PositionStore>,
}

impl PaperBalanceSource {
    pub fn new(positions: Arc<PositionStore>) -> Self {
        Self { positions }
    }
}

#[async_trait]
impl BalanceSource for PaperBalanceSource {
    async fn balance_atoms(&self, mint: &str) -> Option<u128> {
        Some(
            self.positions
                .get_open(mint)
                .and_then(|p| p.qty_atoms)
                .unwrap_or(0),
        )
    }
}
