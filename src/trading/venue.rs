use std::time::Duration;

use reqwest::Client;
use serde_json::json;

use crate::error::{AppError, Result};

const VENUE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the venue's trade-local endpoint: it returns a pre-built
/// serialized transaction that we sign and broadcast like any other.
#[derive(Debug, Clone)]
pub struct VenueClient {
    client: Client,
    trade_url: String,
    slippage_bps: u16,
    priority_fee_sol: f64,
    pool: String,
}

impl VenueClient {
    pub fn new(
        trade_url: String,
        slippage_bps: u16,
        priority_fee_sol: f64,
        pool: String,
    ) -> Result<Self> {
        let client = Client::builder().timeout(VENUE_TIMEOUT).build()?;
        Ok(Self {
            client,
            trade_url,
            slippage_bps,
            priority_fee_sol,
            pool,
        })
    }

    pub async fn build_buy_tx(
        &self,
        public_key: &str,
        mint: &str,
        sol_amount: f64,
    ) -> Result<Vec<u8>> {
        self.build_tx(json!({
            "publicKey": public_key,
            "action": "buy",
            "mint": mint,
            "amount": sol_amount,
            "denominatedInSol": "true",
            "slippage": self.slippage_bps as f64 / 100.0,
            "priorityFee": self.priority_fee_sol,
            "pool": self.pool,
        }))
        .await
    }

    /// "100%" sells the whole holding; the venue resolves the balance.
    pub async fn build_sell_all_tx(&self, public_key: &str, mint: &str) -> Result<Vec<u8>> {
        self.build_tx(json!({
            "publicKey": public_key,
            "action": "sell",
            "mint": mint,
            "amount": "100%",
            "denominatedInSol": "false",
            "slippage": self.slippage_bps as f64 / 100.0,
            "priorityFee": self.priority_fee_sol,
            "pool": self.pool,
        }))
        .await
    }

    async fn build_tx(&self, body: serde_json::Value) -> Result<Vec<u8>> {
        let response = self.client.post(&self.trade_url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(AppError::rate_limit(format!("venue API: {}", error_text)));
            }
            return Err(AppError::transient(format!(
                "venue API error {}: {}",
                status, error_text
            )));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(AppError::transient("venue API returned empty transaction"));
        }
        Ok(bytes.to_vec())
    }
}
