use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, Result};

const QUOTE_TIMEOUT: Duration = Duration::from_secs(9);

/// Quote restriction ladder, tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteTier {
    /// Single-hop routes only.
    DirectPreferred,
    /// Any route the aggregator can find.
    AnyRoute,
    /// Multi-hop restricted to the native wrap and canonical stable as
    /// intermediates.
    Bridge,
}

impl QuoteTier {
    pub fn strategy_tag(&self) -> &'static str {
        match self {
            QuoteTier::DirectPreferred => "direct-preferred",
            QuoteTier::AnyRoute => "any-route",
            QuoteTier::Bridge => "bridge",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub input_mint: String,
    pub in_amount: String,
    pub output_mint: String,
    pub out_amount: String,
    pub other_amount_threshold: String,
    pub swap_mode: String,
    pub slippage_bps: u64,
    #[serde(default)]
    pub price_impact_pct: String,
    #[serde(default)]
    pub route_plan: Vec<Value>,
    #[serde(default)]
    pub context_slot: u64,
}

impl QuoteResponse {
    pub fn out_atoms(&self) -> Option<u128> {
        self.out_amount.parse().ok()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapRequest<'a> {
    user_public_key: &'a str,
    quote_response: &'a QuoteResponse,
    wrap_and_unwrap_sol: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    compute_unit_price_micro_lamports: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResponse {
    pub swap_transaction: String,
    #[serde(default)]
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone)]
pub struct JupiterClient {
    client: Client,
    quote_url: String,
    swap_url: String,
    slippage_bps: u16,
}

impl JupiterClient {
    pub fn new(quote_url: String, swap_url: String, slippage_bps: u16) -> Result<Self> {
        let client = Client::builder()
            .timeout(QUOTE_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            quote_url,
            swap_url,
            slippage_bps,
        })
    }

    pub async fn get_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount_atoms: u128,
        tier: QuoteTier,
    ) -> Result<QuoteResponse> {
        let amount = amount_atoms.to_string();
        let slippage = self.slippage_bps.to_string();
        let mut params = vec![
            ("inputMint", input_mint),
            ("outputMint", output_mint),
            ("amount", amount.as_str()),
            ("slippageBps", slippage.as_str()),
        ];
        match tier {
            QuoteTier::DirectPreferred => params.push(("onlyDirectRoutes", "true")),
            QuoteTier::Bridge => params.push(("restrictIntermediateTokens", "true")),
            QuoteTier::AnyRoute => {}
        }

        let start = std::time::Instant::now();
        let response = self
            .client
            .get(&self.quote_url)
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_quote_error(status.as_u16(), &error_text));
        }

        let quote: QuoteResponse = response.json().await?;
        debug!(
            tier = tier.strategy_tag(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            out_amount = %quote.out_amount,
            "quote fetched"
        );
        Ok(quote)
    }

    pub async fn get_swap_tx(
        &self,
        quote: &QuoteResponse,
        user_public_key: &str,
        compute_unit_price_micro_lamports: Option<u64>,
    ) -> Result<SwapResponse> {
        let request = SwapRequest {
            user_public_key,
            quote_response: quote,
            wrap_and_unwrap_sol: true,
            compute_unit_price_micro_lamports,
        };

        let response = self.client.post(&self.swap_url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(AppError::rate_limit(format!("swap API: {}", error_text)));
            }
            return Err(AppError::transient(format!(
                "swap API error {}: {}",
                status, error_text
            )));
        }

        Ok(response.json().await?)
    }
}

/// The aggregator reports missing routes as client errors with a marker in
/// the body; everything else on the quote path is transient.
fn classify_quote_error(status: u16, body: &str) -> AppError {
    if status == 429 {
        return AppError::rate_limit(format!("quote API: {}", body));
    }
    let lowered = body.to_lowercase();
    if lowered.contains("route") || lowered.contains("no_route") {
        return AppError::no_route(format!("quote API: {}", body));
    }
    AppError::transient(format!("quote API error {}: {}", status, body))
}
