use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::trading::SOL_MINT;

const PROVIDER_TIMEOUT: Duration = Duration::from_millis(2_500);

#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub price_usd: f64,
    pub source: &'static str,
}

/// Fill context for the derived-price path. `sol_spent` is what the origin
/// wallet paid; with the amount it received this implies a price even when
/// the oracle has no listing yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceHints {
    pub amount_atoms: Option<u128>,
    pub decimals: Option<u8>,
    pub sol_spent: Option<f64>,
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn spot_price_usd(&self, mint: &str, hints: PriceHints) -> Option<PriceQuote>;
    async fn native_usd(&self) -> Option<f64>;
}

pub struct PriceOracle {
    client: Client,
    price_url: String,
    birdeye_api_key: Option<String>,
}

impl PriceOracle {
    pub fn new(price_url: String, birdeye_api_key: Option<String>) -> crate::error::Result<Self> {
        let client = Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .pool_max_idle_per_host(4)
            .build()?;
        Ok(Self {
            client,
            price_url,
            birdeye_api_key,
        })
    }

    async fn jupiter_price(&self, mint: &str) -> Option<f64> {
        let response = self
            .client
            .get(&self.price_url)
            .query(&[("ids", mint)])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!(mint, status = %response.status(), "price API error");
            return None;
        }

        let body: Value = response.json().await.ok()?;
        let entry = body.get("data")?.get(mint)?;
        parse_price_field(entry.get("price")?)
    }

    async fn birdeye_price(&self, mint: &str) -> Option<f64> {
        let key = self.birdeye_api_key.as_deref()?;
        let response = self
            .client
            .get("https://public-api.birdeye.so/defi/price")
            .query(&[("address", mint)])
            .header("X-API-KEY", key)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }

        let body: Value = response.json().await.ok()?;
        body.get("data")?
            .get("value")?
            .as_f64()
            .filter(|p| p.is_finite() && *p > 0.0)
    }

    fn derived_price(&self, hints: PriceHints, native_usd: f64) -> Option<f64> {
        let amount = hints.amount_atoms.filter(|a| *a > 0)?;
        let sol_spent = hints.sol_spent.filter(|s| *s > 0.0 && s.is_finite())?;

        let ui_amount = amount as f64 / 10f64.powi(hints.decimals.unwrap_or(0) as i32);
        let price = sol_spent / ui_amount * native_usd;
        price.is_finite().then_some(price)
    }
}

/// Price fields arrive as numbers or strings depending on API version.
fn parse_price_field(value: &Value) -> Option<f64> {
    let price = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    (price.is_finite() && price > 0.0).then_some(price)
}

#[async_trait]
impl PriceSource for PriceOracle {
    /// Primary listing, then fill-implied derivation, then the secondary
    /// provider. Every path is best-effort; failures yield None.
    async fn spot_price_usd(&self, mint: &str, hints: PriceHints) -> Option<PriceQuote> {
        if let Some(price) = self.jupiter_price(mint).await {
            return Some(PriceQuote {
                price_usd: price,
                source: "jupiter",
            });
        }

        if let Some(native) = self.jupiter_price(SOL_MINT).await {
            if let Some(price) = self.derived_price(hints, native) {
                return Some(PriceQuote {
                    price_usd: price,
                    source: "derived",
                });
            }
        }

        self.birdeye_price(mint).await.map(|price| PriceQuote {
            price_usd: price,
            source: "birdeye",
        })
    }

    async fn native_usd(&self) -> Option<f64> {
        self.jupiter_price(SOL_MINT).await
    }
}
