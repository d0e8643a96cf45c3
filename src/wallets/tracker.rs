use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::http::broadcaster::Broadcaster;
use crate::utils::time::now_ms;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct TopWallet {
    pub address: String,
    pub win_rate_percent: f64,
    pub last_active_ms_ago: Option<u64>,
}

/// External source of smart-money wallets. The engine only consumes the
/// address set; the scoring fields are informational.
#[async_trait]
pub trait WalletSource: Send + Sync {
    async fn top_wallets(&self) -> Result<Vec<TopWallet>>;
}

/// Idempotent webhook registration: upsert(addresses) -> webhook id.
#[async_trait]
pub trait WebhookRegistrar: Send + Sync {
    async fn upsert(&self, addresses: &[String]) -> Result<String>;
}

pub struct HttpWalletSource {
    client: Client,
    url: String,
    api_key: Option<String>,
    limit: usize,
    broadcaster: Option<Arc<Broadcaster>>,
    cache: tokio::sync::Mutex<Option<(Instant, Vec<TopWallet>)>>,
}

impl HttpWalletSource {
    pub fn new(
        url: String,
        api_key: Option<String>,
        limit: usize,
        broadcaster: Option<Arc<Broadcaster>>,
    ) -> Result<Self> {
        let client = Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            client,
            url,
            api_key,
            limit,
            broadcaster,
            cache: tokio::sync::Mutex::new(None),
        })
    }

    /// Stamp each wallet with how long ago its latest signature landed.
    /// Purely additive; RPC failures leave the field unset.
    async fn enrich_activity(&self, wallets: &mut [TopWallet]) {
        let Some(broadcaster) = &self.broadcaster else {
            return;
        };

        let mut set = JoinSet::new();
        for (idx, wallet) in wallets.iter().enumerate() {
            let broadcaster = broadcaster.clone();
            let address = wallet.address.clone();
            set.spawn(async move {
                let result = broadcaster
                    .rpc_call(
                        "getSignaturesForAddress",
                        json!([address, { "limit": 1 }]),
                    )
                    .await;
                let block_time = result
                    .ok()
                    .and_then(|v| v.get(0)?.get("blockTime")?.as_u64());
                (idx, block_time)
            });
        }

        while let Some(joined) = set.join_next().await {
            let Ok((idx, block_time)) = joined else {
                continue;
            };
            if let Some(secs) = block_time {
                wallets[idx].last_active_ms_ago = Some(now_ms().saturating_sub(secs * 1000));
            }
        }
    }
}

#[async_trait]
impl WalletSource for HttpWalletSource {
    async fn top_wallets(&self) -> Result<Vec<TopWallet>> {
        {
            let cache = self.cache.lock().await;
            if let Some((stamp, wallets)) = cache.as_ref() {
                if stamp.elapsed() < CACHE_TTL {
                    debug!(count = wallets.len(), "top wallets served from cache");
                    return Ok(wallets.clone());
                }
            }
        }

        let mut request = self.client.get(&self.url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AppError::Rpc(format!(
                "tracker API error: {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        let mut wallets = parse_top_wallets(&body, self.limit);
        self.enrich_activity(&mut wallets).await;
        info!(count = wallets.len(), "top wallets fetched");

        let mut cache = self.cache.lock().await;
        *cache = Some((Instant::now(), wallets.clone()));
        Ok(wallets)
    }
}

/// Tracker payloads come in several shapes: a bare array, or an object
/// with a `wallets`/`data` list. Entries name the address `wallet`,
/// `address` or `owner`.
fn parse_top_wallets(body: &Value, limit: usize) -> Vec<TopWallet> {
    let entries = body
        .as_array()
        .or_else(|| body.get("wallets").and_then(Value::as_array))
        .or_else(|| body.get("data").and_then(Value::as_array));

    let Some(entries) = entries else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    entries
        .iter()
        .filter_map(|entry| {
            let address = entry
                .get("wallet")
                .or_else(|| entry.get("address"))
                .or_else(|| entry.get("owner"))
                .and_then(Value::as_str)?
                .to_string();
            if address.is_empty() || !seen.insert(address.clone()) {
                return None;
            }

            let win_rate_percent = entry
                .get("winPercentage")
                .or_else(|| entry.get("win_rate_percent"))
                .or_else(|| entry.get("winRate"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);

            Some(TopWallet {
                address,
                win_rate_percent,
                last_active_ms_ago: None,
            })
        })
        .take(limit)
        .collect()
}

pub struct HeliusRegistrar {
    client: Client,
    api_key: String,
    webhook_url: String,
    auth_header: Option<String>,
}

impl HeliusRegistrar {
    pub fn new(api_key: String, webhook_url: String, auth_header: Option<String>) -> Result<Self> {
        let client = Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            webhook_url,
            auth_header,
        })
    }

    fn webhook_body(&self, addresses: &[String]) -> Value {
        let mut body = json!({
            "webhookURL": self.webhook_url,
            "webhookType": "enhanced",
            "transactionTypes": ["SWAP", "TRANSFER"],
            "accountAddresses": addresses,
        });
        if let Some(auth) = &self.auth_header {
            body["authHeader"] = json!(auth);
        }
        body
    }
}

#[async_trait]
impl WebhookRegistrar for HeliusRegistrar {
    async fn upsert(&self, addresses: &[String]) -> Result<String> {
        let base = "https://api.helius.xyz/v0/webhooks";

        let existing: Value = self
            .client
            .get(base)
            .query(&[("api-key", self.api_key.as_str())])
            .send()
            .await?
            .json()
            .await?;

        let existing_id = existing.as_array().and_then(|hooks| {
            hooks.iter().find_map(|hook| {
                (hook.get("webhookURL").and_then(Value::as_str) == Some(self.webhook_url.as_str()))
                    .then(|| hook.get("webhookID").and_then(Value::as_str))
                    .flatten()
                    .map(str::to_string)
            })
        });

        let body = self.webhook_body(addresses);
        match existing_id {
            Some(id) => {
                let response = self
                    .client
                    .put(format!("{}/{}", base, id))
                    .query(&[("api-key", self.api_key.as_str())])
                    .json(&body)
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(AppError::Rpc(format!(
                        "webhook update failed: {}",
                        response.status()
                    )));
                }
                Ok(id)
            }
            None => {
                let response = self
                    .client
                    .post(base)
                    .query(&[("api-key", self.api_key.as_str())])
                    .json(&body)
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(AppError::Rpc(format!(
                        "webhook create failed: {}",
                        response.status()
                    )));
                }
                let created: Value = response.json().await?;
                created
                    .get("webhookID")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| AppError::Parse("webhook create response missing id".into()))
            }
        }
    }
}

/// Used when no provider credentials are configured.
pub struct NoopRegistrar;

#[async_trait]
impl WebhookRegistrar for NoopRegistrar {
    async fn upsert(&self, addresses: &[String]) -> Result<String> {
        warn!(
            count = addresses.len(),
            "no webhook provider configured, registration skipped"
        );
        Ok("unregistered".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_array_payload() {
        let body = json!([
            { "wallet": "A", "winPercentage": 62.5 },
            { "wallet": "B" },
            { "wallet": "A" },
            { "noAddress": true }
        ]);
        let wallets = parse_top_wallets(&body, 10);
        assert_eq!(wallets.len(), 2);
        assert_eq!(wallets[0].address, "A");
        assert_eq!(wallets[0].win_rate_percent, 62.5);
        assert_eq!(wallets[1].win_rate_percent, 0.0);
    }

    #[test]
    fn parses_wrapped_payload_and_respects_limit() {
        let body = json!({ "wallets": [
            { "address": "A" }, { "owner": "B" }, { "wallet": "C" }
        ]});
        let wallets = parse_top_wallets(&body, 2);
        assert_eq!(wallets.len(), 2);
        assert_eq!(wallets[1].address, "B");
    }

    #[test]
    fn unrecognized_payload_is_empty() {
        assert!(parse_top_wallets(&json!({"nope": 1}), 5).is_empty());
    }
}
