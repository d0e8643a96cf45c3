use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::http::pool::create_http_client;

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(400);

/// Outbound socket budget across all endpoints. Every race opens one
/// request per endpoint, so the per-race permit count is this divided by
/// the endpoint count; 128 stays under the connection quota of the
/// stingiest free RPC plans.
const SOCKET_BUDGET: usize = 128;

/// Parse a comma-separated endpoint list: trim, keep http(s) only,
/// drop duplicates while preserving order.
pub fn parse_endpoints(raw: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| s.starts_with("http://") || s.starts_with("https://"))
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct BroadcastResult {
    pub signature: String,
    /// The endpoint that won the confirmation race. Reused by callers for
    /// meta lookups to avoid cross-endpoint visibility gaps.
    pub endpoint_used: String,
}

/// Multi-endpoint race broadcaster. Every endpoint sends and confirms
/// concurrently; the first confirmation wins and the rest are aborted.
#[derive(Clone)]
pub struct Broadcaster {
    client: Client,
    endpoints: Vec<String>,
    /// One permit per in-flight race, sized from SOCKET_BUDGET.
    races: Arc<Semaphore>,
    max_wait: Duration,
}

impl Broadcaster {
    pub fn new(endpoints: Vec<String>, max_wait_ms: u64) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(AppError::Init("No RPC endpoints provided".into()));
        }

        let permits = (SOCKET_BUDGET / endpoints.len()).max(1);
        Ok(Self {
            client: create_http_client()?,
            endpoints,
            races: Arc::new(Semaphore::new(permits)),
            max_wait: Duration::from_millis(max_wait_ms),
        })
    }

    pub fn primary_endpoint(&self) -> &str {
        &self.endpoints[0]
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Single-endpoint JSON-RPC 2.0 call.
    pub async fn rpc_call_on(&self, endpoint: &str, method: &str, params: Value) -> Result<Value> {
        rpc_call_raw(&self.client, endpoint, method, params).await
    }

    /// Race a JSON-RPC call across all endpoints; first success wins.
    pub async fn rpc_call(&self, method: &str, params: Value) -> Result<Value> {
        let _permit = self.races.acquire().await.expect("Semaphore closed");

        let mut set: JoinSet<Result<Value>> = JoinSet::new();
        for endpoint in &self.endpoints {
            let client = self.client.clone();
            let endpoint = endpoint.clone();
            let method = method.to_string();
            let params = params.clone();
            set.spawn(async move { rpc_call_raw(&client, &endpoint, &method, params).await });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(value)) => {
                    set.abort_all();
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    warn!("RPC race task join error: {}", e);
                }
            }
        }

        Err(first_error.unwrap_or_else(|| AppError::Rpc("all RPC endpoints failed".into())))
    }

    /// Send a serialized transaction to every endpoint and wait for the
    /// first one to confirm it. Losing endpoints keep running until the
    /// winner aborts them; their errors are only surfaced if all fail.
    pub async fn broadcast_and_confirm(&self, tx_base64: &str) -> Result<BroadcastResult> {
        let _permit = self.races.acquire().await.expect("Semaphore closed");
        let deadline = Instant::now() + self.max_wait;

        let mut set: JoinSet<Result<BroadcastResult>> = JoinSet::new();
        for endpoint in &self.endpoints {
            let client = self.client.clone();
            let endpoint = endpoint.clone();
            let tx = tx_base64.to_string();
            set.spawn(async move {
                let signature = send_and_confirm_on(&client, &endpoint, &tx, deadline).await?;
                Ok(BroadcastResult {
                    signature,
                    endpoint_used: endpoint,
                })
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(result)) => {
                    set.abort_all();
                    debug!(
                        signature = %result.signature,
                        endpoint = %result.endpoint_used,
                        "broadcast race won"
                    );
                    return Ok(result);
                }
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    warn!("broadcast task join error: {}", e);
                }
            }
        }

        Err(first_error
            .unwrap_or_else(|| AppError::transient("broadcast race produced no result")))
    }

    /// Confirmed-transaction meta lookup, pinned to one endpoint.
    pub async fn get_transaction_on(&self, endpoint: &str, signature: &str) -> Result<Value> {
        let params = json!([
            signature,
            { "encoding": "jsonParsed", "maxSupportedTransactionVersion": 0, "commitment": "confirmed" }
        ]);
        self.rpc_call_on(endpoint, "getTransaction", params).await
    }

    /// 75th percentile of recent prioritization fees, micro-lamports.
    pub async fn recent_priority_fee_p75(&self) -> Option<u64> {
        let result = self
            .rpc_call("getRecentPrioritizationFees", json!([]))
            .await
            .ok()?;

        let mut fees: Vec<u64> = result
            .as_array()?
            .iter()
            .filter_map(|entry| entry.get("prioritizationFee").and_then(Value::as_u64))
            .collect();
        if fees.is_empty() {
            return None;
        }
        fees.sort_unstable();
        let idx = (fees.len() as f64 * 0.75) as usize;
        Some(fees[idx.min(fees.len() - 1)])
    }
}

async fn rpc_call_raw(client: &Client, endpoint: &str, method: &str, params: Value) -> Result<Value> {
    let request_body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params
    });

    let response = client
        .post(endpoint)
        .json(&request_body)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| AppError::Rpc(format!("{}: {}", endpoint, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::Rpc(format!("{}: HTTP {}", endpoint, status)).annotate_rate_limit());
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| AppError::Parse(format!("{}: {}", endpoint, e)))?;

    if let Some(error) = body.get("error") {
        return Err(AppError::Rpc(format!("{}: {}", endpoint, error)));
    }

    Ok(body.get("result").cloned().unwrap_or(Value::Null))
}

async fn send_and_confirm_on(
    client: &Client,
    endpoint: &str,
    tx_base64: &str,
    deadline: Instant,
) -> Result<String> {
    let params = json!([
        tx_base64,
        { "encoding": "base64", "skipPreflight": true, "maxRetries": 3 }
    ]);

    let signature = rpc_call_raw(client, endpoint, "sendTransaction", params)
        .await?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AppError::Parse("sendTransaction result is not a string".into()))?;

    loop {
        if Instant::now() >= deadline {
            return Err(AppError::transient(format!(
                "{}: confirmation timed out for {}",
                endpoint, signature
            )));
        }
        tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;

        let statuses = rpc_call_raw(
            client,
            endpoint,
            "getSignatureStatuses",
            json!([[signature], { "searchTransactionHistory": false }]),
        )
        .await?;

        let Some(status) = statuses.get("value").and_then(|v| v.get(0)).filter(|s| !s.is_null())
        else {
            continue;
        };

        if status.get("err").map(|e| !e.is_null()).unwrap_or(false) {
            return Err(AppError::Rpc(format!(
                "{}: transaction {} failed on-chain: {}",
                endpoint, signature, status["err"]
            )));
        }

        match status.get("confirmationStatus").and_then(Value::as_str) {
            Some("confirmed") | Some("finalized") => return Ok(signature),
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Json;
    use axum::routing::post;
    use axum::Router;

    #[test]
    fn parse_endpoints_filters_and_dedupes() {
        let parsed = parse_endpoints(
            "https://a.example/, ws://nope.example, https://a.example, http://b.example,,",
        );
        assert_eq!(parsed, vec!["https://a.example", "http://b.example"]);
    }

    /// Mock JSON-RPC endpoint. `confirms` controls whether
    /// getSignatureStatuses ever reports the transaction as confirmed.
    async fn spawn_mock_rpc(sig: &'static str, confirms: bool) -> String {
        let app = Router::new().route(
            "/",
            post(move |Json(body): Json<Value>| async move {
                let method = body["method"].as_str().unwrap_or_default();
                let result = match method {
                    "sendTransaction" => json!(sig),
                    "getSignatureStatuses" if confirms => {
                        json!({ "value": [{ "confirmationStatus": "confirmed", "err": null }] })
                    }
                    "getSignatureStatuses" => json!({ "value": [null] }),
                    _ => Value::Null,
                };
                Json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn race_returns_first_confirming_endpoint() {
        let slow = spawn_mock_rpc("SigSlow", false).await;
        let fast = spawn_mock_rpc("SigFast", true).await;

        let broadcaster =
            Broadcaster::new(vec![slow, fast.clone()], 5_000).expect("broadcaster");
        let result = broadcaster.broadcast_and_confirm("dGVzdA==").await.unwrap();

        assert_eq!(result.signature, "SigFast");
        assert_eq!(result.endpoint_used, fast);
    }

    #[tokio::test]
    async fn race_survives_offline_endpoint() {
        let healthy = spawn_mock_rpc("SigHealthy", true).await;
        let offline = "http://127.0.0.1:1".to_string();

        let broadcaster =
            Broadcaster::new(vec![offline, healthy.clone()], 5_000).expect("broadcaster");
        let result = broadcaster.broadcast_and_confirm("dGVzdA==").await.unwrap();

        assert_eq!(result.signature, "SigHealthy");
        assert_eq!(result.endpoint_used, healthy);
    }

    #[tokio::test]
    async fn race_surfaces_error_when_all_fail() {
        let broadcaster = Broadcaster::new(
            vec!["http://127.0.0.1:1".into(), "http://127.0.0.1:2".into()],
            1_000,
        )
        .expect("broadcaster");

        assert!(broadcaster.broadcast_and_confirm("dGVzdA==").await.is_err());
    }
}
