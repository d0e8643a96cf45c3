use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::analytics::stats::Stats;
use crate::detector::event::parse_batch;
use crate::pipeline::router::EventRouter;
use crate::store::positions::PositionStore;
use crate::wallets::registry::WalletRegistry;
use crate::wallets::WalletRefresher;

#[derive(Clone)]
pub struct AppContext {
    pub events: Arc<EventRouter>,
    pub refresher: Arc<WalletRefresher>,
    pub registry: Arc<WalletRegistry>,
    pub positions: Arc<PositionStore>,
    pub stats: Arc<Stats>,
    /// When set, the webhook requires an equal Authorization header.
    pub webhook_secret: Option<String>,
}

pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/helius-webhook", post(receive_webhook))
        .route("/admin/refresh-wallets", post(refresh_wallets))
        .route("/health", get(health))
        .with_state(ctx)
}

async fn receive_webhook(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if let Some(secret) = &ctx.webhook_secret {
        let provided = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok());
        if provided != Some(secret.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "ok": false, "error": "unauthorized" })),
            );
        }
    }

    for tx in parse_batch(body) {
        ctx.events.clone().handle_event(tx).await;
    }
    (StatusCode::OK, Json(json!({ "ok": true })))
}

async fn refresh_wallets(State(ctx): State<AppContext>) -> (StatusCode, Json<Value>) {
    match ctx.refresher.refresh().await {
        Ok(tracked) => (StatusCode::OK, Json(json!({ "ok": true, "tracked": tracked }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error": e.to_string() })),
        ),
    }
}

async fn health(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "tracked_wallets": ctx.registry.len(),
        "open_positions": ctx.positions.open_count(),
        "signals_detected": ctx.stats.signals_detected.load(Ordering::Relaxed),
    }))
}
