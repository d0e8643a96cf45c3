pub mod registry;
pub mod tracker;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::Result;
use crate::notify::Notifier;
use crate::wallets::registry::WalletRegistry;
use crate::wallets::tracker::{WalletSource, WebhookRegistrar};

/// Recomputes the tracked set and re-registers the webhook under one
/// operation, on a timer and on demand from the admin endpoint.
pub struct WalletRefresher {
    source: Arc<dyn WalletSource>,
    registrar: Arc<dyn WebhookRegistrar>,
    registry: Arc<WalletRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl WalletRefresher {
    pub fn new(
        source: Arc<dyn WalletSource>,
        registrar: Arc<dyn WebhookRegistrar>,
        registry: Arc<WalletRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            registrar,
            registry,
            notifier,
        }
    }

    /// Returns the tracked addresses after the refresh. An empty or failed
    /// fetch keeps the previous set.
    pub async fn refresh(&self) -> Result<Vec<String>> {
        let wallets = self.source.top_wallets().await?;
        let addresses: Vec<String> = wallets.into_iter().map(|w| w.address).collect();

        if addresses.is_empty() {
            warn!("tracker returned no wallets, keeping previous set");
            return Ok(self.registry.addresses());
        }

        self.registry.replace(addresses.clone());
        info!(tracked = addresses.len(), "tracked wallet set replaced");

        match self.registrar.upsert(&addresses).await {
            Ok(webhook_id) => info!(webhook_id, "webhook registration updated"),
            Err(e) => warn!("webhook registration failed: {}", e),
        }

        if let Err(e) = self
            .notifier
            .send(format!("📋 Tracking {} wallets", addresses.len()))
            .await
        {
            warn!("refresh notice failed: {}", e);
        }

        Ok(addresses)
    }

    pub async fn run_periodic(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.refresh().await {
                warn!("wallet refresh failed: {}", e);
            }
        }
    }
}
