use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::TradeMode;
use crate::store::snapshot::{read_json_or_default, write_json_atomic};
use crate::utils::time::now_ms;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub mint: String,
    pub origin_wallet: String,
    pub entry_price_usd: Option<f64>,
    pub qty_atoms: Option<u128>,
    pub decimals: Option<u8>,
    pub sol_spent: Option<f64>,
    pub ts_open: u64,
    pub source_tx: String,
    pub mode: TradeMode,
    pub strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub mint: String,
    pub origin_wallet: String,
    pub entry_price_usd: Option<f64>,
    pub qty_atoms: Option<u128>,
    pub decimals: Option<u8>,
    pub sol_spent: Option<f64>,
    pub ts_open: u64,
    pub source_tx: String,
    pub mode: TradeMode,
    pub strategy: String,
    pub exit_price_usd: Option<f64>,
    pub exit_tx: Option<String>,
    pub ts_close: u64,
    pub pnl_pct: Option<f64>,
    pub reason: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PositionsState {
    open: HashMap<String, OpenPosition>,
    closed: Vec<ClosedPosition>,
}

/// Durable record of open and closed positions. One writer at a time;
/// snapshot writes are best-effort and never propagate errors upward.
pub struct PositionStore {
    inner: Mutex<PositionsState>,
    path: PathBuf,
}

impl PositionStore {
    pub fn load(path: PathBuf) -> Self {
        let state: PositionsState = read_json_or_default(&path);
        if !state.open.is_empty() {
            info!(open = state.open.len(), "restored open positions from snapshot");
        }
        Self {
            inner: Mutex::new(state),
            path,
        }
    }

    /// Overwrites any existing position for the mint.
    pub fn open_position(&self, position: OpenPosition) {
        let mut state = self.inner.lock();
        state.open.insert(position.mint.clone(), position);
        self.persist_locked(&state);
    }

    /// Moves the open position to the closed list. `pnl_pct` is computed
    /// only when both entry and exit prices are finite.
    pub fn close_position(
        &self,
        mint: &str,
        exit_price_usd: Option<f64>,
        exit_tx: Option<String>,
        reason: &str,
    ) -> Option<ClosedPosition> {
        let mut state = self.inner.lock();
        let open = state.open.remove(mint)?;

        let pnl_pct = match (open.entry_price_usd, exit_price_usd) {
            (Some(entry), Some(exit)) if entry.is_finite() && exit.is_finite() && entry != 0.0 => {
                Some((exit - entry) / entry * 100.0)
            }
            _ => None,
        };

        let closed = ClosedPosition {
            mint: open.mint,
            origin_wallet: open.origin_wallet,
            entry_price_usd: open.entry_price_usd,
            qty_atoms: open.qty_atoms,
            decimals: open.decimals,
            sol_spent: open.sol_spent,
            ts_open: open.ts_open,
            source_tx: open.source_tx,
            mode: open.mode,
            strategy: open.strategy,
            exit_price_usd,
            exit_tx,
            ts_close: now_ms(),
            pnl_pct,
            reason: reason.to_string(),
        };
        state.closed.push(closed.clone());
        self.persist_locked(&state);
        Some(closed)
    }

    pub fn get_open(&self, mint: &str) -> Option<OpenPosition> {
        self.inner.lock().open.get(mint).cloned()
    }

    pub fn has_open(&self, mint: &str) -> bool {
        self.inner.lock().open.contains_key(mint)
    }

    pub fn open_mints(&self) -> Vec<String> {
        self.inner.lock().open.keys().cloned().collect()
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().open.len()
    }

    pub fn closed_count(&self) -> usize {
        self.inner.lock().closed.len()
    }

    pub fn persist(&self) {
        let state = self.inner.lock();
        self.persist_locked(&state);
    }

    fn persist_locked(&self, state: &PositionsState) {
        if let Err(e) = write_json_atomic(&self.path, state) {
            warn!(path = %self.path.display(), "position snapshot write failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(mint: &str, entry: Option<f64>) -> OpenPosition {
        OpenPosition {
            mint: mint.to_string(),
            origin_wallet: "W".to_string(),
            entry_price_usd: entry,
            qty_atoms: Some(100_000_000),
            decimals: Some(6),
            sol_spent: Some(0.05),
            ts_open: now_ms(),
            source_tx: "S1".to_string(),
            mode: TradeMode::Paper,
            strategy: "any-route".to_string(),
        }
    }

    #[test]
    fn close_moves_record_and_computes_pnl() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = PositionStore::load(dir.path().join("positions.json"));

        store.open_position(position("MintA", Some(0.01)));
        assert!(store.has_open("MintA"));

        let closed = store
            .close_position("MintA", Some(0.013), Some("X1".into()), "take_profit_20%")
            .expect("closed");

        assert!(!store.has_open("MintA"));
        assert_eq!(store.closed_count(), 1);
        assert_eq!(closed.mint, "MintA");
        assert_eq!(closed.reason, "take_profit_20%");
        let pnl = closed.pnl_pct.expect("pnl");
        assert!((pnl - 30.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn pnl_is_null_when_either_price_missing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = PositionStore::load(dir.path().join("positions.json"));

        store.open_position(position("MintA", None));
        let closed = store
            .close_position("MintA", Some(0.013), None, "manual")
            .expect("closed");
        assert!(closed.pnl_pct.is_none());
        assert!(closed.exit_tx.is_none());
        Ok(())
    }

    #[test]
    fn open_overwrites_by_mint_and_survives_reload() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("positions.json");

        {
            let store = PositionStore::load(path.clone());
            store.open_position(position("MintA", Some(0.01)));
            store.open_position(position("MintA", Some(0.02)));
            assert_eq!(store.open_count(), 1);
        }

        let reloaded = PositionStore::load(path);
        assert_eq!(reloaded.open_count(), 1);
        assert_eq!(
            reloaded.get_open("MintA").unwrap().entry_price_usd,
            Some(0.02)
        );
        Ok(())
    }

    #[test]
    fn close_of_unknown_mint_is_none() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = PositionStore::load(dir.path().join("positions.json"));
        assert!(store.close_position("Nope", None, None, "manual").is_none());
        Ok(())
    }
}
