use std::collections::HashSet;

use tracing::{debug, warn};

use crate::detector::event::EnhancedTransaction;
use crate::detector::seen_cache::{buy_key, SeenCache};

/// Normalized buy signal: one tracked wallet received one non-excluded
/// mint. Amounts are token atoms; UI conversion happens at display
/// boundaries only.
#[derive(Debug, Clone, PartialEq)]
pub struct BuySignal {
    pub wallet: String,
    pub mint: String,
    pub amount: u128,
    pub signature: String,
    pub sol_spent: Option<f64>,
    pub tx_type: String,
}

pub struct BuyDetector {
    excluded_mints: HashSet<String>,
    min_token_amount: u128,
}

impl BuyDetector {
    pub fn new(excluded_mints: HashSet<String>, min_token_amount: u128) -> Self {
        Self {
            excluded_mints,
            min_token_amount,
        }
    }

    /// Extract buy signals from one enhanced transaction. Total: malformed
    /// transfers are skipped (one warning per transaction), nothing throws
    /// into the pipeline.
    pub fn detect(
        &self,
        tx: &EnhancedTransaction,
        tracked: &HashSet<String>,
        seen: &SeenCache,
    ) -> Vec<BuySignal> {
        let mut signals = Vec::new();
        let mut malformed = 0usize;

        for transfer in &tx.token_transfers {
            let Some(mint) = transfer.mint.as_deref().filter(|m| !m.is_empty()) else {
                malformed += 1;
                continue;
            };
            let Some(amount) = transfer.atoms() else {
                malformed += 1;
                continue;
            };
            let Some(wallet) = transfer.to_user_account.as_deref().filter(|w| !w.is_empty())
            else {
                continue;
            };

            if self.excluded_mints.contains(mint) {
                debug!(mint, "transfer ignored: excluded mint");
                continue;
            }
            if !tracked.contains(wallet) {
                continue;
            }
            if amount < self.min_token_amount {
                debug!(mint, amount, "transfer ignored: below dust threshold");
                continue;
            }
            if !seen.check_and_stamp(&buy_key(wallet, mint)) {
                debug!(wallet, mint, "buy debounced");
                continue;
            }

            signals.push(BuySignal {
                wallet: wallet.to_string(),
                mint: mint.to_string(),
                amount,
                signature: tx.signature.clone(),
                sol_spent: tx.sol_spent_by(wallet),
                tx_type: tx.tx_type.clone(),
            });
        }

        if malformed > 0 {
            warn!(
                signature = %tx.signature,
                malformed,
                "transaction had transfers without mint or amount"
            );
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::event::parse_batch;
    use serde_json::json;
    use std::time::Duration;

    const W: &str = "Wallet1111111111111111111111111111111111111";
    const M: &str = "Mint111111111111111111111111111111111111111";
    const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    fn tracked() -> HashSet<String> {
        [W.to_string()].into_iter().collect()
    }

    fn event(sig: &str, mint: &str, amount: f64) -> EnhancedTransaction {
        parse_batch(json!({
            "signature": sig,
            "type": "SWAP",
            "tokenTransfers": [{
                "mint": mint,
                "toUserAccount": W,
                "tokenAmount": amount
            }],
            "nativeTransfers": [{
                "fromUserAccount": W,
                "amount": 50000000u64
            }]
        }))
        .remove(0)
    }

    #[test]
    fn basic_buy_detection_and_debounce() {
        let detector = BuyDetector::new(HashSet::new(), 0);
        let seen = SeenCache::new(Duration::from_secs(600));

        let signals = detector.detect(&event("S1", M, 10_000_000.0), &tracked(), &seen);
        assert_eq!(
            signals,
            vec![BuySignal {
                wallet: W.to_string(),
                mint: M.to_string(),
                amount: 10_000_000,
                signature: "S1".to_string(),
                sol_spent: Some(0.05),
                tx_type: "SWAP".to_string(),
            }]
        );

        // Same (wallet, mint) within the TTL: debounced even with a new
        // signature.
        let signals = detector.detect(&event("S2", M, 10_000_000.0), &tracked(), &seen);
        assert!(signals.is_empty());
    }

    #[test]
    fn excluded_mint_is_ignored() {
        let excluded = [USDC.to_string()].into_iter().collect();
        let detector = BuyDetector::new(excluded, 0);
        let seen = SeenCache::new(Duration::from_secs(600));

        let signals = detector.detect(&event("S1", USDC, 5_000_000.0), &tracked(), &seen);
        assert!(signals.is_empty());
    }

    #[test]
    fn untracked_receiver_is_ignored() {
        let detector = BuyDetector::new(HashSet::new(), 0);
        let seen = SeenCache::new(Duration::from_secs(600));
        let other: HashSet<String> = ["SomeoneElse".to_string()].into_iter().collect();

        let signals = detector.detect(&event("S1", M, 10_000_000.0), &other, &seen);
        assert!(signals.is_empty());
    }

    #[test]
    fn dust_filter_applies() {
        let detector = BuyDetector::new(HashSet::new(), 1_000_000);
        let seen = SeenCache::new(Duration::from_secs(600));

        let signals = detector.detect(&event("S1", M, 999.0), &tracked(), &seen);
        assert!(signals.is_empty());
    }

    #[test]
    fn malformed_transfers_are_skipped_not_fatal() {
        let detector = BuyDetector::new(HashSet::new(), 0);
        let seen = SeenCache::new(Duration::from_secs(600));

        let tx = parse_batch(json!({
            "signature": "S1",
            "tokenTransfers": [
                { "toUserAccount": W },
                { "mint": M, "toUserAccount": W, "tokenAmount": 7_000_000.0 }
            ]
        }))
        .remove(0);

        let signals = detector.detect(&tx, &tracked(), &seen);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].mint, M);
        assert_eq!(signals[0].sol_spent, None);
    }

    #[test]
    fn multiple_transfers_emit_in_order() {
        let detector = BuyDetector::new(HashSet::new(), 0);
        let seen = SeenCache::new(Duration::from_secs(600));

        let tx = parse_batch(json!({
            "signature": "S1",
            "tokenTransfers": [
                { "mint": "MintA", "toUserAccount": W, "tokenAmount": 1_000_000.0 },
                { "mint": "MintB", "toUserAccount": W, "tokenAmount": 2_000_000.0 }
            ]
        }))
        .remove(0);

        let signals = detector.detect(&tx, &tracked(), &seen);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].mint, "MintA");
        assert_eq!(signals[1].mint, "MintB");
    }
}
