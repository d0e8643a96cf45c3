use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// One enhanced transaction as delivered by the event provider. Payload
/// shapes vary across sources; every field is optional or defaulted and
/// unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnhancedTransaction {
    pub signature: String,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub token_transfers: Vec<TokenTransfer>,
    pub native_transfers: Vec<NativeTransfer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenTransfer {
    pub from_user_account: Option<String>,
    pub to_user_account: Option<String>,
    pub mint: Option<String>,
    /// UI-normalized amount, e.g. 12.5 for 12_500_000 atoms at 6 decimals.
    pub token_amount: Option<f64>,
    pub raw_token_amount: Option<RawTokenAmount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTokenAmount {
    pub token_amount: String,
    pub decimals: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NativeTransfer {
    pub from_user_account: Option<String>,
    pub to_user_account: Option<String>,
    /// Lamports.
    pub amount: Option<u64>,
}

impl TokenTransfer {
    /// Token atoms for this transfer. The UI field is checked first (the
    /// dominant payload variant), the raw string second.
    pub fn atoms(&self) -> Option<u128> {
        if let Some(ui) = self.token_amount {
            if ui > 0.0 && ui.is_finite() {
                return Some(ui as u128);
            }
        }
        self.raw_token_amount
            .as_ref()
            .and_then(|raw| raw.token_amount.parse::<u128>().ok())
            .filter(|v| *v > 0)
    }

    pub fn decimals(&self) -> Option<u8> {
        self.raw_token_amount.as_ref().and_then(|raw| raw.decimals)
    }
}

impl EnhancedTransaction {
    /// Native SOL sent by `wallet` in this transaction, in SOL.
    pub fn sol_spent_by(&self, wallet: &str) -> Option<f64> {
        let lamports: u64 = self
            .native_transfers
            .iter()
            .filter(|t| t.from_user_account.as_deref() == Some(wallet))
            .filter_map(|t| t.amount)
            .sum();
        if lamports == 0 {
            return None;
        }
        Some(lamports as f64 / LAMPORTS_PER_SOL)
    }
}

/// Webhook bodies arrive as one record or an array of records. Records
/// that do not deserialize are dropped with a single warning.
pub fn parse_batch(body: Value) -> Vec<EnhancedTransaction> {
    let items = match body {
        Value::Array(items) => items,
        other => vec![other],
    };

    let total = items.len();
    let parsed: Vec<EnhancedTransaction> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();

    if parsed.len() < total {
        warn!(
            dropped = total - parsed.len(),
            "webhook batch contained malformed records"
        );
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_enhanced_tx_with_unknown_fields() {
        let body = json!({
            "signature": "S1",
            "type": "SWAP",
            "somethingNew": { "ignored": true },
            "tokenTransfers": [{
                "mint": "MintA",
                "toUserAccount": "WalletA",
                "tokenAmount": 10000000.0
            }],
            "nativeTransfers": [{
                "fromUserAccount": "WalletA",
                "amount": 250000000u64
            }]
        });

        let txs = parse_batch(body);
        assert_eq!(txs.len(), 1);
        let tx = &txs[0];
        assert_eq!(tx.signature, "S1");
        assert_eq!(tx.token_transfers[0].atoms(), Some(10_000_000));
        assert_eq!(tx.sol_spent_by("WalletA"), Some(0.25));
        assert_eq!(tx.sol_spent_by("WalletB"), None);
    }

    #[test]
    fn raw_amount_is_fallback_for_missing_ui_amount() {
        let transfer: TokenTransfer = serde_json::from_value(json!({
            "mint": "MintA",
            "toUserAccount": "WalletA",
            "rawTokenAmount": { "tokenAmount": "123456789123456789123", "decimals": 9 }
        }))
        .unwrap();

        assert_eq!(transfer.atoms(), Some(123_456_789_123_456_789_123u128));
        assert_eq!(transfer.decimals(), Some(9));
    }

    #[test]
    fn zero_and_negative_amounts_resolve_to_none() {
        let transfer: TokenTransfer = serde_json::from_value(json!({
            "mint": "MintA",
            "tokenAmount": 0.0,
            "rawTokenAmount": { "tokenAmount": "0" }
        }))
        .unwrap();
        assert_eq!(transfer.atoms(), None);

        let transfer: TokenTransfer =
            serde_json::from_value(json!({ "tokenAmount": -5.0 })).unwrap();
        assert_eq!(transfer.atoms(), None);
    }

    #[test]
    fn batch_array_and_malformed_records() {
        let body = json!([
            { "signature": "S1" },
            "not-an-object",
            { "signature": "S2" }
        ]);
        let txs = parse_batch(body);
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[1].signature, "S2");
    }
}
