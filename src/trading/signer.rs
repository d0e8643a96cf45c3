use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;

use crate::error::{AppError, Result};

pub struct TransactionSigner {
    keypair: Keypair,
}

impl TransactionSigner {
    /// Accepts a base58 string or a JSON integer array, the two formats
    /// wallets export.
    pub fn new(secret: &str) -> Result<Self> {
        let trimmed = secret.trim();
        let key_bytes: Vec<u8> = if trimmed.starts_with('[') {
            serde_json::from_str(trimmed)
                .map_err(|e| AppError::Init(format!("Invalid secret key array: {}", e)))?
        } else {
            bs58::decode(trimmed)
                .into_vec()
                .map_err(|e| AppError::Init(format!("Invalid base58 secret key: {}", e)))?
        };

        let keypair = Keypair::from_bytes(&key_bytes)
            .map_err(|e| AppError::Init(format!("Invalid keypair bytes: {}", e)))?;

        Ok(Self { keypair })
    }

    pub fn pubkey(&self) -> solana_sdk::pubkey::Pubkey {
        self.keypair.pubkey()
    }

    pub fn pubkey_string(&self) -> String {
        self.keypair.pubkey().to_string()
    }

    /// Sign serialized transaction bytes, returning the signed transaction
    /// base64-encoded for broadcast. The trader is assumed to be the fee
    /// payer, i.e. the first required signature.
    pub fn sign_transaction_bytes(&self, tx_bytes: &[u8]) -> Result<String> {
        let mut tx: VersionedTransaction = bincode::deserialize(tx_bytes)
            .map_err(|e| AppError::transient(format!("Failed to deserialize tx: {}", e)))?;

        let signature = self.keypair.sign_message(&tx.message.serialize());
        if tx.signatures.is_empty() {
            tx.signatures.push(signature);
        } else {
            tx.signatures[0] = signature;
        }

        let signed_bytes = bincode::serialize(&tx)
            .map_err(|e| AppError::transient(format!("Failed to serialize signed tx: {}", e)))?;
        Ok(STANDARD.encode(signed_bytes))
    }

    /// Same as `sign_transaction_bytes` for a base64-encoded payload
    /// (aggregator swap responses arrive in this form).
    pub fn sign_transaction_base64(&self, tx_base64: &str) -> Result<String> {
        let tx_bytes = STANDARD
            .decode(tx_base64)
            .map_err(|e| AppError::transient(format!("Failed to decode base64 tx: {}", e)))?;
        self.sign_transaction_bytes(&tx_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::hash::Hash;
    use solana_sdk::instruction::Instruction;
    use solana_sdk::message::v0::Message;
    use solana_sdk::message::VersionedMessage;
    use solana_sdk::pubkey::Pubkey;

    fn unsigned_tx_base64(payer: &Keypair) -> String {
        let instructions = vec![Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[],
            vec![],
        )];
        let message = VersionedMessage::V0(
            Message::try_compile(&payer.pubkey(), &instructions, &[], Hash::default()).unwrap(),
        );
        let tx = VersionedTransaction {
            signatures: vec![solana_sdk::signature::Signature::default()],
            message,
        };
        STANDARD.encode(bincode::serialize(&tx).unwrap())
    }

    #[test]
    fn loads_base58_and_array_secrets() {
        let keypair = Keypair::new();

        let b58 = bs58::encode(keypair.to_bytes()).into_string();
        let signer = TransactionSigner::new(&b58).unwrap();
        assert_eq!(signer.pubkey(), keypair.pubkey());

        let array = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        let signer = TransactionSigner::new(&array).unwrap();
        assert_eq!(signer.pubkey(), keypair.pubkey());

        assert!(TransactionSigner::new("not-a-key").is_err());
    }

    #[test]
    fn signs_versioned_transaction() {
        let keypair = Keypair::new();
        let secret = bs58::encode(keypair.to_bytes()).into_string();
        let signer = TransactionSigner::new(&secret).unwrap();

        let signed = signer
            .sign_transaction_base64(&unsigned_tx_base64(&keypair))
            .unwrap();

        let bytes = STANDARD.decode(signed).unwrap();
        let tx: VersionedTransaction = bincode::deserialize(&bytes).unwrap();
        assert_ne!(
            tx.signatures[0],
            solana_sdk::signature::Signature::default()
        );
        assert!(tx.verify_with_results().iter().all(|ok| *ok));
    }
}
