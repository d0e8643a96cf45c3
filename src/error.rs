use thiserror::Error;

/// Classification of trade-path failures. Drives the watcher's backoff
/// decisions: RateLimit/NoRoute/NoBalance end the current sell attempt,
/// Transient is retried inside the attempt loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeErrorKind {
    RateLimit,
    NoBalance,
    NoRoute,
    Transient,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Parsing error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Solana SDK error: {0}")]
    Solana(#[from] solana_sdk::pubkey::ParsePubkeyError),

    #[error("Trading error ({kind:?}): {msg}")]
    Trade { kind: TradeErrorKind, msg: String },

    #[error("Initialization error: {0}")]
    Init(String),
}

impl AppError {
    pub fn rate_limit(msg: impl Into<String>) -> Self {
        AppError::Trade {
            kind: TradeErrorKind::RateLimit,
            msg: msg.into(),
        }
    }

    pub fn no_balance(msg: impl Into<String>) -> Self {
        AppError::Trade {
            kind: TradeErrorKind::NoBalance,
            msg: msg.into(),
        }
    }

    pub fn no_route(msg: impl Into<String>) -> Self {
        AppError::Trade {
            kind: TradeErrorKind::NoRoute,
            msg: msg.into(),
        }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        AppError::Trade {
            kind: TradeErrorKind::Transient,
            msg: msg.into(),
        }
    }

    /// Everything that is not an explicitly classified trade error is
    /// treated as transient by the exit path.
    pub fn trade_kind(&self) -> TradeErrorKind {
        match self {
            AppError::Trade { kind, .. } => *kind,
            _ => TradeErrorKind::Transient,
        }
    }

    /// Re-tag an error as a rate limit when the message carries an HTTP 429
    /// marker. Venue responses bury the status in the body text.
    pub fn annotate_rate_limit(self) -> Self {
        let text = self.to_string();
        if text.contains("429") || text.to_lowercase().contains("rate limit") {
            return AppError::rate_limit(text);
        }
        self
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_kind_classifies_explicit_and_fallback() {
        assert_eq!(
            AppError::no_route("no route").trade_kind(),
            TradeErrorKind::NoRoute
        );
        assert_eq!(
            AppError::Rpc("connection reset".into()).trade_kind(),
            TradeErrorKind::Transient
        );
    }

    #[test]
    fn annotate_rate_limit_rewrites_429() {
        let err = AppError::Rpc("HTTP Error: 429 Too Many Requests".into()).annotate_rate_limit();
        assert_eq!(err.trade_kind(), TradeErrorKind::RateLimit);

        let err = AppError::Rpc("HTTP Error: 500".into()).annotate_rate_limit();
        assert_eq!(err.trade_kind(), TradeErrorKind::Transient);
    }
}
