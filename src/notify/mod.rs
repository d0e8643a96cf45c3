pub mod telegram;

use async_trait::async_trait;

use crate::error::Result;

/// Outbound chat notifications. Always best-effort: callers log failures
/// and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: String) -> Result<()>;
}

/// Used when no channel is configured and in tests.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _text: String) -> Result<()> {
        Ok(())
    }
}

pub mod messages {
    use crate::detector::buy_detector::BuySignal;
    use crate::store::positions::{ClosedPosition, OpenPosition};

    fn fmt_opt_price(price: Option<f64>) -> String {
        price
            .map(|p| format!("${:.8}", p))
            .unwrap_or_else(|| "n/a".to_string())
    }

    pub fn signal_detected(signal: &BuySignal) -> String {
        let sol = signal
            .sol_spent
            .map(|s| format!(" ({:.4} SOL)", s))
            .unwrap_or_default();
        format!(
            "🔔 Buy signal\nwallet: {}\nmint: {}\namount: {}{}\ntx: {}",
            signal.wallet, signal.mint, signal.amount, sol, signal.signature
        )
    }

    pub fn position_opened(position: &OpenPosition) -> String {
        format!(
            "🟢 Position opened [{}]\nmint: {}\nentry: {}\nstrategy: {}\nfrom: {}",
            chrono::Local::now().format("%H:%M:%S"),
            position.mint,
            fmt_opt_price(position.entry_price_usd),
            position.strategy,
            position.origin_wallet
        )
    }

    pub fn position_closed(closed: &ClosedPosition) -> String {
        let pnl = closed
            .pnl_pct
            .map(|p| format!("{:+.2}%", p))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "🔴 Position closed [{}]\nmint: {}\nreason: {}\nentry: {} -> exit: {}\npnl: {}",
            chrono::Local::now().format("%H:%M:%S"),
            closed.mint,
            closed.reason,
            fmt_opt_price(closed.entry_price_usd),
            fmt_opt_price(closed.exit_price_usd),
            pnl
        )
    }
}
