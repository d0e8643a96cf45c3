pub mod executor;
pub mod jupiter;
pub mod router;
pub mod signer;
pub mod venue;

pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Venue-launched mints carry a recognizable suffix; those are the ones
/// the aggregator often cannot route while the pool is still fresh.
pub fn is_venue_mint(mint: &str) -> bool {
    mint.ends_with("pump")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_marker() {
        assert!(is_venue_mint("7gkN8ik31W1pYhiJYU2sDX9MRVkFGkrShdGaXvJKpump"));
        assert!(!is_venue_mint(SOL_MINT));
    }
}
