use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;

const BACKOFF_JITTER_MS: u64 = 250;

#[derive(Debug, Default)]
struct MintState {
    in_flight: bool,
    exiting: bool,
    cooldown_until_ms: u64,
    backoff_level: u32,
}

/// Per-mint concurrency flags and backoff state. One DashMap entry per
/// mint; shard locks keep tick operations from contending globally.
pub struct MintStateMap {
    map: DashMap<String, MintState>,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl MintStateMap {
    pub fn new(base_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            map: DashMap::new(),
            base_backoff_ms,
            max_backoff_ms,
        }
    }

    /// At most one pending buy per mint. True when this caller acquired it.
    pub fn try_begin_buy(&self, mint: &str) -> bool {
        let mut entry = self.map.entry(mint.to_string()).or_default();
        if entry.in_flight {
            return false;
        }
        entry.in_flight = true;
        true
    }

    pub fn end_buy(&self, mint: &str) {
        if let Some(mut entry) = self.map.get_mut(mint) {
            entry.in_flight = false;
        }
    }

    pub fn buy_in_flight(&self, mint: &str) -> bool {
        self.map.get(mint).map(|e| e.in_flight).unwrap_or(false)
    }

    /// At most one exit attempt per mint. True when this caller latched it.
    pub fn try_begin_exit(&self, mint: &str) -> bool {
        let mut entry = self.map.entry(mint.to_string()).or_default();
        if entry.exiting {
            return false;
        }
        entry.exiting = true;
        true
    }

    pub fn end_exit(&self, mint: &str) {
        if let Some(mut entry) = self.map.get_mut(mint) {
            entry.exiting = false;
        }
    }

    pub fn cooldown_active(&self, mint: &str, now_ms: u64) -> bool {
        self.map
            .get(mint)
            .map(|e| e.cooldown_until_ms > now_ms)
            .unwrap_or(false)
    }

    /// Advance the exponential backoff one level and arm the cooldown.
    /// Delay = base * 2^(level-1), capped, plus up to 250ms jitter.
    pub fn next_backoff(&self, mint: &str, now_ms: u64) -> Duration {
        let mut entry = self.map.entry(mint.to_string()).or_default();
        entry.backoff_level = entry.backoff_level.saturating_add(1);

        let exp = self
            .base_backoff_ms
            .saturating_mul(1u64 << (entry.backoff_level - 1).min(16));
        let jitter = rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS);
        let delay_ms = exp.min(self.max_backoff_ms) + jitter;

        entry.cooldown_until_ms = now_ms + delay_ms;
        Duration::from_millis(delay_ms)
    }

    pub fn clear_backoff(&self, mint: &str) {
        if let Some(mut entry) = self.map.get_mut(mint) {
            entry.backoff_level = 0;
            entry.cooldown_until_ms = 0;
        }
    }

    /// Drop all state for a mint once its position is closed.
    pub fn forget(&self, mint: &str) {
        self.map.remove(mint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_lock_is_exclusive_until_released() {
        let state = MintStateMap::new(1500, 60_000);

        assert!(state.try_begin_buy("M"));
        assert!(!state.try_begin_buy("M"));
        assert!(state.buy_in_flight("M"));

        state.end_buy("M");
        assert!(state.try_begin_buy("M"));

        // Independent mints do not interfere.
        assert!(state.try_begin_buy("N"));
    }

    #[test]
    fn exit_latch_is_exclusive() {
        let state = MintStateMap::new(1500, 60_000);
        assert!(state.try_begin_exit("M"));
        assert!(!state.try_begin_exit("M"));
        state.end_exit("M");
        assert!(state.try_begin_exit("M"));
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let state = MintStateMap::new(1500, 60_000);

        let d1 = state.next_backoff("M", 0).as_millis() as u64;
        let d2 = state.next_backoff("M", 0).as_millis() as u64;
        let d3 = state.next_backoff("M", 0).as_millis() as u64;

        assert!((1500..=1750).contains(&d1));
        assert!((3000..=3250).contains(&d2));
        assert!((6000..=6250).contains(&d3));

        for _ in 0..10 {
            state.next_backoff("M", 0);
        }
        let capped = state.next_backoff("M", 0).as_millis() as u64;
        assert!(capped <= 60_000 + BACKOFF_JITTER_MS);
    }

    #[test]
    fn cooldown_arms_and_expires() {
        let state = MintStateMap::new(1000, 60_000);

        let delay = state.next_backoff("M", 100).as_millis() as u64;
        assert!(state.cooldown_active("M", 100));
        assert!(state.cooldown_active("M", 100 + delay - 1));
        assert!(!state.cooldown_active("M", 100 + delay));

        state.clear_backoff("M");
        assert!(!state.cooldown_active("M", 100));
        let reset = state.next_backoff("M", 0).as_millis() as u64;
        assert!((1000..=1250).contains(&reset));
    }

    #[test]
    fn forget_drops_all_flags() {
        let state = MintStateMap::new(1000, 60_000);
        state.try_begin_buy("M");
        state.try_begin_exit("M");
        state.forget("M");
        assert!(!state.buy_in_flight("M"));
        assert!(state.try_begin_exit("M"));
    }
}
