use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Tracked wallet set, replaced atomically per refresh. Readers load a
/// consistent snapshot; the only writer is the refresh task.
pub struct WalletRegistry {
    set: ArcSwap<HashSet<String>>,
}

impl WalletRegistry {
    pub fn new(initial: Vec<String>) -> Self {
        Self {
            set: ArcSwap::from_pointee(initial.into_iter().collect()),
        }
    }

    pub fn replace(&self, addresses: Vec<String>) {
        self.set.store(Arc::new(addresses.into_iter().collect()));
    }

    pub fn snapshot(&self) -> Arc<HashSet<String>> {
        self.set.load_full()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.set.load().contains(address)
    }

    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.set.load().iter().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.set.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.load().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_swaps_whole_snapshot() {
        let registry = WalletRegistry::new(vec!["A".into(), "B".into()]);
        assert!(registry.contains("A"));

        let before = registry.snapshot();
        registry.replace(vec!["C".into()]);

        // Old snapshots stay consistent after the swap.
        assert!(before.contains("A"));
        assert!(!registry.contains("A"));
        assert!(registry.contains("C"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn addresses_are_sorted() {
        let registry = WalletRegistry::new(vec!["B".into(), "A".into()]);
        assert_eq!(registry.addresses(), vec!["A".to_string(), "B".to_string()]);
    }
}
