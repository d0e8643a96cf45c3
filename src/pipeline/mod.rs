pub mod mint_state;
pub mod router;
pub mod watcher;
